pub mod api;
pub mod blocks;
pub mod comparison;
pub mod models;
pub mod time;
