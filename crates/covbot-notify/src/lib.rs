pub mod engine;
pub mod error;
pub mod locks;
pub mod render;
pub mod subscriptions;

pub use engine::{DeliveryEngine, DeliveryReport, EngineOptions};
pub use error::{EngineError, NotifyError};
pub use subscriptions::{DisableOutcome, EnableOutcome, EnableRequest, NotificationService};
