//! Clients for the services covbot talks to: the Slack Web API and the
//! coverage reporting API.

pub mod chat;
pub mod reporting;
pub mod signature;
pub mod slack;

pub use chat::{ChannelInfo, ChatPlatform, PostedMessage};
pub use reporting::{CodecovClient, ReportingApi, RepositoryInfo};
pub use slack::{OAuthSettings, SlackClient};
