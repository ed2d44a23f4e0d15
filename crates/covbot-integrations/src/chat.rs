use anyhow::Result;
use async_trait::async_trait;

use covbot_types::blocks::Block;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    /// Slack's message timestamp, the handle used for later updates.
    pub ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
}

impl ChannelInfo {
    /// Subscriptions may name a channel by id or by `#name`.
    pub fn matches(&self, channel: &str) -> bool {
        let channel = channel.trim();
        self.id == channel || self.name == channel.trim_start_matches('#')
    }
}

/// The chat operations the delivery engine depends on. Every call carries
/// the bot token of the tenant it acts for.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    async fn post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
        blocks: &[Block],
    ) -> Result<PostedMessage>;

    async fn update_message(
        &self,
        token: &str,
        channel: &str,
        ts: &str,
        text: &str,
        blocks: &[Block],
    ) -> Result<PostedMessage>;

    async fn list_channels(&self, token: &str) -> Result<Vec<ChannelInfo>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_match_by_id_or_name() {
        let info = ChannelInfo {
            id: "C01B2AB8K3A".into(),
            name: "general".into(),
        };
        assert!(info.matches("C01B2AB8K3A"));
        assert!(info.matches("general"));
        assert!(info.matches("#general"));
        assert!(!info.matches("invalid"));
    }
}
