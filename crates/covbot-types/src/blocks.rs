//! Slack Block Kit subset used for coverage messages.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { text: TextObject },
    Divider,
}

impl Block {
    pub fn section(text: impl Into<String>) -> Self {
        Self::Section {
            text: TextObject::mrkdwn(text),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl TextObject {
    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn".to_string(),
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_block_kit() {
        let blocks = vec![Block::section("*hi*"), Block::Divider];
        assert_eq!(
            serde_json::to_string(&blocks).unwrap(),
            r#"[{"type":"section","text":{"type":"mrkdwn","text":"*hi*"}},{"type":"divider"}]"#
        );
    }
}
