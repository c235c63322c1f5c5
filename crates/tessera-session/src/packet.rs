use serde::{Deserialize, Serialize};
use tessera_core::{Fragment, SyncMessage};

/// What one replica sends another in a sync exchange: protocol messages plus
/// the full fragments the sender knows the receiver is missing.
///
/// The receiver applies `fragments` before it handles `messages`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPacket {
    /// Protocol messages.
    #[serde(default)]
    pub messages: Vec<SyncMessage>,
    /// Fragments pushed to the receiver.
    #[serde(default)]
    pub fragments: Vec<Fragment>,
}

impl SyncPacket {
    /// A packet carrying one message and no fragments.
    pub fn message(message: SyncMessage) -> Self {
        Self {
            messages: vec![message],
            fragments: Vec::new(),
        }
    }

    /// Whether there is nothing left to send.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.fragments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_shape() {
        let packet = SyncPacket::message(SyncMessage::Request {
            path: String::new(),
            key: None,
        });
        assert_eq!(
            serde_json::to_value(&packet).unwrap(),
            serde_json::json!({
                "messages": [{"type": "Request", "path": "", "key": null}],
                "fragments": []
            })
        );
        let empty: SyncPacket = serde_json::from_str("{}").unwrap();
        assert!(empty.is_empty());
    }
}
