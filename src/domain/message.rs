use std::sync::Arc;

use chrono::{DateTime, Utc};

/// An immutable chat message. `created_at` is stamped at acceptance time by
/// the server, never by the client.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Message {
    sender: Arc<str>,
    text: String,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(sender: impl Into<Arc<str>>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn sender(&self) -> &Arc<str> {
        &self.sender
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Renders this message as the `{sender, msg, time}` dictionary the wire
    /// protocol returns from `recvmsg` and `login`'s history dump.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "sender": self.sender.as_ref(),
            "msg": self.text,
            "time": self.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        })
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sent '{}' at {}",
            self.sender,
            self.text,
            self.created_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_carries_sender_text_and_formatted_time() {
        let msg = Message::new("alice", "hi");
        let wire = msg.to_wire();
        assert_eq!(wire["sender"], "alice");
        assert_eq!(wire["msg"], "hi");
        assert!(wire["time"].as_str().unwrap().len() == "YYYY-MM-DD HH:MM:SS".len());
    }
}
