//! Chatwoot settings, REST payloads and webhook payloads.

use serde::{Deserialize, Serialize};
use wagate_common::{Error, Result};

// ============================================================================
// Per-session settings
// ============================================================================

/// What the API shows instead of the access token.
pub const REDACTED_TOKEN: &str = "********";

/// Chatwoot provider settings of one session.
///
/// Stored as JSON in the session record (`chatwoot` column).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatwootSettings {
    #[serde(default)]
    pub enabled: bool,
    /// Chatwoot base URL, e.g. `https://app.chatwoot.com`
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub account_id: i64,
    /// User or agent-bot access token
    #[serde(default)]
    pub token: String,
    /// Inbox to post into; defaults to the session id
    #[serde(default)]
    pub name_inbox: Option<String>,
    /// Prefix agent replies with the agent's name
    #[serde(default)]
    pub sign_msg: bool,
    /// Reopen the latest resolved conversation instead of starting a new one
    #[serde(default)]
    pub reopen_conversation: bool,
    /// Open new conversations as `pending`
    #[serde(default)]
    pub conversation_pending: bool,
    /// Merge the 8- and 9-digit twins of Brazilian mobile contacts
    #[serde(default = "default_true")]
    pub merge_brazil_contacts: bool,
    /// Chats never forwarded. `@g.us` and `@s.whatsapp.net` ignore whole classes.
    #[serde(default)]
    pub ignore_jids: Vec<String>,
    /// Create the inbox when it does not exist
    #[serde(default = "default_true")]
    pub auto_create: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ChatwootSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            account_id: 0,
            token: String::new(),
            name_inbox: None,
            sign_msg: false,
            reopen_conversation: false,
            conversation_pending: false,
            merge_brazil_contacts: true,
            ignore_jids: Vec::new(),
            auto_create: true,
        }
    }
}

impl ChatwootSettings {
    /// Check the fields needed to talk to Chatwoot. Disabled settings always pass.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut problems = Vec::new();
        match url::Url::parse(&self.url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") => {}
            _ => problems.push(format!("url '{}' must be an http(s) URL", self.url)),
        }
        if self.account_id <= 0 {
            problems.push("account_id must be positive".to_string());
        }
        if self.token.trim().is_empty() {
            problems.push("token is required".to_string());
        }
        if matches!(self.name_inbox.as_deref(), Some(name) if name.trim().is_empty()) {
            problems.push("name_inbox must not be blank".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "invalid chatwoot settings: {}",
                problems.join("; ")
            )))
        }
    }

    pub fn inbox_name<'a>(&'a self, session_id: &'a str) -> &'a str {
        self.name_inbox.as_deref().unwrap_or(session_id)
    }

    /// Whether messages from `jid` must not reach Chatwoot.
    pub fn ignores(&self, jid: &str) -> bool {
        self.ignore_jids.iter().any(|pattern| {
            if pattern.starts_with('@') {
                jid.ends_with(pattern.as_str())
            } else {
                pattern == jid
            }
        })
    }

    /// Copy safe to return from the API.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.token.is_empty() {
            copy.token = REDACTED_TOKEN.into();
        }
        copy
    }

    /// True when the token is the placeholder handed out by [`Self::redacted`].
    pub fn has_redacted_token(&self) -> bool {
        self.token == REDACTED_TOKEN
    }
}

// ============================================================================
// REST resources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Inbox {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub channel_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Contact {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(default)]
    pub inbox_id: Option<i64>,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_status() -> String {
    "open".into()
}

impl Conversation {
    pub fn is_resolved(&self) -> bool {
        self.status == "resolved"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatwootMessage {
    pub id: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewContact {
    pub inbox_id: i64,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    pub identifier: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Incoming,
    Outgoing,
}

impl MessageType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

/// File attached to a new message (sent as multipart).
#[derive(Clone)]
pub struct Attachment {
    pub file_name: String,
    pub mimetype: String,
    pub data: Vec<u8>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("file_name", &self.file_name)
            .field("mimetype", &self.mimetype)
            .field("bytes", &self.data.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub content: Option<String>,
    pub message_type: MessageType,
    pub source_id: Option<String>,
    pub private: bool,
    pub attachment: Option<Attachment>,
}

impl NewMessage {
    pub fn incoming(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            message_type: MessageType::Incoming,
            source_id: None,
            private: false,
            attachment: None,
        }
    }
}

// ============================================================================
// Webhook payloads
// ============================================================================

/// Body of a Chatwoot webhook (`message_created`, `conversation_status_changed`, ...).
///
/// Only the fields the bridge reads are modelled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookPayload {
    pub event: String,
    /// Message id for message events, conversation id for conversation events
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub sender: Option<WebhookSender>,
    #[serde(default)]
    pub conversation: Option<WebhookConversation>,
    #[serde(default)]
    pub meta: Option<WebhookMeta>,
    #[serde(default)]
    pub attachments: Vec<WebhookAttachment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookSender {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub available_name: Option<String>,
}

impl WebhookSender {
    pub fn display_name(&self) -> Option<&str> {
        self.available_name
            .as_deref()
            .or(self.name.as_deref())
            .filter(|n| !n.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookConversation {
    pub id: i64,
    #[serde(default)]
    pub meta: Option<WebhookMeta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookMeta {
    #[serde(default)]
    pub sender: Option<WebhookContact>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebhookContact {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookAttachment {
    pub data_url: String,
    /// `image`, `audio`, `video`, `file`
    #[serde(default)]
    pub file_type: Option<String>,
}

impl WebhookPayload {
    pub fn is_outgoing_message(&self) -> bool {
        self.event == "message_created"
            && self.message_type.as_deref() == Some("outgoing")
            && !self.private
    }

    /// Messages the bridge itself posted carry a `WAID:` source id.
    pub fn originates_from_whatsapp(&self) -> bool {
        self.source_id
            .as_deref()
            .is_some_and(|s| s.starts_with("WAID:"))
    }

    /// The WhatsApp contact of the conversation this payload belongs to.
    pub fn contact(&self) -> Option<&WebhookContact> {
        self.conversation
            .as_ref()
            .and_then(|c| c.meta.as_ref())
            .or(self.meta.as_ref())
            .and_then(|m| m.sender.as_ref())
    }

    pub fn conversation_id(&self) -> Option<i64> {
        match self.event.as_str() {
            "conversation_status_changed" | "conversation_updated" => self.id,
            _ => self.conversation.as_ref().map(|c| c.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn enabled() -> ChatwootSettings {
        ChatwootSettings {
            enabled: true,
            url: "https://chat.example.com".into(),
            account_id: 1,
            token: "tok".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_settings_defaults() {
        let settings: ChatwootSettings = serde_json::from_value(json!({})).unwrap();
        assert!(!settings.enabled);
        assert!(settings.merge_brazil_contacts);
        assert!(settings.auto_create);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_settings_validation() {
        assert!(enabled().validate().is_ok());

        let mut bad = enabled();
        bad.url = "ftp://chat".into();
        bad.token = " ".into();
        let err = bad.validate().unwrap_err().to_string();
        assert!(err.contains("url"));
        assert!(err.contains("token"));
    }

    #[test]
    fn test_ignores() {
        let settings = ChatwootSettings {
            ignore_jids: vec!["@g.us".into(), "5511999998888@s.whatsapp.net".into()],
            ..enabled()
        };
        assert!(settings.ignores("123-456@g.us"));
        assert!(settings.ignores("5511999998888@s.whatsapp.net"));
        assert!(!settings.ignores("5511777776666@s.whatsapp.net"));
    }

    #[test]
    fn test_redacted_hides_token() {
        assert_eq!(enabled().redacted().token, "********");
        assert!(enabled().redacted().has_redacted_token());
        assert!(!enabled().has_redacted_token());
        assert_eq!(enabled().redacted().url, "https://chat.example.com");
    }

    #[test]
    fn test_webhook_payload_parsing() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "event": "message_created",
            "id": 77,
            "message_type": "outgoing",
            "private": false,
            "content": "Hello",
            "sender": { "name": "Agent", "available_name": "Ana" },
            "conversation": {
                "id": 12,
                "meta": { "sender": { "identifier": "5511999998888@s.whatsapp.net", "phone_number": "+5511999998888" } }
            },
            "attachments": [{ "data_url": "https://files.test/a.png", "file_type": "image" }]
        }))
        .unwrap();

        assert!(payload.is_outgoing_message());
        assert!(!payload.originates_from_whatsapp());
        assert_eq!(payload.conversation_id(), Some(12));
        assert_eq!(payload.sender.unwrap().display_name(), Some("Ana"));
        assert_eq!(payload.attachments.len(), 1);
    }

    #[test]
    fn test_status_change_uses_top_level_id() {
        let payload: WebhookPayload = serde_json::from_value(json!({
            "event": "conversation_status_changed",
            "id": 12,
            "status": "resolved"
        }))
        .unwrap();
        assert_eq!(payload.conversation_id(), Some(12));
        assert!(!payload.is_outgoing_message());
    }
}
