//! Chatwoot REST client (application API, account scope).

use crate::types::{
    ChatwootMessage, Contact, Conversation, Inbox, NewContact, NewMessage,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Chatwoot client errors.
#[derive(Debug, thiserror::Error)]
pub enum ChatwootError {
    #[error("Chatwoot request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Chatwoot returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Unexpected Chatwoot response: {0}")]
    Decode(String),
}

impl From<ChatwootError> for wagate_common::Error {
    fn from(err: ChatwootError) -> Self {
        wagate_common::Error::External(err.to_string())
    }
}

pub type ChatwootResult<T> = std::result::Result<T, ChatwootError>;

/// List endpoints wrap their items in `payload`.
#[derive(Deserialize)]
struct Payload<T> {
    payload: T,
}

pub struct ChatwootClient {
    client: reqwest::Client,
    base_url: String,
    account_id: i64,
    token: String,
}

impl ChatwootClient {
    pub fn new(base_url: impl Into<String>, account_id: i64, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            account_id,
            token: token.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/accounts/{}/{}",
            self.base_url, self.account_id, path
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("api_access_token", &self.token)
    }

    async fn send_raw(&self, request: RequestBuilder) -> ChatwootResult<reqwest::Response> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatwootError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> ChatwootResult<T> {
        let response = self.send_raw(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ChatwootError::Decode(e.to_string()))
    }

    // ------------------------------------------------------------------------
    // Inboxes
    // ------------------------------------------------------------------------

    pub async fn list_inboxes(&self) -> ChatwootResult<Vec<Inbox>> {
        let page: Payload<Vec<Inbox>> = self.send(self.request(Method::GET, "inboxes")).await?;
        Ok(page.payload)
    }

    /// Create an API-channel inbox whose webhook points back at us.
    pub async fn create_inbox(&self, name: &str, webhook_url: &str) -> ChatwootResult<Inbox> {
        let body = json!({
            "name": name,
            "channel": { "type": "api", "webhook_url": webhook_url },
        });
        tracing::info!(inbox = %name, webhook = %webhook_url, "Creating Chatwoot inbox");
        self.send(self.request(Method::POST, "inboxes").json(&body))
            .await
    }

    // ------------------------------------------------------------------------
    // Contacts
    // ------------------------------------------------------------------------

    pub async fn search_contacts(&self, query: &str) -> ChatwootResult<Vec<Contact>> {
        let request = self
            .request(Method::GET, "contacts/search")
            .query(&[("q", query)]);
        let page: Payload<Vec<Contact>> = self.send(request).await?;
        Ok(page.payload)
    }

    /// Contacts whose phone number equals any of `numbers`.
    pub async fn filter_contacts_by_phone(&self, numbers: &[String]) -> ChatwootResult<Vec<Contact>> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }
        let last = numbers.len() - 1;
        let filters: Vec<Value> = numbers
            .iter()
            .enumerate()
            .map(|(i, number)| {
                json!({
                    "attribute_key": "phone_number",
                    "filter_operator": "equal_to",
                    "values": [number.trim_start_matches('+')],
                    "query_operator": if i == last { Value::Null } else { json!("OR") },
                })
            })
            .collect();
        let request = self
            .request(Method::POST, "contacts/filter")
            .json(&json!({ "payload": filters }));
        let page: Payload<Vec<Contact>> = self.send(request).await?;
        Ok(page.payload)
    }

    pub async fn create_contact(&self, contact: &NewContact) -> ChatwootResult<Contact> {
        let value: Payload<Value> = self
            .send(self.request(Method::POST, "contacts").json(contact))
            .await?;
        // Newer versions nest the contact next to its contact_inbox.
        let inner = match value.payload.get("contact") {
            Some(contact) => contact.clone(),
            None => value.payload,
        };
        serde_json::from_value(inner).map_err(|e| ChatwootError::Decode(e.to_string()))
    }

    pub async fn update_contact(&self, id: i64, name: &str) -> ChatwootResult<()> {
        self.send_raw(
            self.request(Method::PUT, &format!("contacts/{id}"))
                .json(&json!({ "name": name })),
        )
        .await?;
        Ok(())
    }

    /// Fold `mergee` into `base`; the mergee contact is deleted by Chatwoot.
    pub async fn merge_contacts(&self, base: i64, mergee: i64) -> ChatwootResult<()> {
        self.send_raw(
            self.request(Method::POST, "actions/contact_merge")
                .json(&json!({ "base_contact_id": base, "mergee_contact_id": mergee })),
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Conversations
    // ------------------------------------------------------------------------

    pub async fn contact_conversations(&self, contact_id: i64) -> ChatwootResult<Vec<Conversation>> {
        let page: Payload<Vec<Conversation>> = self
            .send(self.request(Method::GET, &format!("contacts/{contact_id}/conversations")))
            .await?;
        Ok(page.payload)
    }

    pub async fn create_conversation(
        &self,
        contact_id: i64,
        inbox_id: i64,
        pending: bool,
    ) -> ChatwootResult<Conversation> {
        let mut body = json!({ "contact_id": contact_id, "inbox_id": inbox_id });
        if pending {
            body["status"] = json!("pending");
        }
        self.send(self.request(Method::POST, "conversations").json(&body))
            .await
    }

    pub async fn toggle_status(&self, conversation_id: i64, status: &str) -> ChatwootResult<()> {
        self.send_raw(
            self.request(
                Method::POST,
                &format!("conversations/{conversation_id}/toggle_status"),
            )
            .json(&json!({ "status": status })),
        )
        .await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    /// Post a message. Attachments go as multipart, everything else as JSON.
    pub async fn create_message(
        &self,
        conversation_id: i64,
        message: NewMessage,
    ) -> ChatwootResult<ChatwootMessage> {
        let path = format!("conversations/{conversation_id}/messages");

        let request = match message.attachment {
            Some(attachment) => {
                let part = Part::bytes(attachment.data)
                    .file_name(attachment.file_name)
                    .mime_str(&attachment.mimetype)?;
                let mut form = Form::new()
                    .text("message_type", message.message_type.as_str())
                    .text("private", message.private.to_string())
                    .part("attachments[]", part);
                if let Some(content) = message.content {
                    form = form.text("content", content);
                }
                if let Some(source_id) = message.source_id {
                    form = form.text("source_id", source_id);
                }
                self.request(Method::POST, &path).multipart(form)
            }
            None => {
                let mut body = json!({
                    "content": message.content.unwrap_or_default(),
                    "message_type": message.message_type,
                    "private": message.private,
                });
                if let Some(source_id) = message.source_id {
                    body["source_id"] = json!(source_id);
                }
                self.request(Method::POST, &path).json(&body)
            }
        };

        self.send(request).await
    }
}

impl std::fmt::Debug for ChatwootClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatwootClient")
            .field("base_url", &self.base_url)
            .field("account_id", &self.account_id)
            .finish()
    }
}
