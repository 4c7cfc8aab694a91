//! Chatwoot bridge.
//!
//! Handles both directions for every session with Chatwoot enabled:
//! 1. WhatsApp → Chatwoot: `MessageReceived` events become messages in the
//!    contact's conversation (contact and conversation created on demand)
//! 2. Chatwoot → WhatsApp: agent replies from the inbox webhook are sent
//!    through the session manager
//!
//! Ids of messages the bridge sends are remembered so their WhatsApp echo is
//! not posted back into Chatwoot.

use crate::client::{ChatwootClient, ChatwootError};
use crate::format;
use crate::reconcile::{self, ContactChoice};
use crate::types::{
    Attachment, ChatwootSettings, Contact, Conversation, MessageType, NewContact, NewMessage,
    WebhookPayload,
};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use wagate_common::{jid, Error, Result};
use wagate_sessions::{
    IncomingMedia, IncomingMessage, MediaKind, MediaSource, OutgoingMessage, SessionEvent,
    SessionManager,
};

// ============================================================================
// Provider
// ============================================================================

/// A session's live Chatwoot connection.
struct Provider {
    settings: ChatwootSettings,
    client: ChatwootClient,
    inbox_id: i64,
}

/// What a webhook call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    Ignored,
    /// Number of WhatsApp messages sent.
    Sent(usize),
    ConversationClosed,
}

// ============================================================================
// Sent-id cache
// ============================================================================

/// Bounded FIFO set of `{session}:{message id}` keys.
struct SentIds {
    capacity: usize,
    inner: Mutex<(VecDeque<String>, HashSet<String>)>,
}

impl SentIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new((VecDeque::new(), HashSet::new())),
        }
    }

    async fn insert(&self, key: String) {
        let mut guard = self.inner.lock().await;
        let (order, set) = &mut *guard;
        if set.insert(key.clone()) {
            order.push_back(key);
        }
        while order.len() > self.capacity {
            if let Some(old) = order.pop_front() {
                set.remove(&old);
            }
        }
    }

    /// True (and forgets the key) if it was recorded.
    async fn take(&self, key: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let (order, set) = &mut *guard;
        if set.remove(key) {
            order.retain(|k| k != key);
            true
        } else {
            false
        }
    }
}

fn cache_key(session_id: &str, id: &str) -> String {
    format!("{session_id}:{id}")
}

// ============================================================================
// Bridge
// ============================================================================

pub struct ChatwootBridge {
    manager: SessionManager,
    /// Externally reachable base URL, used for inbox webhooks.
    public_url: String,
    providers: DashMap<String, Arc<Provider>>,
    /// `{session}:{chat jid}` → conversation id
    conversations: DashMap<String, i64>,
    conversation_locks: DashMap<String, Arc<Mutex<()>>>,
    sent: SentIds,
}

impl ChatwootBridge {
    pub fn new(manager: SessionManager, public_url: impl Into<String>, message_cache_size: usize) -> Self {
        Self {
            manager,
            public_url: public_url.into().trim_end_matches('/').to_string(),
            providers: DashMap::new(),
            conversations: DashMap::new(),
            conversation_locks: DashMap::new(),
            sent: SentIds::new(message_cache_size),
        }
    }

    /// Webhook URL Chatwoot should call for a session's inbox.
    pub fn webhook_url(&self, session_id: &str) -> String {
        format!("{}/chatwoot/webhook/{session_id}", self.public_url)
    }

    /// Stored settings of a session (defaults when never configured).
    pub async fn settings(&self, session_id: &str) -> Result<ChatwootSettings> {
        let record = self.manager.record(session_id).await?;
        match record.chatwoot {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                Error::Internal(format!("stored chatwoot settings are unreadable: {e}"))
            }),
            None => Ok(ChatwootSettings::default()),
        }
    }

    /// Validate and store settings; when enabled, make sure the inbox exists.
    ///
    /// A redacted token (as returned by a read) keeps the stored one.
    pub async fn configure(
        &self,
        session_id: &str,
        mut settings: ChatwootSettings,
    ) -> Result<ChatwootSettings> {
        if settings.has_redacted_token() {
            settings.token = self.settings(session_id).await?.token;
        }
        settings.validate()?;
        // 404 before touching Chatwoot.
        self.manager.record(session_id).await?;

        let provider = if settings.enabled {
            Some(self.connect(session_id, settings.clone()).await?)
        } else {
            None
        };

        let value = serde_json::to_value(&settings)?;
        self.manager.set_chatwoot(session_id, Some(value)).await?;

        self.forget_session(session_id);
        if let Some(provider) = provider {
            tracing::info!(
                session = %session_id,
                inbox_id = provider.inbox_id,
                "Chatwoot enabled"
            );
            self.providers.insert(session_id.to_string(), provider);
        } else {
            tracing::info!(session = %session_id, "Chatwoot disabled");
        }
        Ok(settings)
    }

    /// Drop cached state of a session (settings changed or session deleted).
    pub fn forget_session(&self, session_id: &str) {
        let prefix = format!("{session_id}:");
        self.providers.remove(session_id);
        self.conversations.retain(|k, _| !k.starts_with(&prefix));
        self.conversation_locks.retain(|k, _| !k.starts_with(&prefix));
    }

    async fn connect(&self, session_id: &str, settings: ChatwootSettings) -> Result<Arc<Provider>> {
        let client = ChatwootClient::new(&settings.url, settings.account_id, &settings.token);
        let inbox_id = self.ensure_inbox(session_id, &settings, &client).await?;
        Ok(Arc::new(Provider {
            settings,
            client,
            inbox_id,
        }))
    }

    /// Find the inbox by name, creating an API inbox when allowed.
    async fn ensure_inbox(
        &self,
        session_id: &str,
        settings: &ChatwootSettings,
        client: &ChatwootClient,
    ) -> Result<i64> {
        let name = settings.inbox_name(session_id);
        let inboxes = client.list_inboxes().await?;
        if let Some(inbox) = inboxes.into_iter().find(|i| i.name == name) {
            return Ok(inbox.id);
        }
        if !settings.auto_create {
            return Err(Error::NotFound(format!("chatwoot inbox '{name}' not found")));
        }
        let inbox = client
            .create_inbox(name, &self.webhook_url(session_id))
            .await?;
        Ok(inbox.id)
    }

    /// The enabled provider of a session, loaded from its record on first use.
    async fn provider(&self, session_id: &str) -> Result<Option<Arc<Provider>>> {
        if let Some(provider) = self.providers.get(session_id).map(|p| p.clone()) {
            return Ok(Some(provider));
        }
        let settings = self.settings(session_id).await?;
        if !settings.enabled {
            return Ok(None);
        }
        let provider = self.connect(session_id, settings).await?;
        self.providers
            .insert(session_id.to_string(), provider.clone());
        Ok(Some(provider))
    }

    async fn require_provider(&self, session_id: &str) -> Result<Arc<Provider>> {
        self.provider(session_id).await?.ok_or_else(|| {
            Error::InvalidInput(format!("chatwoot is not enabled for session '{session_id}'"))
        })
    }

    // ------------------------------------------------------------------------
    // Contacts and conversations
    // ------------------------------------------------------------------------

    /// Find the Chatwoot contact of a chat, creating it when missing.
    pub async fn find_or_create_contact(
        &self,
        session_id: &str,
        chat: &str,
        push_name: Option<&str>,
    ) -> Result<Contact> {
        let provider = self.require_provider(session_id).await?;
        self.contact_for(session_id, &provider, chat, push_name).await
    }

    async fn contact_for(
        &self,
        session_id: &str,
        provider: &Provider,
        chat: &str,
        push_name: Option<&str>,
    ) -> Result<Contact> {
        let client = &provider.client;

        if jid::is_group(chat) {
            let name = self.group_name(session_id, chat).await;
            return self.contact_by_identifier(provider, chat, name).await;
        }

        // Privacy-addressed chats (`@lid`) carry no phone number.
        let Some(phone) = jid::phone_of(chat) else {
            let name = push_name
                .filter(|n| !n.trim().is_empty())
                .map_or_else(|| jid::user_part(chat).to_string(), str::to_string);
            return self.contact_by_identifier(provider, chat, name).await;
        };
        let variants = reconcile::phone_variants(&phone);
        let candidates = client.filter_contacts_by_phone(&variants).await?;

        match reconcile::pick_contact(&phone, &candidates, provider.settings.merge_brazil_contacts) {
            Some(ContactChoice::Merge { base, mergee }) => {
                tracing::info!(base = base.id, mergee = mergee.id, "Merging Brazilian twin contacts");
                client.merge_contacts(base.id, mergee.id).await?;
                Ok(base)
            }
            Some(ContactChoice::Existing(contact)) => {
                self.refresh_name(provider, &contact, &phone, push_name).await;
                Ok(contact)
            }
            None => {
                let name = push_name
                    .filter(|n| !n.trim().is_empty())
                    .map_or_else(|| phone.clone(), str::to_string);
                let contact = client
                    .create_contact(&NewContact {
                        inbox_id: provider.inbox_id,
                        name,
                        phone_number: Some(phone),
                        identifier: chat.to_string(),
                    })
                    .await?;
                Ok(contact)
            }
        }
    }

    /// Contact keyed only by its JID identifier, created when missing.
    async fn contact_by_identifier(
        &self,
        provider: &Provider,
        chat: &str,
        name: String,
    ) -> Result<Contact> {
        let existing = provider
            .client
            .search_contacts(chat)
            .await?
            .into_iter()
            .find(|c| c.identifier.as_deref() == Some(chat));
        if let Some(contact) = existing {
            return Ok(contact);
        }
        let contact = provider
            .client
            .create_contact(&NewContact {
                inbox_id: provider.inbox_id,
                name,
                phone_number: None,
                identifier: chat.to_string(),
            })
            .await?;
        Ok(contact)
    }

    /// Replace a number-only contact name with the WhatsApp push name.
    async fn refresh_name(
        &self,
        provider: &Provider,
        contact: &Contact,
        phone: &str,
        push_name: Option<&str>,
    ) {
        let Some(push_name) = push_name.filter(|n| !n.trim().is_empty()) else {
            return;
        };
        let unnamed = match contact.name.as_deref() {
            None => true,
            Some(name) => name.trim_start_matches('+') == phone.trim_start_matches('+'),
        };
        if unnamed && contact.name.as_deref() != Some(push_name) {
            if let Err(e) = provider.client.update_contact(contact.id, push_name).await {
                tracing::warn!(contact = contact.id, error = %e, "Failed to update contact name");
            }
        }
    }

    async fn group_name(&self, session_id: &str, chat: &str) -> String {
        let subject = match self.manager.socket(session_id).await {
            Ok(socket) => socket
                .group_metadata(chat)
                .await
                .ok()
                .map(|g| g.subject)
                .filter(|s| !s.is_empty()),
            Err(_) => None,
        };
        format!(
            "{} (GROUP)",
            subject.unwrap_or_else(|| jid::user_part(chat).to_string())
        )
    }

    /// Conversation id for a chat in the session's inbox.
    ///
    /// Concurrent callers for the same chat wait for each other, so only one
    /// conversation is ever created.
    pub async fn get_or_create_conversation(
        &self,
        session_id: &str,
        chat: &str,
        push_name: Option<&str>,
    ) -> Result<i64> {
        let provider = self.require_provider(session_id).await?;
        self.conversation_for(session_id, &provider, chat, push_name)
            .await
    }

    async fn conversation_for(
        &self,
        session_id: &str,
        provider: &Provider,
        chat: &str,
        push_name: Option<&str>,
    ) -> Result<i64> {
        let key = cache_key(session_id, chat);
        if let Some(id) = self.conversations.get(&key).map(|e| *e) {
            return Ok(id);
        }

        let lock = self
            .conversation_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;
        if let Some(id) = self.conversations.get(&key).map(|e| *e) {
            return Ok(id);
        }

        let contact = self
            .contact_for(session_id, provider, chat, push_name)
            .await?;
        let id = self.open_conversation(provider, &contact).await?;

        self.conversations.insert(key.clone(), id);
        self.conversation_locks.remove(&key);
        Ok(id)
    }

    async fn open_conversation(&self, provider: &Provider, contact: &Contact) -> Result<i64> {
        let client = &provider.client;
        let settings = &provider.settings;

        let mut conversations: Vec<Conversation> = client
            .contact_conversations(contact.id)
            .await?
            .into_iter()
            .filter(|c| c.inbox_id.map_or(true, |id| id == provider.inbox_id))
            .collect();
        conversations.sort_by_key(|c| std::cmp::Reverse(c.id));

        if let Some(open) = conversations.iter().find(|c| !c.is_resolved()) {
            return Ok(open.id);
        }

        if settings.reopen_conversation {
            if let Some(latest) = conversations.first() {
                let status = if settings.conversation_pending {
                    "pending"
                } else {
                    "open"
                };
                client.toggle_status(latest.id, status).await?;
                tracing::debug!(conversation = latest.id, status, "Reopened conversation");
                return Ok(latest.id);
            }
        }

        let created = client
            .create_conversation(contact.id, provider.inbox_id, settings.conversation_pending)
            .await?;
        tracing::debug!(conversation = created.id, contact = contact.id, "Created conversation");
        Ok(created.id)
    }

    // ------------------------------------------------------------------------
    // WhatsApp → Chatwoot
    // ------------------------------------------------------------------------

    /// Post a WhatsApp message into its Chatwoot conversation.
    pub async fn forward_incoming(&self, session_id: &str, message: &IncomingMessage) -> Result<()> {
        let Some(provider) = self.provider(session_id).await? else {
            return Ok(());
        };

        let chat = message.chat.as_str();
        if jid::is_status_broadcast(chat)
            || jid::is_broadcast(chat)
            || jid::is_newsletter(chat)
            || provider.settings.ignores(chat)
        {
            tracing::debug!(chat = %chat, "Chat not forwarded to Chatwoot");
            return Ok(());
        }
        if self.sent.take(&cache_key(session_id, &message.id)).await {
            tracing::debug!(message_id = %message.id, "Skipping echo of an agent reply");
            return Ok(());
        }

        let push_name = if message.from_me || message.is_group {
            None
        } else {
            message.push_name.as_deref()
        };
        let conversation = self
            .conversation_for(session_id, &provider, chat, push_name)
            .await?;

        let mut content = message
            .text
            .as_deref()
            .map(format::to_chatwoot)
            .unwrap_or_default();
        if message.is_group && !message.from_me {
            let who = jid::phone_of(&message.sender)
                .unwrap_or_else(|| jid::user_part(&message.sender).to_string());
            let header = match message.push_name.as_deref() {
                Some(name) => format!("**{who} - {name}:**"),
                None => format!("**{who}:**"),
            };
            content = if content.is_empty() {
                header
            } else {
                format!("{header}\n\n{content}")
            };
        }

        let attachment = message
            .media
            .as_ref()
            .and_then(|media| attachment_of(&message.id, media));
        if attachment.is_none() && content.is_empty() {
            match message.media.as_ref() {
                Some(media) => content = format!("[{}]", media.kind.as_str()),
                None => return Ok(()),
            }
        }

        let new_message = NewMessage {
            content: (!content.is_empty()).then_some(content),
            message_type: if message.from_me {
                MessageType::Outgoing
            } else {
                MessageType::Incoming
            },
            source_id: Some(format!("WAID:{}", message.id)),
            private: false,
            attachment,
        };

        match provider.client.create_message(conversation, new_message).await {
            Ok(posted) => {
                tracing::debug!(conversation, chatwoot_message = posted.id, "Forwarded to Chatwoot");
                Ok(())
            }
            Err(ChatwootError::Api { status: 404, body }) => {
                // Conversation deleted on the Chatwoot side; the next message
                // starts a new one.
                self.conversations.remove(&cache_key(session_id, chat));
                Err(Error::External(format!("chatwoot conversation {conversation} gone: {body}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    // ------------------------------------------------------------------------
    // Chatwoot → WhatsApp
    // ------------------------------------------------------------------------

    /// Act on a Chatwoot webhook for a session's inbox.
    pub async fn handle_webhook(
        &self,
        session_id: &str,
        payload: WebhookPayload,
    ) -> Result<WebhookOutcome> {
        let Some(provider) = self.provider(session_id).await? else {
            tracing::debug!(session = %session_id, "Webhook for a session without Chatwoot");
            return Ok(WebhookOutcome::Ignored);
        };

        if payload.event == "conversation_status_changed"
            && payload.status.as_deref() == Some("resolved")
        {
            if let Some(conversation) = payload.conversation_id() {
                let prefix = format!("{session_id}:");
                self.conversations
                    .retain(|k, v| !(k.starts_with(&prefix) && *v == conversation));
                return Ok(WebhookOutcome::ConversationClosed);
            }
            return Ok(WebhookOutcome::Ignored);
        }

        if !payload.is_outgoing_message() || payload.originates_from_whatsapp() {
            return Ok(WebhookOutcome::Ignored);
        }

        let contact = payload
            .contact()
            .ok_or_else(|| Error::InvalidInput("webhook carries no conversation contact".into()))?;
        let raw_to = contact
            .identifier
            .as_deref()
            .filter(|i| i.contains('@'))
            .or(contact.phone_number.as_deref())
            .ok_or_else(|| Error::InvalidInput("conversation contact has no WhatsApp address".into()))?;
        let to = jid::normalize_recipient(raw_to)?;

        let mut text = payload
            .content
            .as_deref()
            .map(format::to_whatsapp)
            .filter(|t| !t.trim().is_empty());
        if provider.settings.sign_msg {
            if let Some(agent) = payload.sender.as_ref().and_then(|s| s.display_name()) {
                text = Some(match text {
                    Some(body) => format!("*{agent}:*\n{body}"),
                    None => format!("*{agent}:*"),
                });
            }
        }

        let mut outgoing = Vec::new();
        for attachment in &payload.attachments {
            let kind = match attachment.file_type.as_deref() {
                Some("image") => MediaKind::Image,
                Some("video") => MediaKind::Video,
                Some("audio") => MediaKind::Audio,
                _ => MediaKind::Document,
            };
            let caption = if kind == MediaKind::Audio {
                None
            } else {
                text.take()
            };
            outgoing.push(OutgoingMessage::Media {
                kind,
                source: MediaSource::Url(attachment.data_url.clone()),
                caption,
                file_name: file_name_of(&attachment.data_url),
                mimetype: None,
            });
        }
        if let Some(text) = text {
            outgoing.push(OutgoingMessage::Text { text });
        }

        let mut sent = 0;
        for message in outgoing {
            let result = self.manager.send_message(session_id, &to, message).await?;
            self.sent.insert(cache_key(session_id, &result.id)).await;
            sent += 1;
        }
        tracing::info!(session = %session_id, to = %to, sent, "Agent reply delivered");
        Ok(WebhookOutcome::Sent(sent))
    }

    // ------------------------------------------------------------------------
    // Event processing
    // ------------------------------------------------------------------------

    /// Forward received messages until the event channel closes.
    pub fn spawn_processor(
        bridge: Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("Chatwoot bridge processor started");

            loop {
                match events.recv().await {
                    Ok(SessionEvent::MessageReceived {
                        session_id,
                        message,
                    }) => {
                        // Inline so messages of one chat keep their order.
                        if let Err(e) = bridge.forward_incoming(&session_id, &message).await {
                            tracing::warn!(
                                session = %session_id,
                                message_id = %message.id,
                                error = %e,
                                "Failed to forward message to Chatwoot"
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Chatwoot bridge lagging; events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            tracing::info!("Chatwoot bridge processor stopped");
        })
    }
}

fn attachment_of(message_id: &str, media: &IncomingMedia) -> Option<Attachment> {
    let data = media.data.as_ref()?;
    let mimetype = media
        .mimetype
        .clone()
        .unwrap_or_else(|| media.kind.default_mimetype().to_string());
    let file_name = media.file_name.clone().unwrap_or_else(|| {
        let ext = mimetype
            .split('/')
            .nth(1)
            .and_then(|sub| sub.split(';').next())
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or("bin");
        format!("{message_id}.{ext}")
    });
    Some(Attachment {
        file_name,
        mimetype,
        data: data.clone(),
    })
}

fn file_name_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()?
        .path_segments()?
        .last()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
