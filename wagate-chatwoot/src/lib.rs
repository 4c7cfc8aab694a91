//! wagate Chatwoot - CRM bridge for WhatsApp sessions.
//!
//! ```text
//! WhatsApp ─► SessionEvent::MessageReceived ─► ChatwootBridge ─► Chatwoot inbox
//!                                                   ▲                 │
//! WhatsApp ◄─ SessionManager::send_message ◄────────┴── webhook ◄─────┘
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod bridge;
pub mod client;
pub mod format;
pub mod reconcile;
pub mod types;

pub use bridge::{ChatwootBridge, WebhookOutcome};
pub use client::{ChatwootClient, ChatwootError, ChatwootResult};
pub use reconcile::{phone_variants, pick_contact, ContactChoice};
pub use types::{
    Attachment, ChatwootSettings, Contact, Conversation, Inbox, MessageType, NewContact,
    NewMessage, WebhookPayload,
};
