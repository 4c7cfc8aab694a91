//! wagate Sessions - WhatsApp session lifecycle.
//!
//! One [`SessionManager`] owns every session in the process. Each session has
//! a supervisor task that opens a [`Socket`] through the configured
//! [`SocketFactory`], follows pairing and connection events, and applies the
//! [`ReconnectPolicy`] when the connection drops.
//!
//! ```text
//! REST API ──► SessionManager ──► supervisor task ──► Socket (whatsapp-rust)
//!                   │                    │
//!                   ▼                    ▼
//!               wagate-store      SessionEvent broadcast ──► webhooks, Chatwoot
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod events;
pub mod manager;
pub mod message;
pub mod qr;
pub mod reconnect;
pub mod socket;
pub mod whatsapp_web;

pub use events::{SessionEvent, SessionStatus};
pub use manager::{ManagerOptions, QrSnapshot, SessionInfo, SessionManager};
pub use message::{
    IncomingMedia, IncomingMessage, MediaKind, MediaSource, OutgoingMessage, SentMessage,
};
pub use qr::{render_svg, render_text, QrFormat};
pub use reconnect::{ReconnectAction, ReconnectPolicy};
pub use socket::{
    ChatPresence, DisconnectReason, GroupInfo, GroupParticipant, ParticipantAction,
    ParticipantResult, Socket, SocketError, SocketEvent, SocketFactory, SocketResult,
};
pub use whatsapp_web::WhatsAppWebFactory;
