//! WhatsApp Web driver backed by `whatsapp-rust`.
//!
//! Each session gets its own SQLite device database under the sessions data
//! directory (`{data_dir}/{session_id}.db`). The library owns that file; after
//! every successful connect we mirror it into the session's [`AuthState`]
//! (category `device`) so a session survives losing the local disk, and we
//! restore from the mirror when the file is missing at connect time.
//!
//! The protocol crates sit behind the `whatsapp-web` feature. Without it
//! [`WhatsAppWebFactory::connect`] fails with [`SocketError::Unsupported`].

use crate::socket::{SocketError, SocketEvent, SocketFactory, SocketResult, Socket};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use wagate_store::AuthState;

const SNAPSHOT_CATEGORY: &str = "device";
const SNAPSHOT_FILES: [(&str, &str); 2] = [("db", ""), ("db-wal", "-wal")];

/// Opens WhatsApp Web sockets, one device database per session.
#[derive(Debug, Clone)]
pub struct WhatsAppWebFactory {
    data_dir: PathBuf,
    device_name: String,
}

impl WhatsAppWebFactory {
    pub fn new(data_dir: impl Into<PathBuf>, device_name: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            device_name: device_name.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn db_path(&self, session_id: &str) -> PathBuf {
        self.data_dir.join(format!("{session_id}.db"))
    }

    fn db_file(&self, session_id: &str, suffix: &str) -> PathBuf {
        self.data_dir.join(format!("{session_id}.db{suffix}"))
    }

    /// Write the mirrored device database back to disk if it is missing.
    #[cfg_attr(not(feature = "whatsapp-web"), allow(dead_code))]
    async fn restore_snapshot(&self, session_id: &str, auth: &AuthState) -> SocketResult<()> {
        if tokio::fs::try_exists(self.db_path(session_id)).await? {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.data_dir).await?;
        for (key, suffix) in SNAPSHOT_FILES {
            let data = auth
                .get(SNAPSHOT_CATEGORY, key)
                .await
                .map_err(|e| SocketError::Protocol(format!("reading device snapshot: {e}")))?;
            if let Some(data) = data {
                tokio::fs::write(self.db_file(session_id, suffix), &data).await?;
                tracing::info!(bytes = data.len(), file = key, "Restored device snapshot");
            }
        }
        Ok(())
    }
}

/// Copy the on-disk device database into the auth store.
#[cfg_attr(not(feature = "whatsapp-web"), allow(dead_code))]
async fn save_snapshot(data_dir: &Path, auth: &AuthState) {
    let session_id = auth.session_id();
    for (key, suffix) in SNAPSHOT_FILES {
        let path = data_dir.join(format!("{session_id}.db{suffix}"));
        match tokio::fs::read(&path).await {
            Ok(data) => {
                if let Err(e) = auth.set(SNAPSHOT_CATEGORY, key, &data).await {
                    tracing::warn!(error = %e, file = key, "Failed to mirror device snapshot");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, path = %path.display(), "Failed to read device database"),
        }
    }
}

/// The account JID recorded at pairing time, if the session ever paired.
#[cfg_attr(not(feature = "whatsapp-web"), allow(dead_code))]
async fn registered_jid(auth: &AuthState) -> Option<String> {
    match auth.creds().await {
        Ok(creds) => creds.and_then(|c| c.me),
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable credentials");
            None
        }
    }
}

#[async_trait]
impl SocketFactory for WhatsAppWebFactory {
    fn name(&self) -> &str {
        "whatsapp-web"
    }

    #[cfg(feature = "whatsapp-web")]
    async fn connect(
        &self,
        session_id: &str,
        auth: AuthState,
        events: mpsc::Sender<SocketEvent>,
    ) -> SocketResult<Arc<dyn Socket>> {
        self.restore_snapshot(session_id, &auth).await?;
        let socket = driver::WebSocket::start(
            self.db_path(session_id),
            self.data_dir.clone(),
            &self.device_name,
            auth,
            events,
        )
        .await?;
        Ok(Arc::new(socket))
    }

    #[cfg(not(feature = "whatsapp-web"))]
    async fn connect(
        &self,
        _session_id: &str,
        _auth: AuthState,
        _events: mpsc::Sender<SocketEvent>,
    ) -> SocketResult<Arc<dyn Socket>> {
        Err(SocketError::Unsupported(
            "WhatsApp Web driver not compiled in; rebuild with `--features whatsapp-web`".into(),
        ))
    }

    async fn purge(&self, session_id: &str) -> SocketResult<()> {
        for suffix in ["", "-wal", "-shm"] {
            match tokio::fs::remove_file(self.db_file(session_id, suffix)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

#[cfg(feature = "whatsapp-web")]
mod driver {
    use super::{registered_jid, save_snapshot};
    use crate::message::{IncomingMedia, IncomingMessage, MediaKind, OutgoingMessage, SentMessage};
    use crate::socket::{
        ChatPresence, DisconnectReason, GroupInfo, GroupParticipant, ParticipantAction,
        ParticipantResult, Socket, SocketError, SocketEvent, SocketResult,
    };
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};
    use tokio::task::JoinHandle;
    use wacore::types::events::Event;
    use wacore_binary::attrs::AttrParser;
    use wacore_binary::builder::NodeBuilder;
    use wacore_binary::jid::Jid;
    use wacore_binary::node::{Node, NodeContent};
    use wagate_common::jid as wajid;
    use wagate_store::AuthState;
    use whatsapp_rust::bot::Bot;
    use whatsapp_rust::client::Client;
    use whatsapp_rust::download::MediaType;
    use whatsapp_rust::request::{InfoQuery, InfoQueryType};
    use whatsapp_rust::store::SqliteStore;
    use whatsapp_rust_tokio_transport::TokioWebSocketTransportFactory;
    use whatsapp_rust_ureq_http_client::UreqHttpClient;

    fn protocol(e: impl std::fmt::Display) -> SocketError {
        SocketError::Protocol(e.to_string())
    }

    fn media_type(kind: MediaKind) -> MediaType {
        match kind {
            MediaKind::Image => MediaType::Image,
            MediaKind::Video => MediaType::Video,
            MediaKind::Audio => MediaType::Audio,
            MediaKind::Document => MediaType::Document,
        }
    }

    fn parse_jid(raw: &str) -> SocketResult<Jid> {
        raw.parse()
            .map_err(|_| SocketError::InvalidJid(raw.to_string()))
    }

    const GROUPS_NAMESPACE: &str = "w:g2";
    const DEVICES_NAMESPACE: &str = "md";

    /// Asks the server to drop this companion from the phone's linked devices.
    pub(super) fn remove_device_node(me: &Jid) -> Node {
        NodeBuilder::new("remove-companion-device")
            .attr("jid", me.to_string())
            .attr("reason", "user_initiated")
            .build()
    }

    pub(super) struct WebSocket {
        client: Arc<Client>,
        run: Mutex<Option<JoinHandle<()>>>,
        paired_jid: Arc<Mutex<Option<String>>>,
        data_dir: PathBuf,
        auth: AuthState,
    }

    impl WebSocket {
        pub(super) async fn start(
            db_path: PathBuf,
            data_dir: PathBuf,
            device_name: &str,
            auth: AuthState,
            events: mpsc::Sender<SocketEvent>,
        ) -> SocketResult<Self> {
            let db_path = db_path.to_string_lossy().to_string();
            let backend = Arc::new(
                SqliteStore::new(&db_path)
                    .await
                    .map_err(|e| protocol(format!("device store init failed: {e}")))?,
            );

            // Own JID, learned at pairing time.
            let paired_jid: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
            let me = paired_jid.clone();
            let snapshot_dir = data_dir.clone();
            let snapshot_auth = auth.clone();

            let mut bot = Bot::builder()
                .with_backend(backend)
                .with_transport_factory(TokioWebSocketTransportFactory::new())
                .with_http_client(UreqHttpClient::new())
                .with_device_props(
                    Some(device_name.to_string()),
                    None,
                    Some(waproto::whatsapp::device_props::PlatformType::Desktop),
                )
                .on_event(move |event, client| {
                    let events = events.clone();
                    let paired_jid = paired_jid.clone();
                    let snapshot_dir = snapshot_dir.clone();
                    let snapshot_auth = snapshot_auth.clone();
                    async move {
                        let forwarded = match event {
                            Event::PairingQrCode { code, .. } => Some(SocketEvent::Qr(code)),
                            Event::PairSuccess(pair) => {
                                tracing::info!("Pairing confirmed by phone");
                                *paired_jid.lock().await = Some(pair.id.to_string());
                                None
                            }
                            Event::Connected(_) => {
                                save_snapshot(&snapshot_dir, &snapshot_auth).await;
                                let me = paired_jid.lock().await.clone();
                                Some(SocketEvent::Connected { me })
                            }
                            Event::Disconnected(_) => {
                                Some(SocketEvent::Disconnected(DisconnectReason::ConnectionLost))
                            }
                            Event::LoggedOut(_) => {
                                Some(SocketEvent::Disconnected(DisconnectReason::LoggedOut))
                            }
                            Event::StreamError(e) => {
                                tracing::warn!(error = ?e, "Stream error");
                                None
                            }
                            Event::Message(msg, info) => {
                                let incoming = IncomingMessage {
                                    id: info.id.clone(),
                                    chat: info.source.chat.to_string(),
                                    sender: info.source.sender.to_string(),
                                    from_me: info.source.is_from_me,
                                    is_group: info.source.is_group,
                                    push_name: Some(info.push_name.clone())
                                        .filter(|name| !name.is_empty()),
                                    text: None,
                                    media: None,
                                    timestamp: chrono::Utc::now().timestamp_millis(),
                                };
                                convert_incoming(&client, &msg, incoming)
                                    .await
                                    .map(SocketEvent::Message)
                            }
                            _ => None,
                        };
                        if let Some(event) = forwarded {
                            if events.send(event).await.is_err() {
                                tracing::debug!("Supervisor gone, dropping socket event");
                            }
                        }
                    }
                })
                .build()
                .await
                .map_err(|e| protocol(format!("bot build failed: {e}")))?;

            let client = bot.client();
            let handle = bot
                .run()
                .await
                .map_err(|e| protocol(format!("bot run failed: {e}")))?;

            Ok(Self {
                client,
                run: Mutex::new(Some(handle)),
                paired_jid: me,
                data_dir,
                auth,
            })
        }

        async fn stop(&self) -> bool {
            match self.run.lock().await.take() {
                Some(handle) => {
                    handle.abort();
                    true
                }
                None => false,
            }
        }

        async fn iq(&self, query_type: InfoQueryType, to: Jid, node: Node) -> SocketResult<Node> {
            self.query(GROUPS_NAMESPACE, query_type, to, node).await
        }

        async fn query(
            &self,
            namespace: &'static str,
            query_type: InfoQueryType,
            to: Jid,
            node: Node,
        ) -> SocketResult<Node> {
            let iq = InfoQuery {
                namespace,
                query_type,
                to,
                content: Some(NodeContent::Nodes(vec![node])),
                id: None,
                target: None,
                timeout: None,
            };
            self.client.send_iq(iq).await.map_err(protocol)
        }

        async fn unlink(&self) -> SocketResult<()> {
            let paired = self.paired_jid.lock().await.clone();
            let me = match paired {
                Some(me) => me,
                None => registered_jid(&self.auth)
                    .await
                    .ok_or(SocketError::NotConnected)?,
            };
            let node = remove_device_node(&parse_jid(&me)?);
            self.query(
                DEVICES_NAMESPACE,
                InfoQueryType::Set,
                parse_jid(wajid::USER_SERVER)?,
                node,
            )
            .await?;
            Ok(())
        }

        async fn build_message(&self, message: OutgoingMessage) -> SocketResult<waproto::whatsapp::Message> {
            use waproto::whatsapp::message as wa;

            let message = match message {
                OutgoingMessage::Text { text } => waproto::whatsapp::Message {
                    conversation: Some(text),
                    ..Default::default()
                },
                OutgoingMessage::Location {
                    latitude,
                    longitude,
                    name,
                    address,
                } => waproto::whatsapp::Message {
                    location_message: Some(Box::new(wa::LocationMessage {
                        degrees_latitude: Some(latitude),
                        degrees_longitude: Some(longitude),
                        name,
                        address,
                        ..Default::default()
                    })),
                    ..Default::default()
                },
                OutgoingMessage::Media {
                    kind,
                    source,
                    caption,
                    file_name,
                    mimetype,
                } => {
                    let data = source
                        .as_bytes()
                        .ok_or_else(|| SocketError::Unsupported("unresolved media source".into()))?
                        .to_vec();
                    let mimetype = Some(mimetype.unwrap_or_else(|| kind.default_mimetype().to_string()));
                    let up = self
                        .client
                        .upload(data, media_type(kind))
                        .await
                        .map_err(|e| protocol(format!("media upload failed: {e}")))?;
                    match kind {
                        MediaKind::Image => waproto::whatsapp::Message {
                            image_message: Some(Box::new(wa::ImageMessage {
                                mimetype,
                                caption,
                                url: Some(up.url),
                                direct_path: Some(up.direct_path),
                                media_key: Some(up.media_key),
                                file_enc_sha256: Some(up.file_enc_sha256),
                                file_sha256: Some(up.file_sha256),
                                file_length: Some(up.file_length),
                                ..Default::default()
                            })),
                            ..Default::default()
                        },
                        MediaKind::Video => waproto::whatsapp::Message {
                            video_message: Some(Box::new(wa::VideoMessage {
                                mimetype,
                                caption,
                                url: Some(up.url),
                                direct_path: Some(up.direct_path),
                                media_key: Some(up.media_key),
                                file_enc_sha256: Some(up.file_enc_sha256),
                                file_sha256: Some(up.file_sha256),
                                file_length: Some(up.file_length),
                                ..Default::default()
                            })),
                            ..Default::default()
                        },
                        MediaKind::Audio => waproto::whatsapp::Message {
                            audio_message: Some(Box::new(wa::AudioMessage {
                                mimetype,
                                url: Some(up.url),
                                direct_path: Some(up.direct_path),
                                media_key: Some(up.media_key),
                                file_enc_sha256: Some(up.file_enc_sha256),
                                file_sha256: Some(up.file_sha256),
                                file_length: Some(up.file_length),
                                ..Default::default()
                            })),
                            ..Default::default()
                        },
                        MediaKind::Document => waproto::whatsapp::Message {
                            document_message: Some(Box::new(wa::DocumentMessage {
                                mimetype,
                                caption,
                                title: file_name.clone(),
                                file_name,
                                url: Some(up.url),
                                direct_path: Some(up.direct_path),
                                media_key: Some(up.media_key),
                                file_enc_sha256: Some(up.file_enc_sha256),
                                file_sha256: Some(up.file_sha256),
                                file_length: Some(up.file_length),
                                ..Default::default()
                            })),
                            ..Default::default()
                        },
                    }
                }
            };
            Ok(message)
        }
    }

    /// Fill text and media from a protocol message. `None` for messages
    /// without content we forward (receipts, protocol messages, reactions).
    async fn convert_incoming(
        client: &Client,
        msg: &waproto::whatsapp::Message,
        mut incoming: IncomingMessage,
    ) -> Option<IncomingMessage> {
        let inner = msg
            .device_sent_message
            .as_ref()
            .and_then(|d| d.message.as_deref())
            .or_else(|| msg.ephemeral_message.as_ref().and_then(|e| e.message.as_deref()))
            .or_else(|| msg.view_once_message.as_ref().and_then(|v| v.message.as_deref()))
            .unwrap_or(msg);

        incoming.text = inner
            .conversation
            .clone()
            .or_else(|| inner.extended_text_message.as_ref().and_then(|e| e.text.clone()));

        if let Some(img) = inner.image_message.as_ref() {
            incoming.text = incoming.text.or_else(|| img.caption.clone());
            incoming.media = Some(IncomingMedia {
                kind: MediaKind::Image,
                mimetype: img.mimetype.clone(),
                file_name: None,
                data: downloaded(client.download(img.as_ref()).await),
            });
        } else if let Some(video) = inner.video_message.as_ref() {
            incoming.text = incoming.text.or_else(|| video.caption.clone());
            incoming.media = Some(IncomingMedia {
                kind: MediaKind::Video,
                mimetype: video.mimetype.clone(),
                file_name: None,
                data: downloaded(client.download(video.as_ref()).await),
            });
        } else if let Some(audio) = inner.audio_message.as_ref() {
            incoming.media = Some(IncomingMedia {
                kind: MediaKind::Audio,
                mimetype: audio.mimetype.clone(),
                file_name: None,
                data: downloaded(client.download(audio.as_ref()).await),
            });
        } else if let Some(doc) = inner.document_message.as_ref() {
            incoming.text = incoming.text.or_else(|| doc.caption.clone());
            incoming.media = Some(IncomingMedia {
                kind: MediaKind::Document,
                mimetype: doc.mimetype.clone(),
                file_name: doc.file_name.clone(),
                data: downloaded(client.download(doc.as_ref()).await),
            });
        }

        if incoming.text.is_none() && incoming.media.is_none() {
            return None;
        }
        Some(incoming)
    }

    fn downloaded<E: std::fmt::Display>(result: Result<Vec<u8>, E>) -> Option<Vec<u8>> {
        match result {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Media download failed");
                None
            }
        }
    }

    fn parse_group(node: &Node) -> GroupInfo {
        let mut attrs = AttrParser::new(node);
        let id = attrs.optional_string("id").unwrap_or_default().to_string();
        let jid = if id.contains('@') || id.is_empty() {
            id
        } else {
            format!("{id}@{}", wajid::GROUP_SERVER)
        };
        let subject = attrs.optional_string("subject").unwrap_or_default().to_string();
        let owner = attrs.optional_string("creator").map(str::to_string);
        let creation = attrs.optional_u64("creation").map(|c| c as i64);

        let participants = node
            .get_children_by_tag("participant")
            .into_iter()
            .map(|p| {
                let mut attrs = AttrParser::new(p);
                GroupParticipant {
                    jid: attrs.jid("jid").to_string(),
                    admin: attrs.optional_string("type").map(str::to_string),
                }
            })
            .collect();

        GroupInfo {
            jid,
            subject,
            owner,
            creation,
            description: None,
            participants,
        }
    }

    fn participant_nodes(participants: &[String]) -> SocketResult<Vec<Node>> {
        participants
            .iter()
            .map(|p| {
                let jid = parse_jid(p)?;
                Ok(NodeBuilder::new("participant").attr("jid", jid.to_string()).build())
            })
            .collect()
    }

    #[async_trait]
    impl Socket for WebSocket {
        async fn send_message(&self, to: &str, message: OutgoingMessage) -> SocketResult<SentMessage> {
            let jid = parse_jid(to)?;
            let message = self.build_message(message).await?;
            let id = self
                .client
                .send_message(jid, message)
                .await
                .map_err(|e| protocol(format!("send failed: {e}")))?;
            Ok(SentMessage::now(id, to))
        }

        async fn send_presence(&self, to: &str, presence: ChatPresence) -> SocketResult<()> {
            let jid = parse_jid(to)?;
            let chatstate = self.client.chatstate();
            match presence {
                ChatPresence::Composing => chatstate.send_composing(&jid).await.map_err(protocol),
                ChatPresence::Paused => chatstate.send_paused(&jid).await.map_err(protocol),
                other => Err(SocketError::Unsupported(format!("presence {other:?}"))),
            }
        }

        async fn group_create(&self, subject: &str, participants: &[String]) -> SocketResult<GroupInfo> {
            let server = parse_jid(wajid::GROUP_SERVER)?;
            let key = chrono::Utc::now().timestamp_millis().to_string();
            let create = NodeBuilder::new("create")
                .attr("subject", subject.to_string())
                .attr("key", key)
                .children(participant_nodes(participants)?)
                .build();
            let resp = self.iq(InfoQueryType::Set, server, create).await?;
            let group = resp
                .get_optional_child("group")
                .ok_or_else(|| protocol("<group> missing in create response"))?;
            Ok(parse_group(group))
        }

        async fn group_metadata(&self, jid: &str) -> SocketResult<GroupInfo> {
            let query = NodeBuilder::new("query").attr("request", "interactive").build();
            let resp = self.iq(InfoQueryType::Get, parse_jid(jid)?, query).await?;
            let group = resp
                .get_optional_child("group")
                .ok_or_else(|| protocol("<group> missing in group info response"))?;
            let mut info = parse_group(group);
            if info.jid.is_empty() {
                info.jid = jid.to_string();
            }
            Ok(info)
        }

        async fn group_participants_update(
            &self,
            jid: &str,
            participants: &[String],
            action: ParticipantAction,
        ) -> SocketResult<Vec<ParticipantResult>> {
            if participants.is_empty() {
                return Ok(Vec::new());
            }
            let node = NodeBuilder::new(action.as_str())
                .children(participant_nodes(participants)?)
                .build();
            let resp = self.iq(InfoQueryType::Set, parse_jid(jid)?, node).await?;

            let mut results = Vec::new();
            if let Some(section) = resp.get_optional_child(action.as_str()) {
                for p in section.get_children_by_tag("participant") {
                    let mut attrs = AttrParser::new(p);
                    let jid = attrs.jid("jid").to_string();
                    let status = attrs.optional_u64("error").map_or(200, |c| c as u16);
                    results.push(ParticipantResult { jid, status });
                }
            }
            Ok(results)
        }

        async fn group_invite_code(&self, jid: &str) -> SocketResult<String> {
            let node = NodeBuilder::new("invite").build();
            let resp = self.iq(InfoQueryType::Get, parse_jid(jid)?, node).await?;
            let invite = resp
                .get_optional_child("invite")
                .ok_or_else(|| protocol("<invite> missing in response"))?;
            AttrParser::new(invite)
                .optional_string("code")
                .map(str::to_string)
                .ok_or_else(|| SocketError::Rejected("no invite code (not an admin?)".into()))
        }

        async fn group_update_subject(&self, jid: &str, subject: &str) -> SocketResult<()> {
            let node = NodeBuilder::new("subject")
                .bytes(subject.as_bytes().to_vec())
                .build();
            self.iq(InfoQueryType::Set, parse_jid(jid)?, node).await?;
            Ok(())
        }

        async fn group_leave(&self, jid: &str) -> SocketResult<()> {
            let group = parse_jid(jid)?;
            let node = NodeBuilder::new("leave")
                .children(vec![NodeBuilder::new("group").attr("id", group.to_string()).build()])
                .build();
            self.iq(InfoQueryType::Set, parse_jid(wajid::GROUP_SERVER)?, node)
                .await?;
            Ok(())
        }

        async fn logout(&self) -> SocketResult<()> {
            match self.unlink().await {
                Ok(()) => tracing::info!("Companion device removed from the account"),
                Err(e) => tracing::warn!(error = %e, "Unlink request failed; dropping local state anyway"),
            }
            self.stop().await;
            Ok(())
        }

        async fn close(&self) -> SocketResult<()> {
            if self.stop().await {
                save_snapshot(&self.data_dir, &self.auth).await;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wagate_store::MemoryStore;

    fn auth(id: &str) -> AuthState {
        AuthState::new(Arc::new(MemoryStore::new()), id)
    }

    #[tokio::test]
    async fn test_restore_snapshot_writes_missing_db() {
        let dir = tempfile::tempdir().unwrap();
        let factory = WhatsAppWebFactory::new(dir.path(), "wagate");
        let auth = auth("s1");
        auth.set(SNAPSHOT_CATEGORY, "db", b"sqlite bytes").await.unwrap();

        factory.restore_snapshot("s1", &auth).await.unwrap();
        let written = tokio::fs::read(factory.db_path("s1")).await.unwrap();
        assert_eq!(written, b"sqlite bytes");
        assert!(!dir.path().join("s1.db-wal").exists());
    }

    #[tokio::test]
    async fn test_restore_snapshot_keeps_existing_db() {
        let dir = tempfile::tempdir().unwrap();
        let factory = WhatsAppWebFactory::new(dir.path(), "wagate");
        tokio::fs::write(factory.db_path("s1"), b"local").await.unwrap();
        let auth = auth("s1");
        auth.set(SNAPSHOT_CATEGORY, "db", b"mirror").await.unwrap();

        factory.restore_snapshot("s1", &auth).await.unwrap();
        assert_eq!(tokio::fs::read(factory.db_path("s1")).await.unwrap(), b"local");
    }

    #[tokio::test]
    async fn test_save_snapshot_mirrors_files() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("s1.db"), b"main").await.unwrap();
        tokio::fs::write(dir.path().join("s1.db-wal"), b"wal").await.unwrap();
        let auth = auth("s1");

        save_snapshot(dir.path(), &auth).await;
        assert_eq!(auth.get(SNAPSHOT_CATEGORY, "db").await.unwrap().unwrap(), b"main");
        assert_eq!(auth.get(SNAPSHOT_CATEGORY, "db-wal").await.unwrap().unwrap(), b"wal");
    }

    #[tokio::test]
    async fn test_purge_removes_database_files() {
        let dir = tempfile::tempdir().unwrap();
        let factory = WhatsAppWebFactory::new(dir.path(), "wagate");
        for suffix in ["", "-wal", "-shm"] {
            tokio::fs::write(dir.path().join(format!("s1.db{suffix}")), b"x").await.unwrap();
        }
        tokio::fs::write(dir.path().join("s2.db"), b"other").await.unwrap();

        factory.purge("s1").await.unwrap();
        assert!(!dir.path().join("s1.db").exists());
        assert!(!dir.path().join("s1.db-shm").exists());
        assert!(dir.path().join("s2.db").exists());
        // Second purge is a no-op.
        factory.purge("s1").await.unwrap();
    }

    #[tokio::test]
    async fn test_registered_jid_comes_from_creds() {
        let auth = auth("s1");
        assert!(registered_jid(&auth).await.is_none());

        auth.save_creds(&wagate_store::Creds {
            me: Some("5511999998888:7@s.whatsapp.net".into()),
            registered: true,
            ..Default::default()
        })
        .await
        .unwrap();
        assert_eq!(
            registered_jid(&auth).await.as_deref(),
            Some("5511999998888:7@s.whatsapp.net")
        );
    }

    #[cfg(feature = "whatsapp-web")]
    #[test]
    fn test_remove_device_node_names_own_jid() {
        use wacore_binary::attrs::AttrParser;

        let me: wacore_binary::jid::Jid = "5511999998888:7@s.whatsapp.net".parse().unwrap();
        let node = driver::remove_device_node(&me);
        assert_eq!(node.tag, "remove-companion-device");

        let mut attrs = AttrParser::new(&node);
        assert_eq!(attrs.optional_string("jid"), Some("5511999998888:7@s.whatsapp.net"));
        assert_eq!(attrs.optional_string("reason"), Some("user_initiated"));
    }

    #[cfg(not(feature = "whatsapp-web"))]
    #[tokio::test]
    async fn test_connect_without_driver_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let factory = WhatsAppWebFactory::new(dir.path(), "wagate");
        let (tx, _rx) = mpsc::channel(4);
        let err = factory.connect("s1", auth("s1"), tx).await.err().unwrap();
        assert!(matches!(err, SocketError::Unsupported(_)));
    }
}
