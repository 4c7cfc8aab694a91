//! Shared fakes for the API tests: an in-memory store and a socket driver
//! that either pairs immediately or keeps showing a QR code.

#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use wagate_api::AppState;
use wagate_common::config::Config;
use wagate_sessions::{
    ChatPresence, GroupInfo, GroupParticipant, OutgoingMessage, ParticipantAction,
    ParticipantResult, SentMessage, SessionStatus, Socket, SocketEvent, SocketFactory,
    SocketResult,
};
use wagate_store::{AuthState, MemoryStore};

pub const API_KEY: &str = "test-api-key-0123456789";
pub const QR_CODE: &str = "2@test-pairing-code,abc=,def=,1";

#[derive(Default)]
pub struct FakeSocket {
    pub sent: Mutex<Vec<(String, OutgoingMessage)>>,
    pub presences: Mutex<Vec<(String, ChatPresence)>>,
    pub left: Mutex<Vec<String>>,
}

#[async_trait]
impl Socket for FakeSocket {
    async fn send_message(&self, to: &str, message: OutgoingMessage) -> SocketResult<SentMessage> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((to.to_string(), message));
        Ok(SentMessage::now(format!("MSG{}", sent.len()), to))
    }

    async fn send_presence(&self, to: &str, presence: ChatPresence) -> SocketResult<()> {
        self.presences.lock().unwrap().push((to.to_string(), presence));
        Ok(())
    }

    async fn group_create(&self, subject: &str, participants: &[String]) -> SocketResult<GroupInfo> {
        Ok(GroupInfo {
            jid: "120363000000000001@g.us".into(),
            subject: subject.into(),
            owner: Some("15550001111@s.whatsapp.net".into()),
            creation: Some(1_700_000_000),
            description: None,
            participants: participants
                .iter()
                .map(|jid| GroupParticipant {
                    jid: jid.clone(),
                    admin: None,
                })
                .collect(),
        })
    }

    async fn group_metadata(&self, jid: &str) -> SocketResult<GroupInfo> {
        Ok(GroupInfo {
            jid: jid.into(),
            subject: "Team".into(),
            owner: None,
            creation: None,
            description: None,
            participants: vec![GroupParticipant {
                jid: "15550001111@s.whatsapp.net".into(),
                admin: Some("superadmin".into()),
            }],
        })
    }

    async fn group_participants_update(
        &self,
        _jid: &str,
        participants: &[String],
        _action: ParticipantAction,
    ) -> SocketResult<Vec<ParticipantResult>> {
        Ok(participants
            .iter()
            .enumerate()
            .map(|(i, jid)| ParticipantResult {
                jid: jid.clone(),
                status: if i == 0 { 200 } else { 403 },
            })
            .collect())
    }

    async fn group_invite_code(&self, _jid: &str) -> SocketResult<String> {
        Ok("AbCdEfGh123".into())
    }

    async fn group_update_subject(&self, _jid: &str, _subject: &str) -> SocketResult<()> {
        Ok(())
    }

    async fn group_leave(&self, jid: &str) -> SocketResult<()> {
        self.left.lock().unwrap().push(jid.to_string());
        Ok(())
    }

    async fn logout(&self) -> SocketResult<()> {
        Ok(())
    }

    async fn close(&self) -> SocketResult<()> {
        Ok(())
    }
}

/// Sessions whose id starts with `pending` stay on the QR screen; all others
/// pair at once.
#[derive(Default)]
pub struct FakeFactory {
    pub socket: Arc<FakeSocket>,
    pub events: Mutex<Vec<(String, mpsc::Sender<SocketEvent>)>>,
}

impl FakeFactory {
    pub fn sender(&self, session_id: &str) -> Option<mpsc::Sender<SocketEvent>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(id, _)| id == session_id)
            .map(|(_, tx)| tx.clone())
    }
}

#[async_trait]
impl SocketFactory for FakeFactory {
    fn name(&self) -> &str {
        "fake"
    }

    async fn connect(
        &self,
        session_id: &str,
        _auth: AuthState,
        events: mpsc::Sender<SocketEvent>,
    ) -> SocketResult<Arc<dyn Socket>> {
        let first = if session_id.starts_with("pending") {
            SocketEvent::Qr(QR_CODE.into())
        } else {
            SocketEvent::Connected {
                me: Some("15550001111@s.whatsapp.net".into()),
            }
        };
        let _ = events.send(first).await;
        self.events
            .lock()
            .unwrap()
            .push((session_id.to_string(), events));
        Ok(self.socket.clone())
    }
}

pub fn test_config(api_key: Option<&str>) -> Config {
    let mut config = Config::default();
    config.auth.api_key = api_key.map(str::to_string);
    config.network.public_url = Some("https://wa.test".into());
    config.database.url = "memory://".into();
    config
}

pub fn test_state(config: Config) -> (AppState, Arc<FakeFactory>) {
    let factory = Arc::new(FakeFactory::default());
    let state = AppState::new(config, Arc::new(MemoryStore::new()), factory.clone());
    (state, factory)
}

pub async fn wait_for_status(state: &AppState, id: &str, status: SessionStatus) {
    for _ in 0..400 {
        if let Ok(info) = state.manager.info(id).await {
            if info.status == status {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session {id} never reached {status}");
}
