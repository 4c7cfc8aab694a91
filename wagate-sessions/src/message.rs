//! Message types exchanged with sockets, and media resolution.

use base64::Engine;
use serde::{Deserialize, Serialize};
use wagate_common::{Error, Result};

/// Media categories WhatsApp distinguishes on upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    /// Mimetype used when nothing better is known.
    pub const fn default_mimetype(&self) -> &'static str {
        match self {
            Self::Image => "image/jpeg",
            Self::Video => "video/mp4",
            Self::Audio => "audio/ogg; codecs=opus",
            Self::Document => "application/octet-stream",
        }
    }

    /// Classify a mimetype; unknown types are documents.
    pub fn from_mimetype(mimetype: &str) -> Self {
        match mimetype.split('/').next() {
            Some("image") => Self::Image,
            Some("video") => Self::Video,
            Some("audio") => Self::Audio,
            _ => Self::Document,
        }
    }
}

/// Where outgoing media comes from.
///
/// Deserializes from `{ "url": "..." }` or `{ "base64": "..." }`.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    Url(String),
    /// Plain base64 or a `data:<mime>;base64,` URL.
    Base64(String),
    #[serde(skip)]
    Bytes(Vec<u8>),
}

impl MediaSource {
    /// The resolved bytes, if this source has been resolved.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl std::fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Base64(data) => write!(f, "Base64({} chars)", data.len()),
            Self::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// A message to send.
#[derive(Debug, Clone)]
pub enum OutgoingMessage {
    Text {
        text: String,
    },
    Media {
        kind: MediaKind,
        source: MediaSource,
        caption: Option<String>,
        file_name: Option<String>,
        mimetype: Option<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
        name: Option<String>,
        address: Option<String>,
    },
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Media { kind, .. } => kind.as_str(),
            Self::Location { .. } => "location",
        }
    }

    /// Check fields that do not need the network.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Text { text } if text.trim().is_empty() => {
                Err(Error::InvalidInput("text must not be empty".into()))
            }
            Self::Location {
                latitude,
                longitude,
                ..
            } if !(-90.0..=90.0).contains(latitude) || !(-180.0..=180.0).contains(longitude) => {
                Err(Error::InvalidInput(format!(
                    "coordinates out of range: {latitude}, {longitude}"
                )))
            }
            Self::Media {
                source: MediaSource::Url(url),
                ..
            } if !(url.starts_with("http://") || url.starts_with("https://")) => Err(
                Error::InvalidInput(format!("media url must be http(s): '{url}'")),
            ),
            _ => Ok(()),
        }
    }

    /// Turn URL/base64 media into bytes and fill in the mimetype.
    pub async fn resolve(self, client: &reqwest::Client) -> Result<Self> {
        match self {
            Self::Media {
                kind,
                source,
                caption,
                file_name,
                mimetype,
            } => {
                let resolved = resolve_media(client, &source).await?;
                let mimetype = mimetype
                    .or(resolved.mimetype)
                    .or_else(|| file_name.as_deref().and_then(guess_mimetype).map(String::from))
                    .unwrap_or_else(|| kind.default_mimetype().to_string());

                Ok(Self::Media {
                    kind,
                    source: MediaSource::Bytes(resolved.data),
                    caption,
                    file_name,
                    mimetype: Some(mimetype),
                })
            }
            other => Ok(other),
        }
    }
}

/// Media bytes plus whatever type information the source carried.
#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub data: Vec<u8>,
    pub mimetype: Option<String>,
}

/// Fetch or decode a media source.
pub async fn resolve_media(client: &reqwest::Client, source: &MediaSource) -> Result<ResolvedMedia> {
    match source {
        MediaSource::Bytes(data) => Ok(ResolvedMedia {
            data: data.clone(),
            mimetype: None,
        }),
        MediaSource::Base64(raw) => decode_base64(raw),
        MediaSource::Url(url) => {
            let response = client
                .get(url)
                .send()
                .await
                .map_err(|e| Error::External(format!("media download failed: {e}")))?;

            if !response.status().is_success() {
                return Err(Error::External(format!(
                    "media download from {url} returned {}",
                    response.status()
                )));
            }

            let header_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
                .filter(|v| !v.is_empty() && v != "application/octet-stream");

            let data = response
                .bytes()
                .await
                .map_err(|e| Error::External(format!("media download failed: {e}")))?
                .to_vec();

            tracing::debug!(
                url = %url,
                size = %wagate_common::util::format_bytes(data.len() as u64),
                "Media downloaded"
            );

            let path = url.split(['?', '#']).next().unwrap_or(url);
            Ok(ResolvedMedia {
                data,
                mimetype: header_type.or_else(|| guess_mimetype(path).map(String::from)),
            })
        }
    }
}

fn decode_base64(raw: &str) -> Result<ResolvedMedia> {
    let (mimetype, payload) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest
                .split_once(',')
                .ok_or_else(|| Error::InvalidInput("malformed data URL".into()))?;
            let mimetype = header
                .strip_suffix(";base64")
                .filter(|m| !m.is_empty())
                .map(String::from);
            (mimetype, payload)
        }
        None => (None, raw),
    };

    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    let data = base64::engine::general_purpose::STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| Error::InvalidInput(format!("invalid base64 media: {e}")))?;

    Ok(ResolvedMedia { data, mimetype })
}

/// Guess a mimetype from a file name or URL path extension.
pub fn guess_mimetype(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "3gp" => "video/3gpp",
        "mov" => "video/quicktime",
        "ogg" | "opus" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "csv" => "text/csv",
        "txt" => "text/plain",
        "zip" => "application/zip",
        _ => return None,
    })
}

/// Media attached to an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMedia {
    pub kind: MediaKind,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub file_name: Option<String>,
    /// Downloaded content. Not part of webhook payloads.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

/// A message received on (or sent from another device of) a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    /// Chat JID: the contact for 1:1 chats, the group otherwise.
    pub chat: String,
    /// Author JID (differs from `chat` in groups).
    pub sender: String,
    pub from_me: bool,
    pub is_group: bool,
    #[serde(default)]
    pub push_name: Option<String>,
    /// Text body or media caption.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Option<IncomingMedia>,
    /// Unix millis
    pub timestamp: i64,
}

/// Acknowledgement of a sent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: String,
    pub to: String,
    /// Unix millis
    pub timestamp: i64,
}

impl SentMessage {
    pub fn now(id: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            to: to.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_media_source_deserializes() {
        let source: MediaSource = serde_json::from_str(r#"{"url":"https://x/y.png"}"#).unwrap();
        assert!(matches!(source, MediaSource::Url(ref u) if u == "https://x/y.png"));

        let source: MediaSource = serde_json::from_str(r#"{"base64":"aGk="}"#).unwrap();
        assert!(matches!(source, MediaSource::Base64(_)));
    }

    #[test]
    fn test_decode_data_url() {
        let resolved = decode_base64("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(resolved.data, b"hello");
        assert_eq!(resolved.mimetype.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_decode_plain_base64_with_newlines() {
        let resolved = decode_base64("aGVs\nbG8=").unwrap();
        assert_eq!(resolved.data, b"hello");
        assert!(resolved.mimetype.is_none());
    }

    #[test]
    fn test_decode_invalid_base64() {
        let err = decode_base64("not base64!!").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_guess_mimetype() {
        assert_eq!(guess_mimetype("invoice.PDF"), Some("application/pdf"));
        assert_eq!(guess_mimetype("/media/cat.jpeg"), Some("image/jpeg"));
        assert_eq!(guess_mimetype("README"), None);
        assert_eq!(guess_mimetype("archive.unknown"), None);
    }

    #[test]
    fn test_media_kind_from_mimetype() {
        assert_eq!(MediaKind::from_mimetype("image/webp"), MediaKind::Image);
        assert_eq!(MediaKind::from_mimetype("audio/ogg"), MediaKind::Audio);
        assert_eq!(MediaKind::from_mimetype("application/pdf"), MediaKind::Document);
    }

    #[test]
    fn test_validate() {
        assert!(OutgoingMessage::text("  ").validate().is_err());
        assert!(OutgoingMessage::text("hi").validate().is_ok());

        let location = OutgoingMessage::Location {
            latitude: 91.0,
            longitude: 0.0,
            name: None,
            address: None,
        };
        assert!(location.validate().is_err());

        let media = OutgoingMessage::Media {
            kind: MediaKind::Image,
            source: MediaSource::Url("file:///etc/passwd".into()),
            caption: None,
            file_name: None,
            mimetype: None,
        };
        assert!(media.validate().is_err());
    }

    #[tokio::test]
    async fn test_resolve_url_uses_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/photo"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![1u8, 2, 3]),
            )
            .mount(&server)
            .await;

        let message = OutgoingMessage::Media {
            kind: MediaKind::Image,
            source: MediaSource::Url(format!("{}/files/photo", server.uri())),
            caption: Some("look".into()),
            file_name: None,
            mimetype: None,
        };

        let resolved = message.resolve(&reqwest::Client::new()).await.unwrap();
        match resolved {
            OutgoingMessage::Media {
                source, mimetype, ..
            } => {
                assert_eq!(source.as_bytes(), Some(&[1u8, 2, 3][..]));
                assert_eq!(mimetype.as_deref(), Some("image/png"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_url_falls_back_to_extension_then_kind() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4]))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let resolved = resolve_media(
            &client,
            &MediaSource::Url(format!("{}/doc/report.pdf?sig=1", server.uri())),
        )
        .await
        .unwrap();
        assert_eq!(resolved.mimetype.as_deref(), Some("application/pdf"));

        let message = OutgoingMessage::Media {
            kind: MediaKind::Video,
            source: MediaSource::Url(format!("{}/blob", server.uri())),
            caption: None,
            file_name: None,
            mimetype: None,
        };
        match message.resolve(&client).await.unwrap() {
            OutgoingMessage::Media { mimetype, .. } => {
                assert_eq!(mimetype.as_deref(), Some("video/mp4"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_url_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = resolve_media(
            &reqwest::Client::new(),
            &MediaSource::Url(format!("{}/missing.png", server.uri())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status_code(), 502);
    }
}
