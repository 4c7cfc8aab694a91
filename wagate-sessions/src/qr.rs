//! QR code rendering for pairing.

use qrcode::render::{svg, unicode};
use qrcode::QrCode;
use std::str::FromStr;
use wagate_common::{Error, Result};

/// Output format for `GET /sessions/:id/qr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QrFormat {
    /// The raw pairing string, for clients that draw their own code.
    #[default]
    Raw,
    Svg,
    /// Dense unicode blocks, printable in a terminal.
    Text,
}

impl FromStr for QrFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "json" => Ok(Self::Raw),
            "svg" => Ok(Self::Svg),
            "text" | "terminal" => Ok(Self::Text),
            other => Err(Error::InvalidInput(format!(
                "unknown QR format '{other}' (expected raw, svg or text)"
            ))),
        }
    }
}

fn encode(code: &str) -> Result<QrCode> {
    QrCode::new(code.as_bytes())
        .map_err(|e| Error::Internal(format!("Failed to encode QR payload: {e}")))
}

pub fn render_svg(code: &str) -> Result<String> {
    Ok(encode(code)?
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .quiet_zone(true)
        .build())
}

pub fn render_text(code: &str) -> Result<String> {
    Ok(encode(code)?
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
