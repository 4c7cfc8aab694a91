//! WhatsApp address (JID) helpers.
//!
//! A JID is `user@server`. Users may carry a device suffix (`5511...:12@s.whatsapp.net`)
//! which is dropped when addressing a chat.

use crate::error::{Error, Result};

pub const USER_SERVER: &str = "s.whatsapp.net";
pub const LEGACY_USER_SERVER: &str = "c.us";
pub const GROUP_SERVER: &str = "g.us";
pub const BROADCAST_SERVER: &str = "broadcast";
pub const NEWSLETTER_SERVER: &str = "newsletter";
pub const LID_SERVER: &str = "lid";

/// The status feed pseudo-chat.
pub const STATUS_BROADCAST: &str = "status@broadcast";

/// Turn user input (phone number or JID) into a chat JID.
///
/// Phone numbers may contain `+`, spaces, dashes and parentheses.
pub fn normalize_recipient(input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::InvalidInput("recipient is empty".into()));
    }

    if let Some((user, server)) = input.split_once('@') {
        let server = server.to_ascii_lowercase();
        if user.is_empty() || server.is_empty() {
            return Err(Error::InvalidInput(format!("malformed JID '{input}'")));
        }
        return Ok(match server.as_str() {
            USER_SERVER | LEGACY_USER_SERVER | LID_SERVER => {
                let user = strip_device(user);
                let server = if server == LEGACY_USER_SERVER {
                    USER_SERVER
                } else {
                    server.as_str()
                };
                format!("{user}@{server}")
            }
            _ => format!("{user}@{server}"),
        });
    }

    let digits: String = input
        .chars()
        .filter(|c| !matches!(c, '+' | ' ' | '-' | '(' | ')'))
        .collect();

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidInput(format!(
            "'{input}' is neither a phone number nor a JID"
        )));
    }

    Ok(format!("{digits}@{USER_SERVER}"))
}

/// Turn a group id (with or without `@g.us`) into a group JID.
pub fn normalize_group(input: &str) -> Result<String> {
    let input = input.trim();
    let id = input.strip_suffix("@g.us").unwrap_or(input);
    if id.is_empty()
        || id.contains('@')
        || !id.chars().all(|c| c.is_ascii_digit() || c == '-')
    {
        return Err(Error::InvalidInput(format!("'{input}' is not a group id")));
    }
    Ok(format!("{id}@{GROUP_SERVER}"))
}

fn strip_device(user: &str) -> &str {
    user.split_once(':').map_or(user, |(u, _)| u)
}

fn server_of(jid: &str) -> &str {
    jid.rsplit_once('@').map_or("", |(_, s)| s)
}

pub fn is_group(jid: &str) -> bool {
    server_of(jid) == GROUP_SERVER
}

pub fn is_broadcast(jid: &str) -> bool {
    server_of(jid) == BROADCAST_SERVER
}

pub fn is_status_broadcast(jid: &str) -> bool {
    jid == STATUS_BROADCAST
}

pub fn is_newsletter(jid: &str) -> bool {
    server_of(jid) == NEWSLETTER_SERVER
}

/// The part before `@`, without device suffix.
pub fn user_part(jid: &str) -> &str {
    let user = jid.split_once('@').map_or(jid, |(u, _)| u);
    strip_device(user)
}

/// E.164-style phone number for a user JID, `None` for groups and others.
pub fn phone_of(jid: &str) -> Option<String> {
    match server_of(jid) {
        USER_SERVER | LEGACY_USER_SERVER => Some(format!("+{}", user_part(jid))),
        _ => None,
    }
}
