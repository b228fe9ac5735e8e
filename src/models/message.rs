// Message variants and the payload classifier that picks between them

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use log::info;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{flag, optional_str, required, required_str, Id};
use crate::error::{Result, WapiError};

/// Declared types that carry contact cards
const CONTACT_CARD_TYPES: [&str; 2] = ["vcard", "multi_vcard"];

/// How many characters of a text body to show in `Display`
const PREVIEW_LENGTH: usize = 20;

/// Which concrete message a payload turns into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Media,
    Voice,
    ContactCard,
}

impl MessageKind {
    pub fn variant_name(&self) -> &'static str {
        match self {
            MessageKind::Text => "TextMessage",
            MessageKind::Media => "MediaMessage",
            MessageKind::Voice => "VoiceMessage",
            MessageKind::ContactCard => "ContactCardMessage",
        }
    }
}

/// Picks the variant for a raw message payload.
///
/// First match wins: the media flag (split by the MMS flag into voice or
/// plain media), then contact-card types, then text for everything else.
/// Voice notes also carry the media flag, hence the nesting.
pub fn classify(payload: &Value) -> MessageKind {
    if flag(payload, "isMedia") {
        if flag(payload, "isMMS") {
            MessageKind::Voice
        } else {
            MessageKind::Media
        }
    } else if payload
        .get("type")
        .and_then(Value::as_str)
        .map_or(false, |t| CONTACT_CARD_TYPES.iter().any(|c| *c == t))
    {
        MessageKind::ContactCard
    } else {
        MessageKind::Text
    }
}

/// Fields every message carries
#[derive(Debug, Clone, PartialEq)]
pub struct MessageHeader {
    pub id: Option<String>,
    pub sender: Id,
    pub timestamp: DateTime<Utc>,
}

impl MessageHeader {
    fn from_payload(payload: &Value, variant: &'static str) -> Result<Self> {
        let sender = Id::from_payload(required(payload, "sender", variant)?)
            .map_err(|_| WapiError::malformed("sender", variant))?;

        let t = required(payload, "t", variant)?;
        let seconds = t
            .as_i64()
            .or_else(|| t.as_f64().map(|f| f.floor() as i64))
            .ok_or_else(|| WapiError::malformed("t", variant))?;
        let timestamp = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .ok_or_else(|| WapiError::malformed("t", variant))?;

        let id = match payload.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(obj @ Value::Object(_)) => {
                optional_str(obj, "_serialized").or_else(|| optional_str(obj, "id"))
            }
            _ => None,
        };

        Ok(MessageHeader {
            id,
            sender,
            timestamp,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextMessage {
    pub header: MessageHeader,
    pub body: String,
}

impl TextMessage {
    fn from_payload(header: MessageHeader, payload: &Value) -> Result<Self> {
        let body = required_str(payload, "body", MessageKind::Text.variant_name())?.to_string();
        Ok(TextMessage { header, body })
    }

    fn preview(&self) -> String {
        if !self.body.is_ascii() {
            return "(unicode content)".to_string();
        }
        if self.body.len() > PREVIEW_LENGTH {
            format!("{}...", &self.body[..PREVIEW_LENGTH])
        } else {
            self.body.clone()
        }
    }
}

impl fmt::Display for TextMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<TextMessage - from {} at {}: {}>",
            self.header.sender,
            self.header.timestamp,
            self.preview()
        )
    }
}

/// An image, video, document or other attachment
#[derive(Debug, Clone, PartialEq)]
pub struct MediaMessage {
    pub header: MessageHeader,
    pub media_type: String,
    pub size_bytes: u64,
    pub mime_type: String,
    body: Option<String>,
}

impl MediaMessage {
    fn from_payload(header: MessageHeader, payload: &Value, variant: &'static str) -> Result<Self> {
        let media_type = required_str(payload, "type", variant)?.to_string();
        let size = required(payload, "size", variant)?;
        let size_bytes = size
            .as_u64()
            .or_else(|| size.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .ok_or_else(|| WapiError::malformed("size", variant))?;
        let mime_type = required_str(payload, "mimetype", variant)?.to_string();

        Ok(MediaMessage {
            header,
            media_type,
            size_bytes,
            mime_type,
            body: optional_str(payload, "body"),
        })
    }

    /// Decodes the embedded image and writes it into `dir`.
    ///
    /// The file is named after the SHA-256 of the decoded bytes, with an
    /// extension guessed from the mime type. Only images can be saved; other
    /// media types fail without touching the filesystem.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        if self.media_type != "image" {
            return Err(WapiError::UnsupportedOperation(format!(
                "saving {} media",
                self.media_type
            )));
        }

        let body = self
            .body
            .as_deref()
            .ok_or_else(|| WapiError::malformed("body", MessageKind::Media.variant_name()))?;
        let data = BASE64.decode(strip_data_url(body).trim())?;

        let digest = hex::encode(Sha256::digest(&data));
        let path = dir.join(format!("{}.{}", digest, extension_for(&self.mime_type)));
        fs::write(&path, &data)?;

        info!("Saved {} bytes of {} to {}", data.len(), self.mime_type, path.display());
        Ok(path)
    }
}

impl fmt::Display for MediaMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<MediaMessage - {} from {} at {}>",
            self.media_type, self.header.sender, self.header.timestamp
        )
    }
}

/// Push-to-talk voice note; a media message flagged as MMS
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceMessage {
    media: MediaMessage,
}

impl VoiceMessage {
    pub fn as_media(&self) -> &MediaMessage {
        &self.media
    }
}

impl fmt::Display for VoiceMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<VoiceMessage - {} from {} at {}>",
            self.media.media_type, self.media.header.sender, self.media.header.timestamp
        )
    }
}

/// One or more shared contact cards
#[derive(Debug, Clone, PartialEq)]
pub struct ContactCardMessage {
    pub header: MessageHeader,
    pub card_type: String,
    /// Raw vCard data with non-ASCII characters dropped
    pub contacts_payload: String,
}

impl ContactCardMessage {
    fn from_payload(header: MessageHeader, payload: &Value) -> Result<Self> {
        let variant = MessageKind::ContactCard.variant_name();
        let card_type = required_str(payload, "type", variant)?.to_string();
        let contacts_payload = required_str(payload, "subtype", variant)?
            .chars()
            .filter(char::is_ascii)
            .collect();

        Ok(ContactCardMessage {
            header,
            card_type,
            contacts_payload,
        })
    }
}

impl fmt::Display for ContactCardMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<ContactCardMessage - {} from {} at {} ({})>",
            self.card_type, self.header.sender, self.header.timestamp, self.contacts_payload
        )
    }
}

/// A message read from the page, always one concrete variant
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(TextMessage),
    Media(MediaMessage),
    Voice(VoiceMessage),
    ContactCard(ContactCardMessage),
}

impl Message {
    /// Classifies a raw payload and builds the matching variant
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let kind = classify(payload);
        let variant = kind.variant_name();
        let header = MessageHeader::from_payload(payload, variant)?;

        Ok(match kind {
            MessageKind::Text => Message::Text(TextMessage::from_payload(header, payload)?),
            MessageKind::Media => {
                Message::Media(MediaMessage::from_payload(header, payload, variant)?)
            }
            MessageKind::Voice => Message::Voice(VoiceMessage {
                media: MediaMessage::from_payload(header, payload, variant)?,
            }),
            MessageKind::ContactCard => {
                Message::ContactCard(ContactCardMessage::from_payload(header, payload)?)
            }
        })
    }

    /// Builds every message in a payload array, in order
    pub fn from_payload_list(
        payload: &Value,
        field: &'static str,
        owner: &'static str,
    ) -> Result<Vec<Self>> {
        payload
            .as_array()
            .ok_or_else(|| WapiError::malformed(field, owner))?
            .iter()
            .map(Message::from_payload)
            .collect()
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Text(_) => MessageKind::Text,
            Message::Media(_) => MessageKind::Media,
            Message::Voice(_) => MessageKind::Voice,
            Message::ContactCard(_) => MessageKind::ContactCard,
        }
    }

    pub fn header(&self) -> &MessageHeader {
        match self {
            Message::Text(m) => &m.header,
            Message::Media(m) => &m.header,
            Message::Voice(m) => &m.media.header,
            Message::ContactCard(m) => &m.header,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.header().id.as_deref()
    }

    pub fn sender(&self) -> &Id {
        &self.header().sender
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.header().timestamp
    }

    /// Text body, for text messages
    pub fn body(&self) -> Option<&str> {
        match self {
            Message::Text(m) => Some(&m.body),
            _ => None,
        }
    }

    /// The media part of media and voice messages
    pub fn as_media(&self) -> Option<&MediaMessage> {
        match self {
            Message::Media(m) => Some(m),
            Message::Voice(m) => Some(&m.media),
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(m) => fmt::Display::fmt(m, f),
            Message::Media(m) => fmt::Display::fmt(m, f),
            Message::Voice(m) => fmt::Display::fmt(m, f),
            Message::ContactCard(m) => fmt::Display::fmt(m, f),
        }
    }
}

fn strip_data_url(body: &str) -> &str {
    match body.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => body,
    }
}

/// File extension for a mime type, without the dot
fn extension_for(mime_type: &str) -> String {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or(mime_type)
        .trim()
        .to_ascii_lowercase();
    let subtype = essence.split('/').nth(1).unwrap_or("");

    match mime_guess::get_mime_extensions_str(&essence) {
        Some(exts) if exts.iter().any(|e| *e == subtype) => subtype.to_string(),
        Some(exts) if !exts.is_empty() => exts[0].to_string(),
        _ => "bin".to_string(),
    }
}
