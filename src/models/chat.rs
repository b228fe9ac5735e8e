// Chats, contacts and the unread message groups that pair them with messages

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::{flag, optional_str, required, Id, Message};
use crate::error::{Result, WapiError};
use crate::wapi::WhatsApi;

/// A conversation, one-to-one or group.
///
/// Keeps the raw payload around and a handle to the API it came from so
/// chat-scoped calls can be made from it.
#[derive(Clone)]
pub struct Chat {
    id: Id,
    name: Option<String>,
    is_group: bool,
    raw: Value,
    api: Arc<WhatsApi>,
}

impl Chat {
    pub fn from_payload(raw: Value, api: Arc<WhatsApi>) -> Result<Self> {
        let id = Id::from_payload(required(&raw, "id", "Chat")?)
            .map_err(|_| WapiError::malformed("id", "Chat"))?;
        let name = optional_str(&raw, "name").or_else(|| optional_str(&raw, "formattedTitle"));
        let is_group = match raw.get("isGroup").and_then(Value::as_bool) {
            Some(explicit) => explicit,
            None => id.is_group(),
        };

        Ok(Chat {
            id,
            name,
            is_group,
            raw,
            api,
        })
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_group(&self) -> bool {
        self.is_group
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Every message in the chat, optionally including our own
    pub async fn all_messages(&self, include_me: bool) -> Result<Vec<Message>> {
        self.api.get_all_messages_in_chat(self, include_me).await
    }

    pub async fn unread_messages(&self) -> Result<Vec<Message>> {
        self.api.get_unread_messages_in_chat(self).await
    }

    pub async fn send_message(&self, text: &str) -> Result<bool> {
        self.api.send_message(&self.id, text).await
    }
}

impl fmt::Debug for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chat")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("is_group", &self.is_group)
            .finish()
    }
}

impl fmt::Display for Chat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "<Chat - {} ({})>", name, self.id),
            None => write!(f, "<Chat - {}>", self.id),
        }
    }
}

/// An address book entry
#[derive(Clone)]
pub struct Contact {
    id: Id,
    name: Option<String>,
    push_name: Option<String>,
    is_me: bool,
    raw: Value,
    api: Arc<WhatsApi>,
}

impl Contact {
    pub fn from_payload(raw: Value, api: Arc<WhatsApi>) -> Result<Self> {
        let id = Id::from_payload(required(&raw, "id", "Contact")?)
            .map_err(|_| WapiError::malformed("id", "Contact"))?;

        Ok(Contact {
            id,
            name: optional_str(&raw, "name"),
            push_name: optional_str(&raw, "pushname"),
            is_me: flag(&raw, "isMe"),
            raw,
            api,
        })
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Name from the address book
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name the contact set for themselves
    pub fn push_name(&self) -> Option<&str> {
        self.push_name.as_deref()
    }

    /// Best available name: address book, then push name
    pub fn display_name(&self) -> Option<&str> {
        self.name().or_else(|| self.push_name())
    }

    pub fn is_me(&self) -> bool {
        self.is_me
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The one-to-one chat with this contact
    pub async fn chat(&self) -> Result<Chat> {
        self.api.get_chat_from_id(&self.id).await
    }
}

impl fmt::Debug for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contact")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("push_name", &self.push_name)
            .finish()
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<Contact - {} ({})>",
            self.display_name().unwrap_or("(no name)"),
            self.id
        )
    }
}

/// Unread messages of one chat, in the order the page returned them
#[derive(Debug, Clone)]
pub struct MessageGroup {
    pub chat: Chat,
    pub messages: Vec<Message>,
}

impl MessageGroup {
    pub fn new(chat: Chat, messages: Vec<Message>) -> Self {
        MessageGroup { chat, messages }
    }

    /// Splits a chat payload carrying a `messages` array into the chat and
    /// its classified messages
    pub fn from_payload(mut raw: Value, api: Arc<WhatsApi>) -> Result<Self> {
        let messages = raw
            .as_object_mut()
            .and_then(|map| map.remove("messages"))
            .ok_or_else(|| WapiError::malformed("messages", "MessageGroup"))?;
        let messages = Message::from_payload_list(&messages, "messages", "MessageGroup")?;
        let chat = Chat::from_payload(raw, api)?;

        Ok(MessageGroup { chat, messages })
    }
}

impl fmt::Display for MessageGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.chat.name() {
            Some(name) if name.is_ascii() => name,
            Some(_) => "(unicode name)",
            None => "(unnamed chat)",
        };
        write!(
            f,
            "<MessageGroup - {} {} in {}>",
            self.messages.len(),
            if self.messages.len() == 1 { "message" } else { "messages" },
            name
        )
    }
}
