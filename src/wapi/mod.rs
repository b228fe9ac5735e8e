// WhatsApp Web bridge
// Entry point for talking to the injected window.WAPI namespace

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde_json::{json, Value};

pub mod cdp;
pub mod js_arg;
pub mod polling;
pub mod proxy;
pub mod session;

pub use cdp::CdpSession;
pub use polling::{CancelToken, PollState, UnreadPoller};
pub use proxy::{Capability, CapabilityRegistry, JsFunction, WapiProxy};
pub use session::{ScriptBundle, ScriptSession};

use crate::error::{Result, WapiError};
use crate::models::{Chat, Contact, Id, Message, MessageGroup};

/// Script that forgets which messages were already reported as unread
const RESET_UNREAD_SCRIPT: &str = "window.WAPI.lastRead = {}";

/// Default script timeout, matching what the web client needs for store lookups
pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Typed access to a WhatsApp Web page.
///
/// Each method is one WAPI round trip followed by building domain objects out
/// of the returned payloads. Objects keep an `Arc` back to this API so they
/// can make further calls scoped to themselves.
pub struct WhatsApi {
    proxy: WapiProxy,
}

impl WhatsApi {
    pub fn new(session: Arc<dyn ScriptSession>, bundle: ScriptBundle, timeout: Duration) -> Arc<Self> {
        Arc::new(WhatsApi {
            proxy: WapiProxy::new(session, bundle, timeout),
        })
    }

    pub fn proxy(&self) -> &WapiProxy {
        &self.proxy
    }

    /// Injects the bundle and lists the available functions
    pub async fn discover(&self) -> Result<Arc<CapabilityRegistry>> {
        self.proxy.discover().await
    }

    async fn call(&self, capability: Capability, args: &[Value]) -> Result<Value> {
        self.proxy.function(capability).await?.call(args).await
    }

    fn expect_array(value: Value, capability: Capability) -> Result<Vec<Value>> {
        match value {
            Value::Array(items) => Ok(items),
            // An empty namespace answer comes back as null
            Value::Null => Ok(Vec::new()),
            _ => Err(WapiError::malformed("result", capability.as_str())),
        }
    }

    /// Chats with people in the address book.
    ///
    /// Use [`get_all_chats`](Self::get_all_chats) for every chat.
    pub async fn get_contacts(self: &Arc<Self>) -> Result<Vec<Contact>> {
        let raw = self.call(Capability::GetAllContacts, &[]).await?;
        Self::expect_array(raw, Capability::GetAllContacts)?
            .into_iter()
            .map(|contact| Contact::from_payload(contact, self.clone()))
            .collect()
    }

    pub async fn get_all_chats(self: &Arc<Self>) -> Result<Vec<Chat>> {
        let raw = self.call(Capability::GetAllChats, &[]).await?;
        Self::expect_array(raw, Capability::GetAllChats)?
            .into_iter()
            .map(|chat| Chat::from_payload(chat, self.clone()))
            .collect()
    }

    /// Resets the unread tracking so the next fetch starts over
    pub async fn reset_unread(&self) -> Result<()> {
        self.proxy.evaluate_raw(RESET_UNREAD_SCRIPT).await?;
        Ok(())
    }

    /// Unread messages grouped by chat
    pub async fn get_unread(self: &Arc<Self>) -> Result<Vec<MessageGroup>> {
        let raw = self.call(Capability::GetUnreadMessages, &[]).await?;
        let groups = Self::expect_array(raw, Capability::GetUnreadMessages)?
            .into_iter()
            .map(|group| MessageGroup::from_payload(group, self.clone()))
            .collect::<Result<Vec<_>>>()?;

        if !groups.is_empty() {
            debug!(
                "Fetched {} unread messages in {} chats",
                groups.iter().map(|g| g.messages.len()).sum::<usize>(),
                groups.len()
            );
        }
        Ok(groups)
    }

    pub async fn get_unread_messages_in_chat(&self, chat: &Chat) -> Result<Vec<Message>> {
        let raw = self
            .call(
                Capability::GetUnreadMessagesInChat,
                &[json!(chat.id().to_string())],
            )
            .await?;
        Message::from_payload_list(&raw, "result", Capability::GetUnreadMessagesInChat.as_str())
    }

    pub async fn get_all_messages_in_chat(&self, chat: &Chat, include_me: bool) -> Result<Vec<Message>> {
        let raw = self
            .call(
                Capability::GetAllMessagesInChat,
                &[json!(chat.id().to_string()), json!(include_me)],
            )
            .await?;
        Message::from_payload_list(&raw, "result", Capability::GetAllMessagesInChat.as_str())
    }

    pub async fn get_contact_from_id(self: &Arc<Self>, contact_id: &Id) -> Result<Contact> {
        let raw = self
            .call(Capability::GetContact, &[json!(contact_id.to_string())])
            .await?;
        if raw.is_null() {
            return Err(WapiError::NotFound {
                kind: "contact",
                key: contact_id.to_string(),
            });
        }
        Contact::from_payload(raw, self.clone())
    }

    pub async fn get_contact_by_name(self: &Arc<Self>, name: &str) -> Result<Contact> {
        let raw = self.call(Capability::GetContactByName, &[json!(name)]).await?;
        if raw.is_null() {
            return Err(WapiError::NotFound {
                kind: "contact",
                key: name.to_string(),
            });
        }
        Contact::from_payload(raw, self.clone())
    }

    pub async fn get_chat_from_id(self: &Arc<Self>, chat_id: &Id) -> Result<Chat> {
        let raw = self.call(Capability::GetChat, &[json!(chat_id.to_string())]).await?;
        if raw.is_null() {
            return Err(WapiError::NotFound {
                kind: "chat",
                key: chat_id.to_string(),
            });
        }
        Chat::from_payload(raw, self.clone())
    }

    /// Finds the one-to-one chat for a phone number.
    ///
    /// The number is written the way it appears in IDs: `+972-51-234-5678`
    /// becomes `972512345678`.
    pub async fn get_chat_from_phone_number(self: &Arc<Self>, number: &str) -> Result<Option<Chat>> {
        Ok(self
            .get_all_chats()
            .await?
            .into_iter()
            .filter(|chat| !chat.is_group())
            .find(|chat| chat.id().user().starts_with(number)))
    }

    /// The logged in user
    pub async fn get_me(self: &Arc<Self>) -> Result<Contact> {
        let raw = self.call(Capability::GetMe, &[]).await?;
        Contact::from_payload(raw, self.clone())
    }

    /// Sends a text message; false when the chat is not loaded in the page
    pub async fn send_message(&self, chat_id: &Id, text: &str) -> Result<bool> {
        let raw = self
            .call(
                Capability::SendMessage,
                &[json!(chat_id.to_string()), json!(text)],
            )
            .await?;
        let sent = raw.as_bool().unwrap_or(false);
        info!("Message to {} {}", chat_id, if sent { "sent" } else { "not sent" });
        Ok(sent)
    }

    pub async fn get_group_participant_ids(&self, group_id: &Id) -> Result<Vec<Id>> {
        let raw = self
            .call(Capability::GetGroupParticipantIds, &[json!(group_id.to_string())])
            .await?;
        Self::ids_from(raw, Capability::GetGroupParticipantIds)
    }

    pub async fn get_group_admins(&self, group_id: &Id) -> Result<Vec<Id>> {
        let raw = self
            .call(Capability::GetGroupAdmins, &[json!(group_id.to_string())])
            .await?;
        Self::ids_from(raw, Capability::GetGroupAdmins)
    }

    /// Raw group metadata (participants, owner, subject, ...)
    pub async fn get_group_metadata(&self, group_id: &Id) -> Result<Value> {
        self.call(Capability::GetGroupMetadata, &[json!(group_id.to_string())])
            .await
    }

    /// Raw metadata of every group the page has loaded
    pub async fn get_all_group_metadata(&self) -> Result<Vec<Value>> {
        let raw = self.call(Capability::GetAllGroupMetadata, &[]).await?;
        Self::expect_array(raw, Capability::GetAllGroupMetadata)
    }

    pub async fn get_group_owner_id(&self, group_id: &Id) -> Result<Id> {
        let raw = self
            .call(Capability::GetGroupOwnerId, &[json!(group_id.to_string())])
            .await?;
        if raw.is_null() {
            return Err(WapiError::NotFound {
                kind: "group owner",
                key: group_id.to_string(),
            });
        }
        Id::from_payload(&raw).map_err(|_| WapiError::malformed("id", Capability::GetGroupOwnerId.as_str()))
    }

    /// Groups shared with a contact
    pub async fn get_common_groups(&self, contact_id: &Id) -> Result<Vec<Id>> {
        let raw = self
            .call(Capability::GetCommonGroups, &[json!(contact_id.to_string())])
            .await?;
        Self::ids_from(raw, Capability::GetCommonGroups)
    }

    fn ids_from(raw: Value, capability: Capability) -> Result<Vec<Id>> {
        Self::expect_array(raw, capability)?
            .iter()
            .map(|id| Id::from_payload(id).map_err(|_| WapiError::malformed("id", capability.as_str())))
            .collect()
    }
}
