// Calls into window.WAPI by name
//
// Discovery injects the bundle and reads back the namespace keys; every
// lookup is checked against that registry before anything is sent to the page.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde_json::Value;
use tokio::sync::Mutex as TokioMutex;

use super::js_arg::join_js_args;
use super::session::{ScriptBundle, ScriptSession};
use crate::error::{Result, SessionError, WapiError};

/// Query run after injection to list the namespace
pub const DISCOVERY_SCRIPT: &str = "return Object.keys(window.WAPI)";

/// The completion callback handed to every WAPI function
const COMPLETION_HANDLE: &str = "arguments[0]";

/// WAPI functions the bridge knows how to call with typed arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    GetAllContacts,
    GetContact,
    GetContactByName,
    GetAllChats,
    GetChat,
    GetAllGroupMetadata,
    GetGroupMetadata,
    GetGroupParticipantIds,
    GetGroupAdmins,
    GetMe,
    GetAllMessagesInChat,
    SendMessage,
    GetUnreadMessagesInChat,
    GetUnreadMessages,
    GetCommonGroups,
    GetGroupOwnerId,
}

impl Capability {
    pub const ALL: [Capability; 16] = [
        Capability::GetAllContacts,
        Capability::GetContact,
        Capability::GetContactByName,
        Capability::GetAllChats,
        Capability::GetChat,
        Capability::GetAllGroupMetadata,
        Capability::GetGroupMetadata,
        Capability::GetGroupParticipantIds,
        Capability::GetGroupAdmins,
        Capability::GetMe,
        Capability::GetAllMessagesInChat,
        Capability::SendMessage,
        Capability::GetUnreadMessagesInChat,
        Capability::GetUnreadMessages,
        Capability::GetCommonGroups,
        Capability::GetGroupOwnerId,
    ];

    /// Name of the function in the WAPI namespace
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::GetAllContacts => "getAllContacts",
            Capability::GetContact => "getContact",
            Capability::GetContactByName => "getContactByName",
            Capability::GetAllChats => "getAllChats",
            Capability::GetChat => "getChat",
            Capability::GetAllGroupMetadata => "getAllGroupMetadata",
            Capability::GetGroupMetadata => "getGroupMetadata",
            Capability::GetGroupParticipantIds => "getGroupParticipantIDs",
            Capability::GetGroupAdmins => "getGroupAdmins",
            Capability::GetMe => "getMe",
            Capability::GetAllMessagesInChat => "getAllMessagesInChat",
            Capability::SendMessage => "sendMessage",
            Capability::GetUnreadMessagesInChat => "getUnreadMessagesInChat",
            Capability::GetUnreadMessages => "getUnreadMessages",
            Capability::GetCommonGroups => "getCommonGroups",
            Capability::GetGroupOwnerId => "getGroupOwnerID",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = WapiError;

    fn from_str(s: &str) -> Result<Self> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| WapiError::NoSuchCapability { name: s.to_string() })
    }
}

/// The set of function names found in `window.WAPI` at discovery time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityRegistry {
    names: BTreeSet<String>,
}

impl CapabilityRegistry {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CapabilityRegistry {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds the registry from the discovery query result: either the key
    /// array itself or the namespace object.
    fn from_discovery(value: Value) -> Result<Self> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| -> Result<String> {
                    match item {
                        Value::String(s) => Ok(s),
                        other => Err(SessionError::Script(format!(
                            "WAPI key is not a string: {}",
                            other
                        ))
                        .into()),
                    }
                })
                .collect::<Result<BTreeSet<_>>>()
                .map(|names| CapabilityRegistry { names }),
            Value::Object(map) => Ok(CapabilityRegistry::new(map.into_iter().map(|(k, _)| k))),
            other => Err(SessionError::Script(format!(
                "window.WAPI is not an object: {}",
                other
            ))
            .into()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Typed capabilities present in the namespace
    pub fn known(&self) -> Vec<Capability> {
        Capability::ALL
            .iter()
            .copied()
            .filter(|c| self.contains(c.as_str()))
            .collect()
    }

    /// Names present in the namespace without a typed counterpart
    pub fn extras(&self) -> Vec<&str> {
        self.names()
            .filter(|n| n.parse::<Capability>().is_err())
            .collect()
    }
}

/// Dynamic front for the functions in `window.WAPI`.
pub struct WapiProxy {
    session: Arc<dyn ScriptSession>,
    bundle: ScriptBundle,
    timeout: Duration,
    registry: TokioMutex<Option<Arc<CapabilityRegistry>>>,
}

impl WapiProxy {
    pub fn new(session: Arc<dyn ScriptSession>, bundle: ScriptBundle, timeout: Duration) -> Self {
        WapiProxy {
            session,
            bundle,
            timeout,
            registry: TokioMutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Re-injects the bundle and rebuilds the registry from the namespace keys.
    ///
    /// Safe to repeat: injection just redefines `window.WAPI`.
    pub async fn discover(&self) -> Result<Arc<CapabilityRegistry>> {
        let mut guard = self.registry.lock().await;

        self.session.inject(&self.bundle.name, &self.bundle.source).await?;
        let keys = self.evaluate_with_timeout(DISCOVERY_SCRIPT).await?;
        let registry = Arc::new(CapabilityRegistry::from_discovery(keys)?);

        info!(
            "Discovered {} WAPI functions from {}",
            registry.len(),
            self.bundle.name
        );
        let extras = registry.extras();
        if !extras.is_empty() {
            debug!("Untyped WAPI functions: {:?}", extras);
        }

        *guard = Some(registry.clone());
        Ok(registry)
    }

    /// The current registry, discovering it on first use
    pub async fn capabilities(&self) -> Result<Arc<CapabilityRegistry>> {
        {
            let guard = self.registry.lock().await;
            if let Some(registry) = guard.as_ref() {
                return Ok(registry.clone());
            }
        }
        self.discover().await
    }

    /// Looks up a function by name.
    ///
    /// Fails with [`WapiError::NoSuchCapability`] when the name is not in the
    /// namespace; nothing is sent to the page in that case.
    pub async fn resolve(&self, name: &str) -> Result<JsFunction<'_>> {
        let registry = self.capabilities().await?;
        if !registry.contains(name) {
            return Err(WapiError::NoSuchCapability {
                name: name.to_string(),
            });
        }
        Ok(JsFunction {
            proxy: self,
            name: name.to_string(),
        })
    }

    /// Typed form of [`resolve`](Self::resolve)
    pub async fn function(&self, capability: Capability) -> Result<JsFunction<'_>> {
        self.resolve(capability.as_str()).await
    }

    /// Evaluates a script that is not a WAPI call, such as resetting state
    pub async fn evaluate_raw(&self, script: &str) -> Result<Value> {
        debug!("Evaluating raw script: {}", script);
        Ok(self.evaluate_with_timeout(script).await?)
    }

    async fn evaluate_with_timeout(&self, script: &str) -> std::result::Result<Value, SessionError> {
        match tokio::time::timeout(self.timeout, self.session.evaluate(script, self.timeout)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(self.timeout)),
        }
    }
}

/// One bound WAPI function
pub struct JsFunction<'a> {
    proxy: &'a WapiProxy,
    name: String,
}

impl<'a> JsFunction<'a> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The script text issued for these arguments
    pub fn command(&self, args: &[Value]) -> Result<String> {
        if args.is_empty() {
            Ok(format!("return WAPI.{}({})", self.name, COMPLETION_HANDLE))
        } else {
            Ok(format!(
                "return WAPI.{}({}, {})",
                self.name,
                join_js_args(args)?,
                COMPLETION_HANDLE
            ))
        }
    }

    /// Calls the function and waits for its completion.
    ///
    /// Each call is one round trip; failures are not retried.
    pub async fn call(&self, args: &[Value]) -> Result<Value> {
        let command = self.command(args)?;
        debug!("Calling WAPI function: {}", command);

        self.proxy
            .evaluate_with_timeout(&command)
            .await
            .map_err(|e| WapiError::RemoteInvocation {
                capability: self.name.clone(),
                message: e.to_string(),
                command,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_capability_names_round_trip() {
        for capability in Capability::ALL {
            let parsed: Capability = capability.as_str().parse().unwrap();
            assert_eq!(parsed, capability);
        }
        assert!("getAllChatz".parse::<Capability>().is_err());
    }

    #[test]
    fn test_registry_from_key_array() {
        let registry = CapabilityRegistry::from_discovery(json!([
            "getAllChats",
            "getUnreadMessages",
            "flattenObject"
        ]))
        .unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("getAllChats"));
        assert_eq!(
            registry.known(),
            vec![Capability::GetAllChats, Capability::GetUnreadMessages]
        );
        assert_eq!(registry.extras(), vec!["flattenObject"]);
    }

    #[test]
    fn test_registry_from_namespace_object() {
        let registry =
            CapabilityRegistry::from_discovery(json!({"getMe": {}, "lastRead": {}})).unwrap();
        assert!(registry.contains("getMe"));
        assert!(registry.contains("lastRead"));
    }

    #[test]
    fn test_registry_rejects_non_namespace() {
        assert!(CapabilityRegistry::from_discovery(json!(null)).is_err());
        assert!(CapabilityRegistry::from_discovery(json!([1, 2])).is_err());
    }
}
