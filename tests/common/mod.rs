// Common test utilities for integration tests
// A scripted in-memory page stands in for the browser

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use log::LevelFilter;
use serde_json::{json, Value};

use wapi_bridge::wapi::polling::CancelToken;
use wapi_bridge::wapi::proxy::{Capability, DISCOVERY_SCRIPT};
use wapi_bridge::wapi::{ScriptBundle, ScriptSession, WhatsApi};
use wapi_bridge::SessionError;

// Initialize logging once
static INIT_LOGGER: Once = Once::new();

/// Set up the logger for the tests
pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Timeout used by test APIs; hanging replies run into it quickly
pub const TEST_TIMEOUT: Duration = Duration::from_millis(200);

/// What the fake page answers to one WAPI call
pub enum Reply {
    Value(Value),
    Error(String),
    Hang,
}

/// A page that answers WAPI calls from per-function queues and records
/// everything it is asked to run.
pub struct ScriptedSession {
    namespace: Vec<String>,
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    drained: Mutex<HashMap<String, CancelToken>>,
    injections: Mutex<Vec<String>>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedSession {
    pub fn new(namespace: &[&str]) -> Self {
        ScriptedSession {
            namespace: namespace.iter().map(|s| s.to_string()).collect(),
            replies: Mutex::new(HashMap::new()),
            drained: Mutex::new(HashMap::new()),
            injections: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A page exposing every typed capability plus WAPI's own state
    pub fn full() -> Self {
        let mut names: Vec<&str> = Capability::ALL.iter().map(|c| c.as_str()).collect();
        names.push("lastRead");
        Self::new(&names)
    }

    pub fn reply(self, function: &str, value: Value) -> Self {
        self.push(function, Reply::Value(value));
        self
    }

    pub fn fail(self, function: &str, message: &str) -> Self {
        self.push(function, Reply::Error(message.to_string()));
        self
    }

    pub fn hang(self, function: &str) -> Self {
        self.push(function, Reply::Hang);
        self
    }

    /// Once the queue for `function` is empty, cancel `token` and answer
    /// with an empty list
    pub fn cancel_when_drained(self, function: &str, token: CancelToken) -> Self {
        self.drained.lock().unwrap().insert(function.to_string(), token);
        self
    }

    fn push(&self, function: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(function.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn injections(&self) -> Vec<String> {
        self.injections.lock().unwrap().clone()
    }

    /// Every evaluated script, discovery queries included
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Evaluated WAPI calls only
    pub fn calls(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.starts_with("return WAPI."))
            .collect()
    }

    pub fn calls_to(&self, function: &str) -> usize {
        let prefix = format!("return WAPI.{}(", function);
        self.calls().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    fn function_name(script: &str) -> Option<&str> {
        script
            .strip_prefix("return WAPI.")
            .and_then(|rest| rest.split('(').next())
    }
}

#[async_trait]
impl ScriptSession for ScriptedSession {
    async fn inject(&self, name: &str, _source: &str) -> Result<(), SessionError> {
        self.injections.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn evaluate(&self, script: &str, _timeout: Duration) -> Result<Value, SessionError> {
        self.requests.lock().unwrap().push(script.to_string());

        if script == DISCOVERY_SCRIPT {
            return Ok(json!(self.namespace));
        }

        let function = match Self::function_name(script) {
            Some(function) => function.to_string(),
            // Raw scripts such as resets
            None => return Ok(Value::Null),
        };

        let reply = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&function)
            .and_then(VecDeque::pop_front);

        match reply {
            Some(Reply::Value(value)) => Ok(value),
            Some(Reply::Error(message)) => Err(SessionError::Script(message)),
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => {
                if let Some(token) = self.drained.lock().unwrap().get(&function) {
                    token.cancel();
                    return Ok(json!([]));
                }
                Err(SessionError::Script(format!("no scripted reply for {}", function)))
            }
        }
    }
}

/// An API over the scripted page
pub fn api_for(session: &Arc<ScriptedSession>) -> Arc<WhatsApi> {
    setup_logging();
    WhatsApi::new(
        session.clone(),
        ScriptBundle::new("wapi.js", "window.WAPI = {};"),
        TEST_TIMEOUT,
    )
}

pub fn text_payload(user: &str, t: i64, body: &str) -> Value {
    json!({
        "id": {"fromMe": false, "remote": format!("{}@c.us", user), "id": format!("M{}", t), "_serialized": format!("false_{}@c.us_M{}", user, t)},
        "sender": {"user": user, "server": "c.us", "_serialized": format!("{}@c.us", user)},
        "t": t,
        "type": "chat",
        "body": body,
        "isMedia": false,
        "isMMS": false
    })
}

pub fn voice_payload(user: &str, t: i64) -> Value {
    json!({
        "sender": {"user": user, "server": "c.us"},
        "t": t,
        "type": "ptt",
        "size": 4096,
        "mimetype": "audio/ogg; codecs=opus",
        "isMedia": true,
        "isMMS": true
    })
}

pub fn chat_payload(id: &str, name: &str) -> Value {
    json!({"id": id, "name": name})
}

pub fn unread_group(id: &str, name: &str, messages: Vec<Value>) -> Value {
    let mut group = chat_payload(id, name);
    group["messages"] = json!(messages);
    group
}
