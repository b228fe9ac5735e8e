// WhatsApp identifiers ("user@server")

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde_json::Value;

use crate::error::{Result, WapiError};

/// A `user@server` identifier for a contact, chat or group.
///
/// Two IDs are equal when their canonical `user@server` strings are equal,
/// whichever constructor built them.
#[derive(Debug, Clone)]
pub struct Id {
    user: String,
    server: String,
}

impl Id {
    pub fn new(user: &str, server: &str) -> Self {
        Id {
            user: user.to_string(),
            server: server.to_string(),
        }
    }

    /// Splits a serialized `user@server` identifier on its first `@`
    pub fn from_serialized(serialized: &str) -> Result<Self> {
        let (user, server) = serialized
            .split_once('@')
            .ok_or_else(|| WapiError::malformed("_serialized", "ID"))?;
        Ok(Id::new(user, server))
    }

    /// Reads an ID out of a page payload.
    ///
    /// Accepts a serialized string, an object with `user` and `server`, or an
    /// object carrying only `_serialized`.
    pub fn from_payload(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Id::from_serialized(s),
            Value::Object(map) => {
                let user = map.get("user").and_then(Value::as_str);
                let server = map.get("server").and_then(Value::as_str);
                match (user, server) {
                    (Some(user), Some(server)) => Ok(Id::new(user, server)),
                    _ => map
                        .get("_serialized")
                        .and_then(Value::as_str)
                        .ok_or_else(|| WapiError::malformed("user", "ID"))
                        .and_then(Id::from_serialized),
                }
            }
            _ => Err(WapiError::malformed("user", "ID")),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Group chats live on `g.us`
    pub fn is_group(&self) -> bool {
        self.server == "g.us"
    }

    fn canonical_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.user
            .bytes()
            .chain(std::iter::once(b'@'))
            .chain(self.server.bytes())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_bytes().eq(other.canonical_bytes())
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.canonical_bytes() {
            state.write_u8(b);
        }
    }
}

impl FromStr for Id {
    type Err = WapiError;

    fn from_str(s: &str) -> Result<Self> {
        Id::from_serialized(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn test_equality_is_structural() {
        assert_eq!(Id::new("123", "s.whatsapp.net"), Id::new("123", "s.whatsapp.net"));
        assert_ne!(Id::new("123", "s.whatsapp.net"), Id::new("124", "s.whatsapp.net"));
        assert_ne!(Id::new("123", "s.whatsapp.net"), Id::new("123", "c.us"));
    }

    #[test]
    fn test_canonical_form_round_trips() {
        let id = Id::new("972512345678", "c.us");
        assert_eq!(id.to_string(), "972512345678@c.us");

        let parsed = Id::from_serialized(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(parsed.user(), "972512345678");
        assert_eq!(parsed.server(), "c.us");
    }

    #[test]
    fn test_equality_follows_canonical_string() {
        // Different splits of the same canonical string compare equal
        let a = Id::new("a@b", "c");
        let b = Id::new("a", "b@c");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_from_payload_shapes() {
        let expected = Id::new("1", "s");
        assert_eq!(Id::from_payload(&json!("1@s")).unwrap(), expected);
        assert_eq!(Id::from_payload(&json!({"user": "1", "server": "s"})).unwrap(), expected);
        assert_eq!(
            Id::from_payload(&json!({"remote": "x@c.us", "_serialized": "1@s"})).unwrap(),
            expected
        );
    }

    #[test]
    fn test_from_payload_rejects_garbage() {
        assert!(Id::from_payload(&json!("no-at-sign")).is_err());
        assert!(Id::from_payload(&json!({"user": "1"})).is_err());
        assert!(Id::from_payload(&json!(42)).is_err());
        assert!(Id::from_payload(&json!(null)).is_err());
    }

    #[test]
    fn test_group_server() {
        assert!(Id::new("123-456", "g.us").is_group());
        assert!(!Id::new("123", "c.us").is_group());
    }
}
