use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(new_uuid())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(SessionId);
string_id!(ScreenId);
string_id!(LineId);
string_id!(RemoteId);
string_id!(RemoteInstanceId);
string_id!(ClientId);
string_id!(UserId);

pub fn new_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reference to a remote as seen from a screen or command. `name` carries the
/// instance name; a leading `*` marks the instance as session-scoped rather
/// than screen-scoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePtr {
    #[serde(default, rename = "ownerid")]
    pub owner_id: String,
    #[serde(rename = "remoteid")]
    pub remote_id: RemoteId,
    #[serde(default)]
    pub name: String,
}

impl RemotePtr {
    pub fn new(remote_id: RemoteId) -> Self {
        Self {
            owner_id: String::new(),
            remote_id,
            name: String::new(),
        }
    }

    pub fn is_session_scope(&self) -> bool {
        self.name.starts_with('*')
    }

    pub fn display_name(&self, base: &str) -> String {
        if self.name.is_empty() {
            base.to_owned()
        } else {
            format!("{}:{}", base, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_round_trip_as_bare_json_strings() {
        let id = ScreenId::new("screen-1");
        let serialized = serde_json::to_string(&id).expect("serialize id");
        assert_eq!(serialized, "\"screen-1\"");
        let parsed: ScreenId = serde_json::from_str(&serialized).expect("parse id");
        assert_eq!(parsed, id);
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }

    #[test]
    fn session_scope_is_marked_by_star_prefix() {
        let mut ptr = RemotePtr::new(RemoteId::new("r1"));
        assert!(!ptr.is_session_scope());
        ptr.name = "*default".to_owned();
        assert!(ptr.is_session_scope());
    }
}
