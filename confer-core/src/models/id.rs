use serde::{Deserialize, Serialize};

/// Client-visible space identifier (the room name a client asks for)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpaceId(pub String);

impl SpaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SpaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SpaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SpaceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Declares a process-unique integer identifier drawn from an allocator.
macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Entity kind, used in log fields and collision errors
            pub const KIND: &'static str = $kind;

            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }
    };
}

numeric_id!(
    /// Member identifier, unique among live members of one coordinator
    MemberId,
    "member"
);

numeric_id!(
    /// Router identifier, assigned by the coordinator and handed to the worker
    RouterId,
    "router"
);

numeric_id!(
    /// Transport identifier, assigned by the coordinator and handed to the worker
    TransportId,
    "transport"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids_serialize_as_plain_integers() {
        let json = serde_json::to_string(&MemberId::new(7)).unwrap();
        assert_eq!(json, "7");

        let back: TransportId = serde_json::from_str("42").unwrap();
        assert_eq!(back, TransportId::new(42));
    }

    #[test]
    fn test_space_id_is_transparent_string() {
        let id = SpaceId::from("room-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"room-1\"");
        assert_eq!(id.to_string(), "room-1");
    }
}
