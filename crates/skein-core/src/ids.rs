use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

pub const VALUE_DOMAIN_SEPARATOR: char = '@';

/// Identifier qualified with the federated domain that owns it.
///
/// The string form is `value@domain`; a legacy entity with no owning backend
/// renders as the bare value. An empty `value` is never valid.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedId {
    pub value: String,
    pub domain: String,
}

pub type UserId = QualifiedId;
pub type ConversationId = QualifiedId;

impl QualifiedId {
    pub fn new(value: impl Into<String>, domain: impl Into<String>) -> Self {
        let value = value.into();
        debug_assert!(!value.is_empty(), "qualified id with empty value");
        Self {
            value,
            domain: domain.into(),
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let (value, domain) = match raw.split_once(VALUE_DOMAIN_SEPARATOR) {
            Some((value, domain)) => (value, domain),
            None => (raw, ""),
        };
        if value.is_empty() {
            return None;
        }
        Some(Self {
            value: value.to_string(),
            domain: domain.to_string(),
        })
    }
}

impl Display for QualifiedId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}", self.value)
        } else {
            write!(f, "{}{}{}", self.value, VALUE_DOMAIN_SEPARATOR, self.domain)
        }
    }
}

/// Device identifier, unique per user. Not domain-qualified.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId {
    pub value: String,
}

impl ClientId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Display for ClientId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

/// MLS group identifier, opaque to everything but the crypto provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId {
    pub value: String,
}

impl GroupId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl Display for GroupId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}
