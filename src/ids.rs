use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies a running replica. Generated once per process and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl ClientId {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Unique only within the lifetime of the replica that generated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub u64);

impl ActionId {
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Globally unique action identity, allocated without any coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientActionId {
    pub client: ClientId,
    pub action: ActionId,
}

impl ClientActionId {
    pub fn new(client: ClientId, action: ActionId) -> Self {
        Self { client, action }
    }

    pub fn client(&self) -> ClientId {
        self.client
    }
}

impl fmt::Display for ClientActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.client, self.action)
    }
}
