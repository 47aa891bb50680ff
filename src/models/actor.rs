use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who is asking. Every mutating endpoint checks the role (and, for drivers,
/// ownership of the delivery) before the state machine sees the event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ActorRole {
    Client,
    Kitchen,
    Driver,
    Admin,
}

impl ActorRole {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "CLIENT" => Some(Self::Client),
            "KITCHEN" => Some(Self::Kitchen),
            "DRIVER" => Some(Self::Driver),
            "ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub role: ActorRole,
    pub id: Option<Uuid>,
}

impl Actor {
    pub fn new(role: ActorRole, id: Option<Uuid>) -> Self {
        Self { role, id }
    }
}
