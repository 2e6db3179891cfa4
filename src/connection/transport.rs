use crate::Result;
use crate::advertisement::Advertisement;
use crate::storage::{ObjectId, Repository};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Fetch,
    Push,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Fetch => write!(f, "fetch"),
            Direction::Push => write!(f, "push"),
        }
    }
}

/// One ref update sent to the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCommand {
    /// Full name on the destination.
    pub remote_ref: String,
    /// Value the destination advertised; `None` creates the ref.
    pub old: Option<ObjectId>,
    /// `None` deletes the ref.
    pub new: Option<ObjectId>,
}

impl PushCommand {
    pub fn is_delete(&self) -> bool {
        self.new.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefStatus {
    pub name: String,
    /// `None` when the destination applied the update.
    pub error: Option<String>,
}

/// What the destination said after receiving a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReport {
    pub unpack_ok: bool,
    pub unpack_message: Option<String>,
    pub refs: Vec<RefStatus>,
}

impl PushReport {
    pub fn status_of(&self, name: &str) -> Option<&RefStatus> {
        self.refs.iter().find(|status| status.name == name)
    }
}

/// Facts about the destination repository a backend can observe directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationInfo {
    pub bare: bool,
    pub current_branch: Option<String>,
}

/// A way of reaching another repository.
///
/// Calls block until the exchange completes. `close` must be safe to call in
/// any state, including after a failed operation.
pub trait Transport {
    fn url(&self) -> &str;

    fn connect(&mut self, direction: Direction) -> Result<()>;

    fn is_connected(&self) -> bool;

    /// References the remote advertised on the current connection.
    fn list_refs(&mut self) -> Result<Advertisement>;

    /// Brings every object reachable from `wants` into `local`.
    fn negotiate_and_fetch(&mut self, local: &Repository, wants: &[ObjectId]) -> Result<()>;

    /// Sends the objects the commands need and asks the destination to apply
    /// them as a single batch.
    fn negotiate_and_push(
        &mut self,
        local: &Repository,
        commands: &[PushCommand],
    ) -> Result<PushReport>;

    fn destination_info(&self) -> Result<Option<DestinationInfo>> {
        Ok(None)
    }

    fn close(&mut self) -> Result<()>;
}
