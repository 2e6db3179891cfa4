use crate::connection::Direction;
use crate::storage::ObjectId;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while talking to a remote or touching the local repository.
///
/// Transport-level kinds abort the operation in flight; per-ref kinds
/// (`NonFastForward`, `RefExists`, `RefConflict`, `ObjectMissing` during tip
/// updates) are collected into result records instead of being returned.
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed refspec `{spec}`: {reason}")]
    MalformedRefspec { spec: String, reason: &'static str },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cannot fast-forward `{name}` from {old} to {new}")]
    NonFastForward {
        name: String,
        old: ObjectId,
        new: ObjectId,
    },

    #[error("refusing to update `{branch}`: it is checked out in a non-bare repository")]
    BareRepositoryRequired { branch: String },

    #[error("object {0} is missing")]
    ObjectMissing(ObjectId),

    #[error("reference `{name}` was changed concurrently")]
    RefConflict { name: String },

    #[error("reference `{0}` already exists")]
    RefExists(String),

    #[error("invalid reference name `{0}`")]
    InvalidRefName(String),

    #[error("invalid object id `{0}`")]
    InvalidObjectId(String),

    #[error("corrupt object {id}: {reason}")]
    CorruptObject { id: String, reason: String },

    #[error("`{}` is not a vox repository", .0.display())]
    NotARepository(PathBuf),

    #[error("remote is not connected")]
    NotConnected,

    #[error("remote is connected for {actual}, operation needs {expected}")]
    WrongDirection {
        expected: Direction,
        actual: Direction,
    },

    #[error("src refspec `{0}` does not match any local reference")]
    UnresolvedRefspec(String),

    #[error("push session was already finished")]
    SessionFinished,

    #[error("remote `{0}` does not exist")]
    RemoteNotFound(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn transport(message: impl std::fmt::Display) -> Self {
        Error::Transport(message.to_string())
    }

    pub(crate) fn corrupt(id: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Error::CorruptObject {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// True for failures that abort a whole fetch or push rather than a single ref.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::BareRepositoryRequired { .. }
                | Error::NotConnected
                | Error::WrongDirection { .. }
                | Error::Io(_)
        )
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}
