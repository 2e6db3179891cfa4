//! Remote synchronization for vox repositories: refspecs, reference
//! advertisements, transports, fetch tip updates and push sessions.

pub mod advertisement;
pub mod config;
pub mod connection;
pub mod error;
pub mod refspec;
pub mod remote;
pub mod storage;

pub use advertisement::{Advertisement, RemoteHead};
pub use connection::{Direction, Transport};
pub use error::Error;
pub use refspec::{Refspec, ShorthandTarget};
pub use remote::{
    AutotagOption, ConnectionState, PushOutcome, PushSession, PushStatus, RejectReason, Remote,
    TipUpdate, TipUpdateReport,
};
pub use storage::{ObjectId, Repository};

pub type Result<T> = std::result::Result<T, Error>;
