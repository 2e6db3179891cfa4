//! Local repository storage and the narrow collaborator interfaces the remote
//! engine consumes.
//!
//! The engine never touches files directly: tag peeling and autotag checks go
//! through [`ObjectStore`], tip updates through [`RefStore`], push pre-flight
//! through [`RepositoryInfo`]. [`Repository`] wires the on-disk
//! implementations together.

use crate::Result;

pub mod graph;
pub mod objects;
pub mod oid;
pub mod refs;
pub mod repo;
pub mod utils;

pub use objects::{LooseObjectStore, ObjectKind};
pub use oid::ObjectId;
pub use refs::{FileRefStore, RefValue};
pub use repo::Repository;

/// Read access to the object database.
pub trait ObjectStore {
    /// Fails with `ObjectMissing` if `id` is not stored.
    fn kind_of(&self, id: &ObjectId) -> Result<ObjectKind>;
    /// The object an annotated tag points at.
    fn tag_target(&self, id: &ObjectId) -> Result<ObjectId>;
    fn has(&self, id: &ObjectId) -> bool;
    fn commit_parents(&self, id: &ObjectId) -> Result<Vec<ObjectId>>;
}

/// Reference storage with a per-ref compare-and-set primitive.
///
/// Implementations serialize writers per reference; they never lock the
/// whole namespace.
pub trait RefStore {
    fn get(&self, name: &str) -> Result<Option<ObjectId>>;
    /// `expected_old == None` means the ref must not exist yet.
    fn compare_and_set(&self, name: &str, expected_old: Option<ObjectId>, new: ObjectId)
    -> Result<()>;
    /// Fails with `RefExists` if the ref is already present.
    fn create(&self, name: &str, id: ObjectId) -> Result<()>;
}

pub trait RepositoryInfo {
    fn is_bare(&self) -> bool;
    /// Full name of the branch `HEAD` points at, if `HEAD` is symbolic.
    fn current_branch_ref(&self) -> Result<Option<String>>;
}
