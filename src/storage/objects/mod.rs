use crate::storage::ObjectId;
use crate::storage::utils::{OBJ_TYPE_BLOB, OBJ_TYPE_COMMIT, OBJ_TYPE_TAG, OBJ_TYPE_TREE};
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

pub mod blob;
pub mod commit;
pub mod loose;
pub mod pack;
pub mod tag;
pub mod tree;

pub use blob::Blob;
pub use commit::Commit;
pub use loose::LooseObjectStore;
pub use tag::Tag;
pub use tree::{Tree, TreeEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Commit => OBJ_TYPE_COMMIT,
            ObjectKind::Tree => OBJ_TYPE_TREE,
            ObjectKind::Blob => OBJ_TYPE_BLOB,
            ObjectKind::Tag => OBJ_TYPE_TAG,
        }
    }

    /// Type code used in packfile entry headers.
    pub fn pack_code(&self) -> u8 {
        match self {
            ObjectKind::Commit => 1,
            ObjectKind::Tree => 2,
            ObjectKind::Blob => 3,
            ObjectKind::Tag => 4,
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            OBJ_TYPE_COMMIT => Ok(ObjectKind::Commit),
            OBJ_TYPE_TREE => Ok(ObjectKind::Tree),
            OBJ_TYPE_BLOB => Ok(ObjectKind::Blob),
            OBJ_TYPE_TAG => Ok(ObjectKind::Tag),
            other => Err(Error::corrupt("?", format!("unknown object type `{other}`"))),
        }
    }
}

pub trait VoxObject {
    fn kind(&self) -> ObjectKind;
    fn serialize(&self) -> Result<Vec<u8>>;

    fn id(&self) -> Result<ObjectId> {
        Ok(ObjectId::hash_object(self.kind(), &self.serialize()?))
    }
}

pub enum Object {
    Blob(Blob),
    Commit(Commit),
    Tree(Tree),
    Tag(Tag),
}

impl Object {
    pub fn parse(kind: ObjectKind, data: &[u8]) -> Result<Self> {
        match kind {
            ObjectKind::Blob => Ok(Object::Blob(Blob {
                data: data.to_vec(),
            })),
            ObjectKind::Tree => Ok(Object::Tree(Tree::parse(data)?)),
            ObjectKind::Commit => Ok(Object::Commit(Commit::parse(utf8(data)?)?)),
            ObjectKind::Tag => Ok(Object::Tag(Tag::parse(utf8(data)?)?)),
        }
    }

    /// Ids this object points at directly.
    pub fn references(&self) -> Vec<ObjectId> {
        match self {
            Object::Blob(_) => Vec::new(),
            Object::Commit(commit) => {
                let mut out = Vec::with_capacity(commit.parents.len() + 1);
                out.push(commit.tree);
                out.extend(commit.parents.iter().copied());
                out
            }
            Object::Tree(tree) => tree
                .entries
                .iter()
                .filter(|entry| !entry.is_gitlink())
                .map(|entry| entry.id)
                .collect(),
            Object::Tag(tag) => vec![tag.object],
        }
    }
}

impl VoxObject for Object {
    fn kind(&self) -> ObjectKind {
        match self {
            Object::Blob(blob) => blob.kind(),
            Object::Commit(commit) => commit.kind(),
            Object::Tree(tree) => tree.kind(),
            Object::Tag(tag) => tag.kind(),
        }
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        match self {
            Object::Blob(blob) => blob.serialize(),
            Object::Commit(commit) => commit.serialize(),
            Object::Tree(tree) => tree.serialize(),
            Object::Tag(tag) => tag.serialize(),
        }
    }
}

fn utf8(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|e| Error::corrupt("?", e.to_string()))
}
