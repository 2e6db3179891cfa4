use crate::storage::ObjectId;
use crate::storage::objects::{ObjectKind, VoxObject};
use crate::storage::utils::{PERM_DIR, PERM_FILE, PERM_GITLINK};
use crate::{Error, Result};
use std::io::Write;

/// Represents a single entry in a tree object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Unix file permissions in string format (e.g., "100644" for regular files)
    pub mode: String,
    /// Name of the file or directory
    pub name: String,
    /// Id of the referenced blob or subtree
    pub id: ObjectId,
}

impl TreeEntry {
    pub fn file(name: impl Into<String>, id: ObjectId) -> Self {
        TreeEntry {
            mode: PERM_FILE.to_string(),
            name: name.into(),
            id,
        }
    }

    pub fn dir(name: impl Into<String>, id: ObjectId) -> Self {
        TreeEntry {
            mode: PERM_DIR.to_string(),
            name: name.into(),
            id,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.mode == PERM_DIR
    }

    /// Submodule entries point into another repository's object database.
    pub fn is_gitlink(&self) -> bool {
        self.mode == PERM_GITLINK
    }

    fn sort_key(&self) -> Vec<u8> {
        let mut key = self.name.as_bytes().to_vec();
        if self.is_dir() {
            key.push(b'/');
        }
        key
    }
}

/// Represents a directory tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new(mut entries: Vec<TreeEntry>) -> Self {
        entries.sort_by_key(TreeEntry::sort_key);
        Tree { entries }
    }

    /// Parses the binary `<mode> <name>\0<20-byte id>` entry sequence.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut rest = data;

        while !rest.is_empty() {
            let space = rest
                .iter()
                .position(|&b| b == b' ')
                .ok_or_else(|| Error::corrupt("tree", "entry without mode separator"))?;
            let nul = rest
                .iter()
                .position(|&b| b == 0)
                .ok_or_else(|| Error::corrupt("tree", "entry without name terminator"))?;
            if nul < space || rest.len() < nul + 21 {
                return Err(Error::corrupt("tree", "truncated entry"));
            }

            let mode = String::from_utf8_lossy(&rest[..space]).into_owned();
            let name = String::from_utf8_lossy(&rest[space + 1..nul]).into_owned();
            let id = ObjectId::from_slice(&rest[nul + 1..nul + 21])?;
            entries.push(TreeEntry { mode, name, id });

            rest = &rest[nul + 21..];
        }

        Ok(Tree { entries })
    }
}

impl VoxObject for Tree {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Tree
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        for entry in &self.entries {
            write!(content, "{} {}\0", entry.mode, entry.name)?;
            content.extend_from_slice(entry.id.as_bytes());
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_parse_serialized() {
        let blob = ObjectId::hash_object(ObjectKind::Blob, b"hello");
        let sub = ObjectId::hash_object(ObjectKind::Tree, b"");
        let tree = Tree::new(vec![
            TreeEntry::file("b.txt", blob),
            TreeEntry::dir("a", sub),
        ]);

        let parsed = Tree::parse(&tree.serialize().unwrap()).unwrap();
        assert_eq!(parsed, tree);
        assert_eq!(parsed.entries[0].name, "a");
    }

    #[test]
    fn test_truncated_tree_is_corrupt() {
        assert!(Tree::parse(b"100644 file\0abc").is_err());
    }

    #[test]
    fn test_empty_tree_id() {
        let id = Tree::default().id().unwrap();
        assert_eq!(id.to_hex(), "4b825dc642cb6eb9a060e54bf8d69288fbee4904");
    }
}
