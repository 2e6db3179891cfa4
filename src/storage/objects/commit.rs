use crate::storage::ObjectId;
use crate::storage::objects::{ObjectKind, VoxObject};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::io::Write;

/// Represents a commit
///
/// A commit records a snapshot of the repository's state at a point in time,
/// including references to the root tree, parent commit(s), author information,
/// and commit message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Commit {
    /// Id of the root tree object for this commit
    pub tree: ObjectId,
    /// Parent commits, empty for a root commit
    pub parents: Vec<ObjectId>,
    /// Author of the commit, formatted as `Name <email>`
    pub author: String,
    /// Timestamp when the commit was created
    pub timestamp: DateTime<Utc>,
    /// Commit message describing the changes
    pub message: String,
}

impl Commit {
    pub fn parse(data: &str) -> Result<Self> {
        let (headers, message) = data.split_once("\n\n").unwrap_or((data, ""));

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;

        for line in headers.lines() {
            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };
            match key {
                "tree" => tree = Some(ObjectId::from_hex(value.trim())?),
                "parent" => parents.push(ObjectId::from_hex(value.trim())?),
                "author" => author = Some(parse_signature(value)?),
                _ => {}
            }
        }

        let (author, timestamp) =
            author.ok_or_else(|| Error::corrupt("commit", "missing author"))?;

        Ok(Commit {
            tree: tree.ok_or_else(|| Error::corrupt("commit", "missing tree"))?,
            parents,
            author,
            timestamp,
            message: message.trim_end().to_string(),
        })
    }
}

/// Splits `Name <email> <unix-seconds> <tz>` into identity and time.
fn parse_signature(value: &str) -> Result<(String, DateTime<Utc>)> {
    let mut parts = value.rsplitn(3, ' ');
    let _tz = parts.next();
    let seconds = parts
        .next()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| Error::corrupt("commit", format!("bad signature `{value}`")))?;
    let identity = parts
        .next()
        .ok_or_else(|| Error::corrupt("commit", format!("bad signature `{value}`")))?;
    let timestamp = DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| Error::corrupt("commit", format!("bad timestamp {seconds}")))?;
    Ok((identity.to_string(), timestamp))
}

impl VoxObject for Commit {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Commit
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        let seconds = self.timestamp.timestamp();

        writeln!(content, "tree {}", self.tree)?;
        for parent in &self.parents {
            writeln!(content, "parent {parent}")?;
        }
        writeln!(content, "author {} {seconds} +0000", self.author)?;
        writeln!(content, "committer {} {seconds} +0000", self.author)?;
        writeln!(content)?;
        writeln!(content, "{}", self.message)?;

        Ok(content)
    }
}
