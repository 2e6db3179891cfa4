//! The set of references a remote offers, with annotated tags peeled.

use crate::storage::graph::peel_tags;
use crate::storage::{ObjectId, ObjectKind, ObjectStore};
use crate::{Error, Result};
use log::warn;
use std::collections::HashMap;

pub const PEELED_SUFFIX: &str = "^{}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteHead {
    pub name: String,
    pub id: ObjectId,
    /// Final non-tag object for annotated tags, `None` otherwise.
    pub peeled: Option<ObjectId>,
}

impl RemoteHead {
    pub fn new(name: impl Into<String>, id: ObjectId) -> Self {
        RemoteHead {
            name: name.into(),
            id,
            peeled: None,
        }
    }

    /// True for the synthetic `<tag>^{}` companion entries.
    pub fn is_peeled_entry(&self) -> bool {
        self.name.ends_with(PEELED_SUFFIX)
    }

    /// The object this ref ultimately names.
    pub fn target(&self) -> ObjectId {
        self.peeled.unwrap_or(self.id)
    }
}

/// Immutable snapshot of a remote's references.
///
/// Entries are ordered `HEAD` first, then by name; every annotated tag is
/// directly followed by its `^{}` entry whose id is the peeled object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    entries: Vec<RemoteHead>,
    dropped: Vec<(String, ObjectId)>,
}

impl Advertisement {
    /// Builds the snapshot from heads that already carry their peeled ids.
    pub fn from_heads(heads: impl IntoIterator<Item = RemoteHead>) -> Self {
        let mut heads: Vec<RemoteHead> = heads
            .into_iter()
            .filter(|head| !head.is_peeled_entry())
            .collect();
        heads.sort_by(|a, b| (a.name != "HEAD", &a.name).cmp(&(b.name != "HEAD", &b.name)));
        heads.dedup_by(|a, b| a.name == b.name);

        let mut entries = Vec::with_capacity(heads.len());
        for head in heads {
            let companion = head.peeled.map(|peeled| RemoteHead {
                name: format!("{}{PEELED_SUFFIX}", head.name),
                id: peeled,
                peeled: None,
            });
            entries.push(head);
            entries.extend(companion);
        }

        Advertisement {
            entries,
            dropped: Vec::new(),
        }
    }

    /// Builds the snapshot from `(name, id)` lines as sent over the wire,
    /// where a `name^{}` line carries the peeled id of `name`.
    pub fn from_wire(lines: impl IntoIterator<Item = (String, ObjectId)>) -> Self {
        let mut heads: Vec<RemoteHead> = Vec::new();
        let mut peeled: HashMap<String, ObjectId> = HashMap::new();
        for (name, id) in lines {
            match name.strip_suffix(PEELED_SUFFIX) {
                Some(base) => {
                    peeled.insert(base.to_string(), id);
                }
                None => heads.push(RemoteHead::new(name, id)),
            }
        }
        for head in &mut heads {
            head.peeled = peeled.remove(&head.name);
        }
        Self::from_heads(heads)
    }

    /// Builds the snapshot from raw refs, peeling tags through `store`.
    ///
    /// Refs whose objects are missing, or whose tag chain is broken or
    /// cyclic, are left out and recorded in [`Advertisement::dropped`];
    /// the remaining refs are still advertised.
    pub fn peel_from(
        raw: impl IntoIterator<Item = (String, ObjectId)>,
        store: &dyn ObjectStore,
    ) -> Result<Self> {
        let mut heads = Vec::new();
        let mut dropped = Vec::new();

        for (name, id) in raw {
            match peel_head(store, &id) {
                Ok(peeled) => heads.push(RemoteHead { name, id, peeled }),
                Err(Error::ObjectMissing(missing)) => {
                    warn!("not advertising {name}: object {missing} is missing");
                    dropped.push((name, missing));
                }
                Err(e) => return Err(e),
            }
        }

        let mut advertisement = Self::from_heads(heads);
        advertisement.dropped = dropped;
        Ok(advertisement)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RemoteHead> {
        self.entries.iter()
    }

    /// Real refs only, without the `^{}` companions.
    pub fn refs(&self) -> impl Iterator<Item = &RemoteHead> {
        self.entries.iter().filter(|head| !head.is_peeled_entry())
    }

    pub fn get(&self, name: &str) -> Option<&RemoteHead> {
        self.entries.iter().find(|head| head.name == name)
    }

    /// Number of entries including the `^{}` companions.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Refs left out because an object they depend on is missing.
    pub fn dropped(&self) -> &[(String, ObjectId)] {
        &self.dropped
    }
}

impl<'a> IntoIterator for &'a Advertisement {
    type Item = &'a RemoteHead;
    type IntoIter = std::slice::Iter<'a, RemoteHead>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn peel_head(store: &dyn ObjectStore, id: &ObjectId) -> Result<Option<ObjectId>> {
    if store.kind_of(id)? != ObjectKind::Tag {
        return Ok(None);
    }
    peel_tags(store, id).map(Some)
}
