use crate::storage::{ObjectId, ObjectKind, ObjectStore};
use crate::{Error, Result};
use std::collections::{HashSet, VecDeque};

/// Follows tag objects until a non-tag object is reached.
pub fn peel_tags(store: &dyn ObjectStore, id: &ObjectId) -> Result<ObjectId> {
    let mut current = *id;
    let mut seen = HashSet::new();
    while store.kind_of(&current)? == ObjectKind::Tag {
        if !seen.insert(current) {
            return Err(Error::ObjectMissing(current));
        }
        current = store.tag_target(&current)?;
    }
    Ok(current)
}

/// True when `old` is reachable from `new` through commit parents, i.e.
/// moving a ref from `old` to `new` is a fast-forward.
///
/// Both ends are peeled first; non-commit objects are only descendants of
/// themselves.
pub fn is_descendant(store: &dyn ObjectStore, new: &ObjectId, old: &ObjectId) -> Result<bool> {
    let new = peel_tags(store, new)?;
    let old = peel_tags(store, old)?;
    if new == old {
        return Ok(true);
    }
    if store.kind_of(&new)? != ObjectKind::Commit || store.kind_of(&old)? != ObjectKind::Commit {
        return Ok(false);
    }

    let mut seen = HashSet::from([new]);
    let mut queue = VecDeque::from([new]);
    while let Some(id) = queue.pop_front() {
        for parent in store.commit_parents(&id)? {
            if parent == old {
                return Ok(true);
            }
            if seen.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(false)
}
