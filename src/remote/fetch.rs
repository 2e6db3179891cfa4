//! Mapping advertised refs onto local refs and applying the result.

use crate::advertisement::Advertisement;
use crate::refspec::{Refspec, ShorthandTarget};
use crate::remote::AutotagOption;
use crate::storage::graph::is_descendant;
use crate::storage::refs::validate_ref_name;
use crate::storage::utils::TAGS_PREFIX;
use crate::storage::{ObjectId, ObjectStore, RefStore};
use crate::{Error, Result};
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt;

/// One advertised ref bound for one local ref.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipMapping {
    pub source: String,
    pub destination: String,
    pub id: ObjectId,
    pub force: bool,
}

/// Advertised refs matched by the refspecs, in advertisement order.
///
/// Every matching refspec contributes a mapping; if two of them write the
/// same local ref, the earlier refspec wins.
pub fn map_refspecs(
    advertisement: &Advertisement,
    refspecs: &[Refspec],
    target: &ShorthandTarget,
) -> Vec<TipMapping> {
    let mut mappings: Vec<(usize, TipMapping)> = Vec::new();

    for (order, spec) in refspecs.iter().enumerate() {
        let matched: Vec<&str> = if spec.is_wildcard() {
            advertisement
                .refs()
                .filter(|head| spec.matches_source(&head.name))
                .map(|head| head.name.as_str())
                .collect()
        } else {
            // A short name resolves to its best-ranked advertised ref only.
            advertisement
                .refs()
                .filter_map(|head| spec.match_rank(&head.name).map(|rank| (rank, head)))
                .min_by_key(|(rank, _)| *rank)
                .map(|(_, head)| head.name.as_str())
                .into_iter()
                .collect()
        };

        for source in matched {
            let Some(destination) = spec.destination_for(source, target) else {
                debug!("{spec}: {source} has no local counterpart");
                continue;
            };
            let Some(head) = advertisement.get(source) else {
                continue;
            };
            mappings.push((
                order,
                TipMapping {
                    source: source.to_string(),
                    destination,
                    id: head.id,
                    force: spec.is_force(),
                },
            ));
        }
    }

    mappings.sort_by_key(|(order, _)| *order);
    let mut taken = HashSet::new();
    mappings
        .into_iter()
        .map(|(_, mapping)| mapping)
        .filter(|mapping| taken.insert(mapping.destination.clone()))
        .collect()
}

/// Tags the autotag policy adds on top of the refspec mappings.
///
/// `include` decides, per tag, whether an `Auto` tag qualifies; it is not
/// consulted for `All`.
pub fn autotag_candidates(
    advertisement: &Advertisement,
    policy: AutotagOption,
    mut include: impl FnMut(ObjectId, ObjectId) -> bool,
) -> Vec<TipMapping> {
    if policy == AutotagOption::None {
        return Vec::new();
    }
    advertisement
        .refs()
        .filter(|head| head.name.starts_with(TAGS_PREFIX))
        .filter(|head| policy == AutotagOption::All || include(head.id, head.target()))
        .map(|head| TipMapping {
            source: head.name.clone(),
            destination: head.name.clone(),
            id: head.id,
            force: false,
        })
        .collect()
}

/// Appends `extra` mappings whose destination is not yet taken.
pub fn merge_mappings(mut mappings: Vec<TipMapping>, extra: Vec<TipMapping>) -> Vec<TipMapping> {
    let mut taken: HashSet<String> = mappings.iter().map(|m| m.destination.clone()).collect();
    for mapping in extra {
        if taken.insert(mapping.destination.clone()) {
            mappings.push(mapping);
        }
    }
    mappings
}

/// Why a single local ref was not moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    NonFastForward,
    /// Tags are never moved without force.
    TagExists,
    ObjectMissing(ObjectId),
    /// Another writer changed the ref between read and write.
    Conflict,
    InvalidName,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::NonFastForward => write!(f, "non-fast-forward"),
            RejectReason::TagExists => write!(f, "would clobber existing tag"),
            RejectReason::ObjectMissing(id) => write!(f, "object {id} is missing"),
            RejectReason::Conflict => write!(f, "changed concurrently"),
            RejectReason::InvalidName => write!(f, "invalid reference name"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TipUpdate {
    Created {
        name: String,
        id: ObjectId,
    },
    Updated {
        name: String,
        old: ObjectId,
        new: ObjectId,
        forced: bool,
    },
    Unchanged {
        name: String,
        id: ObjectId,
    },
    Rejected {
        name: String,
        old: Option<ObjectId>,
        new: ObjectId,
        reason: RejectReason,
    },
}

impl TipUpdate {
    pub fn name(&self) -> &str {
        match self {
            TipUpdate::Created { name, .. }
            | TipUpdate::Updated { name, .. }
            | TipUpdate::Unchanged { name, .. }
            | TipUpdate::Rejected { name, .. } => name,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, TipUpdate::Rejected { .. })
    }

    /// The error a rejected update corresponds to.
    pub fn to_error(&self) -> Option<Error> {
        let TipUpdate::Rejected {
            name,
            old,
            new,
            reason,
        } = self
        else {
            return None;
        };
        Some(match reason {
            RejectReason::NonFastForward => Error::NonFastForward {
                name: name.clone(),
                old: old.unwrap_or(ObjectId::ZERO),
                new: *new,
            },
            RejectReason::TagExists => Error::RefExists(name.clone()),
            RejectReason::ObjectMissing(id) => Error::ObjectMissing(*id),
            RejectReason::Conflict => Error::RefConflict { name: name.clone() },
            RejectReason::InvalidName => Error::InvalidRefName(name.clone()),
        })
    }
}

/// Outcome of applying one fetch to the local refs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TipUpdateReport {
    pub updates: Vec<TipUpdate>,
    /// Advertised refs no refspec or tag policy asked for.
    pub skipped: Vec<String>,
}

impl TipUpdateReport {
    pub fn get(&self, name: &str) -> Option<&TipUpdate> {
        self.updates.iter().find(|update| update.name() == name)
    }

    pub fn rejected(&self) -> impl Iterator<Item = &TipUpdate> {
        self.updates.iter().filter(|update| update.is_rejected())
    }

    pub fn changed(&self) -> usize {
        self.updates
            .iter()
            .filter(|u| matches!(u, TipUpdate::Created { .. } | TipUpdate::Updated { .. }))
            .count()
    }
}

/// Creates or moves each mapped local ref.
///
/// Only storage failures are returned as errors; everything that concerns a
/// single ref is recorded in the report and the remaining refs proceed.
pub fn apply_tips(
    objects: &dyn ObjectStore,
    refs: &dyn RefStore,
    mappings: &[TipMapping],
) -> Result<Vec<TipUpdate>> {
    let mut updates = Vec::with_capacity(mappings.len());
    for mapping in mappings {
        let update = apply_one(objects, refs, mapping)?;
        if let TipUpdate::Rejected { name, reason, .. } = &update {
            warn!("[rejected] {} -> {name} ({reason})", mapping.source);
        } else {
            debug!("{} -> {}: {update:?}", mapping.source, mapping.destination);
        }
        updates.push(update);
    }
    Ok(updates)
}

fn apply_one(
    objects: &dyn ObjectStore,
    refs: &dyn RefStore,
    mapping: &TipMapping,
) -> Result<TipUpdate> {
    let name = mapping.destination.clone();
    let new = mapping.id;
    let rejected = |old, reason| TipUpdate::Rejected {
        name: mapping.destination.clone(),
        old,
        new,
        reason,
    };

    if validate_ref_name(&name).is_err() {
        return Ok(rejected(None, RejectReason::InvalidName));
    }
    if !objects.has(&new) {
        return Ok(rejected(None, RejectReason::ObjectMissing(new)));
    }

    let Some(old) = refs.get(&name)? else {
        return match refs.create(&name, new) {
            Ok(()) => Ok(TipUpdate::Created { name, id: new }),
            Err(Error::RefExists(_) | Error::RefConflict { .. }) => {
                Ok(rejected(None, RejectReason::Conflict))
            }
            Err(e) => Err(e),
        };
    };

    if old == new {
        return Ok(TipUpdate::Unchanged { name, id: new });
    }

    if !mapping.force {
        if name.starts_with(TAGS_PREFIX) {
            return Ok(rejected(Some(old), RejectReason::TagExists));
        }
        match is_descendant(objects, &new, &old) {
            Ok(true) => {}
            Ok(false) => return Ok(rejected(Some(old), RejectReason::NonFastForward)),
            Err(Error::ObjectMissing(id)) => {
                return Ok(rejected(Some(old), RejectReason::ObjectMissing(id)));
            }
            Err(e) => return Err(e),
        }
    }

    match refs.compare_and_set(&name, Some(old), new) {
        Ok(()) => Ok(TipUpdate::Updated {
            name,
            old,
            new,
            forced: mapping.force,
        }),
        Err(Error::RefConflict { .. }) => Ok(rejected(Some(old), RejectReason::Conflict)),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::RemoteHead;
    use crate::connection::Direction;
    use crate::storage::objects::{Commit, LooseObjectStore, Tree};
    use crate::storage::{FileRefStore, ObjectKind};
    use chrono::Utc;
    use tempfile::tempdir;

    fn oid(seed: &str) -> ObjectId {
        ObjectId::hash_object(ObjectKind::Blob, seed.as_bytes())
    }

    fn fetch(text: &str) -> Refspec {
        Refspec::parse(text, Direction::Fetch).unwrap()
    }

    fn advertisement() -> Advertisement {
        Advertisement::from_heads(vec![
            RemoteHead::new("HEAD", oid("master")),
            RemoteHead::new("refs/heads/master", oid("master")),
            RemoteHead::new("refs/heads/dev", oid("dev")),
            RemoteHead {
                name: "refs/tags/v1".to_string(),
                id: oid("tag-v1"),
                peeled: Some(oid("master")),
            },
            RemoteHead::new("refs/tags/light", oid("dev")),
        ])
    }

    fn commit(store: &LooseObjectStore, parents: Vec<ObjectId>, msg: &str) -> ObjectId {
        let tree = store.write(&Tree::default()).unwrap();
        store
            .write(&Commit {
                tree,
                parents,
                author: "Vox <vox@example.com>".to_string(),
                timestamp: Utc::now(),
                message: msg.to_string(),
            })
            .unwrap()
    }

    #[test]
    fn test_two_refspecs_same_source() {
        let specs = vec![
            fetch("master:remotes/sloppy/master"),
            fetch("master:boh/sloppy/master"),
        ];
        let mappings = map_refspecs(&advertisement(), &specs, &ShorthandTarget::LocalBranches);
        let destinations: Vec<_> = mappings.iter().map(|m| m.destination.as_str()).collect();
        assert_eq!(
            destinations,
            vec!["refs/remotes/sloppy/master", "refs/heads/boh/sloppy/master"]
        );
        assert!(mappings.iter().all(|m| m.id == oid("master")));
    }

    #[test]
    fn test_first_refspec_wins_on_same_destination() {
        let specs = vec![
            fetch("refs/heads/dev:refs/heads/mirror"),
            fetch("+refs/heads/master:refs/heads/mirror"),
        ];
        let mappings = map_refspecs(&advertisement(), &specs, &ShorthandTarget::LocalBranches);
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].source, "refs/heads/dev");
        assert!(!mappings[0].force);
    }

    #[test]
    fn test_wildcard_skips_peeled_entries() {
        let specs = vec![fetch("+refs/tags/*:refs/tags/*")];
        let mappings = map_refspecs(&advertisement(), &specs, &ShorthandTarget::LocalBranches);
        let sources: Vec<_> = mappings.iter().map(|m| m.source.as_str()).collect();
        assert_eq!(sources, vec!["refs/tags/light", "refs/tags/v1"]);
    }

    #[test]
    fn test_shorthand_tag_in_local_branch_mode() {
        let specs = vec![fetch("master"), fetch("v1")];
        let mappings = map_refspecs(&advertisement(), &specs, &ShorthandTarget::LocalBranches);
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].destination, "refs/heads/master");

        let tracking = ShorthandTarget::Tracking("origin".to_string());
        let mappings = map_refspecs(&advertisement(), &specs, &tracking);
        let destinations: Vec<_> = mappings.iter().map(|m| m.destination.as_str()).collect();
        assert_eq!(destinations, vec!["refs/remotes/origin/master", "refs/tags/v1"]);
    }

    #[test]
    fn test_autotag_candidates() {
        let adv = advertisement();
        assert!(autotag_candidates(&adv, AutotagOption::None, |_, _| true).is_empty());
        assert_eq!(autotag_candidates(&adv, AutotagOption::All, |_, _| false).len(), 2);

        let auto = autotag_candidates(&adv, AutotagOption::Auto, |_, target| {
            target == oid("master")
        });
        assert_eq!(auto.len(), 1);
        assert_eq!(auto[0].destination, "refs/tags/v1");
    }

    #[test]
    fn test_apply_tips_outcomes() {
        let tmp = tempdir().unwrap();
        let objects = LooseObjectStore::new(tmp.path().join("objects"));
        let refs = FileRefStore::new(tmp.path());

        let base = commit(&objects, vec![], "base");
        let ahead = commit(&objects, vec![base], "ahead");
        let other = commit(&objects, vec![base], "other");
        refs.create("refs/heads/ff", base).unwrap();
        refs.create("refs/heads/diverged", ahead).unwrap();
        refs.create("refs/heads/forced", ahead).unwrap();
        refs.create("refs/heads/same", base).unwrap();
        refs.create("refs/tags/v1", base).unwrap();

        let mapping = |dst: &str, id, force| TipMapping {
            source: dst.to_string(),
            destination: dst.to_string(),
            id,
            force,
        };
        let missing = oid("missing");
        let updates = apply_tips(
            &objects,
            &refs,
            &[
                mapping("refs/heads/new", base, false),
                mapping("refs/heads/ff", ahead, false),
                mapping("refs/heads/diverged", other, false),
                mapping("refs/heads/forced", other, true),
                mapping("refs/heads/same", base, false),
                mapping("refs/tags/v1", ahead, false),
                mapping("refs/heads/ghost", missing, false),
            ],
        )
        .unwrap();

        assert_eq!(
            updates[0],
            TipUpdate::Created {
                name: "refs/heads/new".to_string(),
                id: base
            }
        );
        assert!(matches!(updates[1], TipUpdate::Updated { forced: false, .. }));
        assert!(matches!(
            &updates[2],
            TipUpdate::Rejected { reason: RejectReason::NonFastForward, old: Some(o), .. } if *o == ahead
        ));
        assert!(matches!(updates[3], TipUpdate::Updated { forced: true, .. }));
        assert!(matches!(updates[4], TipUpdate::Unchanged { .. }));
        assert!(matches!(
            updates[5],
            TipUpdate::Rejected { reason: RejectReason::TagExists, .. }
        ));
        assert!(matches!(
            updates[6],
            TipUpdate::Rejected { reason: RejectReason::ObjectMissing(_), .. }
        ));

        assert_eq!(refs.get("refs/heads/ff").unwrap(), Some(ahead));
        assert_eq!(refs.get("refs/heads/diverged").unwrap(), Some(ahead));
        assert_eq!(refs.get("refs/heads/forced").unwrap(), Some(other));
        assert!(matches!(
            updates[2].to_error(),
            Some(Error::NonFastForward { .. })
        ));
        assert!(updates[0].to_error().is_none());
    }
}
