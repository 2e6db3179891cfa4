use crate::connection::{Direction, PushCommand};
use crate::refspec::{Refspec, ShorthandTarget, expand_destination};
use crate::remote::Remote;
use crate::storage::graph::is_descendant;
use crate::storage::utils::{HEAD_FILE, REFS_PREFIX};
use crate::storage::{ObjectId, ObjectStore, Repository, RepositoryInfo};
use crate::{Error, Result};
use log::{debug, info, warn};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    /// The destination already had the value; nothing was sent.
    UpToDate,
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushStatus {
    /// Local ref pushed, `None` for deletions.
    pub local: Option<String>,
    pub remote: String,
    pub outcome: PushOutcome,
}

impl PushStatus {
    pub fn is_ok(&self) -> bool {
        !matches!(self.outcome, PushOutcome::Rejected(_))
    }
}

/// One resolved ref update before the client-side checks.
#[derive(Debug)]
struct PlannedUpdate {
    local: Option<String>,
    remote: String,
    old: Option<ObjectId>,
    new: Option<ObjectId>,
    force: bool,
}

/// Collects push refspecs and runs them as one batch.
pub struct PushSession<'a, 'r> {
    remote: &'a mut Remote<'r>,
    refspecs: Vec<Refspec>,
    statuses: Vec<PushStatus>,
    unpack_ok: bool,
    finished: bool,
}

impl<'a, 'r> PushSession<'a, 'r> {
    pub(crate) fn new(remote: &'a mut Remote<'r>, refspecs: Vec<Refspec>) -> Self {
        PushSession {
            remote,
            refspecs,
            statuses: Vec::new(),
            unpack_ok: false,
            finished: false,
        }
    }

    /// `src:dst`; an empty `dst` pushes to `src`'s own name, an empty `src`
    /// deletes `dst`.
    pub fn add_refspec(&mut self, text: &str) -> Result<()> {
        if self.finished {
            return Err(Error::SessionFinished);
        }
        self.refspecs.push(Refspec::parse(text, Direction::Push)?);
        Ok(())
    }

    pub fn refspecs(&self) -> &[Refspec] {
        &self.refspecs
    }

    /// Resolves the refspecs, checks the destination, sends the objects and
    /// asks for all ref updates at once.
    ///
    /// Rejected refs are reported through [`statuses`](Self::statuses); an
    /// error means nothing was applied. A failure before anything is sent
    /// leaves the session open.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Err(Error::SessionFinished);
        }

        let repo = self.remote.repository();
        let planned = {
            let advertisement = self.remote.require(Direction::Push)?;
            resolve(repo, &self.refspecs, |name| {
                advertisement.get(name).map(|head| head.id)
            })?
        };

        if let Some(info) = self.remote.transport().destination_info()? {
            if let Some(branch) = info.current_branch.filter(|_| !info.bare) {
                if planned.iter().any(|update| update.remote == branch) {
                    warn!("{} has {branch} checked out", self.remote.url());
                    return Err(Error::BareRepositoryRequired { branch });
                }
            }
        }
        self.finished = true;

        let mut commands = Vec::new();
        let mut statuses = Vec::with_capacity(planned.len());
        for update in planned {
            let outcome = precheck(repo, &update)?;
            if outcome.is_none() {
                commands.push(PushCommand {
                    remote_ref: update.remote.clone(),
                    old: update.old,
                    new: update.new,
                });
            }
            statuses.push((update, outcome));
        }

        if commands.is_empty() {
            debug!("nothing to send to {}", self.remote.url());
            self.unpack_ok = true;
        } else {
            let pushed = self.remote.transport_mut().negotiate_and_push(repo, &commands);
            let report = match pushed {
                Ok(report) => report,
                Err(e) => {
                    self.remote.disconnect();
                    return Err(e);
                }
            };
            self.unpack_ok = report.unpack_ok;
            if let Some(message) = &report.unpack_message {
                warn!("remote unpack failed: {message}");
            }

            for (update, outcome) in statuses.iter_mut().filter(|(_, o)| o.is_none()) {
                *outcome = Some(match report.status_of(&update.remote) {
                    Some(status) => match &status.error {
                        None => PushOutcome::Accepted,
                        Some(reason) => PushOutcome::Rejected(reason.clone()),
                    },
                    None => PushOutcome::Rejected("no status reported".to_string()),
                });
            }
        }

        self.statuses = statuses
            .into_iter()
            .map(|(update, outcome)| PushStatus {
                local: update.local,
                remote: update.remote,
                outcome: outcome.unwrap_or(PushOutcome::Accepted),
            })
            .collect();
        for status in self.statuses.iter().filter(|s| !s.is_ok()) {
            warn!("[rejected] {} ({:?})", status.remote, status.outcome);
        }
        info!(
            "pushed {} of {} refs to {}",
            self.statuses.iter().filter(|s| s.is_ok()).count(),
            self.statuses.len(),
            self.remote.url()
        );
        Ok(())
    }

    /// Whether the destination accepted the transferred objects. `false`
    /// until [`finish`](Self::finish) succeeds.
    pub fn unpack_ok(&self) -> bool {
        self.unpack_ok
    }

    pub fn statuses(&self) -> &[PushStatus] {
        &self.statuses
    }

    pub fn status_of(&self, remote_ref: &str) -> Option<&PushStatus> {
        self.statuses.iter().find(|status| status.remote == remote_ref)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

/// Expands the refspecs against local refs. A remote name claimed by an
/// earlier refspec is not updated again.
fn resolve(
    repo: &Repository,
    refspecs: &[Refspec],
    remote_value: impl Fn(&str) -> Option<ObjectId>,
) -> Result<Vec<PlannedUpdate>> {
    let local_refs = repo.refs().list(REFS_PREFIX)?;
    let mut planned: Vec<PlannedUpdate> = Vec::new();
    let mut claimed = HashSet::new();

    let mut plan = |local: Option<String>, remote: String, new, force| {
        if claimed.insert(remote.clone()) {
            planned.push(PlannedUpdate {
                old: remote_value(&remote),
                local,
                remote,
                new,
                force,
            });
        }
    };

    for spec in refspecs {
        if spec.is_delete() {
            let dst = spec.destination().unwrap_or_default();
            let remote = expand_destination(dst, dst);
            plan(None, remote, None, false);
            continue;
        }

        if spec.is_wildcard() {
            for (name, id) in local_refs.iter().filter(|(n, _)| spec.matches_source(n)) {
                if let Some(remote) = spec.destination_for(name, &ShorthandTarget::LocalBranches) {
                    plan(Some(name.clone()), remote, Some(*id), spec.is_force());
                }
            }
            continue;
        }

        let (local, id) = resolve_source(repo, spec, &local_refs)?;
        let remote = match spec.destination() {
            Some(_) => spec.destination_for(&local, &ShorthandTarget::LocalBranches),
            // HEAD goes to the branch it names.
            None if local == HEAD_FILE => repo.current_branch_ref()?,
            None => Some(local.clone()),
        }
        .ok_or_else(|| Error::UnresolvedRefspec(spec.to_string()))?;
        plan(Some(local), remote, Some(id), spec.is_force());
    }
    Ok(planned)
}

/// The best-ranked local ref a non-wildcard source names.
fn resolve_source(
    repo: &Repository,
    spec: &Refspec,
    local_refs: &[(String, ObjectId)],
) -> Result<(String, ObjectId)> {
    if spec.source() == HEAD_FILE {
        if let Some(id) = repo.refs().resolve(HEAD_FILE)? {
            return Ok((HEAD_FILE.to_string(), id));
        }
    }
    local_refs
        .iter()
        .filter_map(|(name, id)| spec.match_rank(name).map(|rank| (rank, name, id)))
        .min_by_key(|(rank, _, _)| *rank)
        .map(|(_, name, id)| (name.clone(), *id))
        .ok_or_else(|| Error::UnresolvedRefspec(spec.source().to_string()))
}

/// Client-side verdict for one update; `None` means it must be sent.
fn precheck(repo: &Repository, update: &PlannedUpdate) -> Result<Option<PushOutcome>> {
    let objects = repo.objects();
    let rejected = |reason: &str| Ok(Some(PushOutcome::Rejected(reason.to_string())));

    match (update.old, update.new) {
        (old, new) if old == new && new.is_some() => Ok(Some(PushOutcome::UpToDate)),
        (None, None) => rejected("remote ref does not exist"),
        (Some(_), None) | (None, Some(_)) => Ok(None),
        (Some(_), Some(_)) if update.force => Ok(None),
        (Some(old), Some(new)) => {
            if !objects.has(&old) {
                return rejected("fetch first");
            }
            match is_descendant(objects, &new, &old) {
                Ok(true) => Ok(None),
                Ok(false) => rejected("non-fast-forward"),
                Err(Error::ObjectMissing(_)) => rejected("fetch first"),
                Err(e) => Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RefStore;
    use crate::storage::objects::{Commit, Tree};
    use chrono::Utc;
    use tempfile::tempdir;

    fn commit(repo: &Repository, parents: Vec<ObjectId>, msg: &str) -> ObjectId {
        let tree = repo.objects().write(&Tree::default()).unwrap();
        repo.objects()
            .write(&Commit {
                tree,
                parents,
                author: "Vox <vox@example.com>".to_string(),
                timestamp: Utc::now(),
                message: msg.to_string(),
            })
            .unwrap()
    }

    fn push(text: &str) -> Refspec {
        Refspec::parse(text, Direction::Push).unwrap()
    }

    #[test]
    fn test_resolve_forms() {
        let tmp = tempdir().unwrap();
        let repo = Repository::init(tmp.path(), false).unwrap();
        let base = commit(&repo, vec![], "base");
        repo.refs().create("refs/heads/master", base).unwrap();
        repo.refs().create("refs/heads/topic", base).unwrap();
        repo.refs().create("refs/tags/v1", base).unwrap();

        let specs = vec![
            push("refs/heads/master:"),
            push("topic:review/topic"),
            push("v1"),
            push(":refs/heads/gone"),
            push("+refs/heads/*:refs/heads/mirror/*"),
            push("HEAD"),
        ];
        let planned = resolve(&repo, &specs, |_| None).unwrap();
        let remotes: Vec<_> = planned.iter().map(|p| p.remote.as_str()).collect();
        assert_eq!(
            remotes,
            vec![
                "refs/heads/master",
                "refs/heads/review/topic",
                "refs/tags/v1",
                "refs/heads/gone",
                "refs/heads/mirror/master",
                "refs/heads/mirror/topic",
            ]
        );
        assert_eq!(planned[3].new, None);
        assert!(planned[4].force);

        assert!(matches!(
            resolve(&repo, &[push("nothing")], |_| None),
            Err(Error::UnresolvedRefspec(s)) if s == "nothing"
        ));
    }

    #[test]
    fn test_precheck() {
        let tmp = tempdir().unwrap();
        let repo = Repository::init(tmp.path(), false).unwrap();
        let base = commit(&repo, vec![], "base");
        let ahead = commit(&repo, vec![base], "ahead");
        let other = commit(&repo, vec![base], "other");
        let unknown = ObjectId::hash_object(crate::storage::ObjectKind::Blob, b"elsewhere");

        let update = |old, new, force| PlannedUpdate {
            local: Some("refs/heads/master".to_string()),
            remote: "refs/heads/master".to_string(),
            old,
            new,
            force,
        };
        let check = |u: PlannedUpdate| precheck(&repo, &u).unwrap();

        assert_eq!(check(update(Some(base), Some(ahead), false)), None);
        assert_eq!(check(update(None, Some(ahead), false)), None);
        assert_eq!(check(update(Some(base), Some(base), false)), Some(PushOutcome::UpToDate));
        assert_eq!(
            check(update(Some(ahead), Some(other), false)),
            Some(PushOutcome::Rejected("non-fast-forward".to_string()))
        );
        assert_eq!(check(update(Some(ahead), Some(other), true)), None);
        assert_eq!(
            check(update(Some(unknown), Some(ahead), false)),
            Some(PushOutcome::Rejected("fetch first".to_string()))
        );
        assert_eq!(
            check(update(None, None, false)),
            Some(PushOutcome::Rejected("remote ref does not exist".to_string()))
        );
    }
}
