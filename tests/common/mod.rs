#![allow(dead_code)]

use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use tempfile::TempDir;
use vox_remote::connection::{PushCommand, PushReport, RefStatus};
use vox_remote::storage::objects::pack::{PackBuilder, read_entries};
use vox_remote::storage::objects::{Blob, Commit, Tag, Tree, TreeEntry};
use vox_remote::storage::{ObjectKind, ObjectStore, RefStore};
use vox_remote::{Advertisement, ObjectId, Repository};

/// Number of advertisement entries the fixture produces: HEAD, three
/// branches, three tags, plus a `^{}` entry for each of the two annotated tags.
pub const FIXTURE_ENTRIES: usize = 9;

/// A repository with some history to fetch from:
///
/// ```text
/// root <- second <- master      refs/heads/master
///          ^                    refs/heads/br2      = second
///          `- feature           refs/heads/feature
/// hard (unrelated root)         refs/tags/hard_tag  -> tag -> hard
///                               refs/tags/light     = second
///                               refs/tags/test      -> tag -> tag -> root
/// ```
pub struct Fixture {
    pub dir: TempDir,
    pub path: PathBuf,
    pub repo: Repository,
    pub root: ObjectId,
    pub second: ObjectId,
    pub master: ObjectId,
    pub feature: ObjectId,
    pub hard: ObjectId,
    pub hard_tag: ObjectId,
    pub test_tag: ObjectId,
}

pub fn commit(repo: &Repository, parents: Vec<ObjectId>, message: &str) -> ObjectId {
    let objects = repo.objects();
    let blob = objects
        .write(&Blob::new(format!("{message}\n")))
        .expect("write blob");
    let tree = objects
        .write(&Tree::new(vec![TreeEntry::file("README", blob)]))
        .expect("write tree");
    objects
        .write(&Commit {
            tree,
            parents,
            author: "Fixture <fixture@example.com>".to_string(),
            timestamp: Utc::now(),
            message: message.to_string(),
        })
        .expect("write commit")
}

pub fn annotated_tag(repo: &Repository, name: &str, target: ObjectId, kind: ObjectKind) -> ObjectId {
    repo.objects()
        .write(&Tag {
            object: target,
            object_kind: kind,
            tag: name.to_string(),
            tagger: (
                "Fixture".to_string(),
                "fixture@example.com".to_string(),
                Utc::now(),
            ),
            message: format!("{name}\n"),
        })
        .expect("write tag")
}

pub fn set_ref(repo: &Repository, name: &str, id: ObjectId) {
    repo.refs().create(name, id).expect("create ref");
}

/// Builds the fixture in `<tmp>/<dir_name>`, bare.
pub fn upstream_named(dir_name: &str) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(dir_name);
    let repo = Repository::init(&path, true).expect("init upstream");

    let root = commit(&repo, vec![], "root");
    let second = commit(&repo, vec![root], "second");
    let master = commit(&repo, vec![second], "third");
    let feature = commit(&repo, vec![second], "feature");
    let hard = commit(&repo, vec![], "unrelated");

    let inner = annotated_tag(&repo, "test-inner", root, ObjectKind::Commit);
    let test_tag = annotated_tag(&repo, "test", inner, ObjectKind::Tag);
    let hard_tag = annotated_tag(&repo, "hard_tag", hard, ObjectKind::Commit);

    set_ref(&repo, "refs/heads/master", master);
    set_ref(&repo, "refs/heads/br2", second);
    set_ref(&repo, "refs/heads/feature", feature);
    set_ref(&repo, "refs/tags/test", test_tag);
    set_ref(&repo, "refs/tags/hard_tag", hard_tag);
    set_ref(&repo, "refs/tags/light", second);

    Fixture {
        dir,
        path,
        repo,
        root,
        second,
        master,
        feature,
        hard,
        hard_tag,
        test_tag,
    }
}

pub fn upstream() -> Fixture {
    upstream_named("testrepo.vox")
}

impl Fixture {
    pub fn url(&self) -> String {
        self.path.display().to_string()
    }

    /// A fresh repository next to the fixture.
    pub fn sibling(&self, name: &str, bare: bool) -> Repository {
        Repository::init(self.dir.path().join(name), bare).expect("init sibling")
    }

    pub fn sibling_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn ref_names(repo: &Repository, prefix: &str) -> Vec<String> {
    repo.refs()
        .list(prefix)
        .expect("list refs")
        .into_iter()
        .map(|(name, _)| name)
        .collect()
}

pub fn ref_value(repo: &Repository, name: &str) -> Option<ObjectId> {
    repo.refs().get(name).expect("read ref")
}

/// What a serving repository advertises, peeled the same way the local
/// transport does it.
pub fn advertise(repo: &Repository) -> Advertisement {
    let mut raw = Vec::new();
    if let Some(head) = repo.refs().get("HEAD").expect("read HEAD") {
        raw.push(("HEAD".to_string(), head));
    }
    raw.extend(repo.refs().list("refs/").expect("list refs"));
    Advertisement::peel_from(raw, repo.objects()).expect("peel")
}

/// Pack of everything reachable from `wants` but not from `haves`.
pub fn pack_for(repo: &Repository, wants: &[ObjectId], haves: &[ObjectId]) -> Vec<u8> {
    let objects = repo.objects();
    let known: Vec<ObjectId> = haves.iter().copied().filter(|id| objects.has(id)).collect();
    let exclude: HashSet<ObjectId> = objects
        .collect_closure(&known, &HashSet::new())
        .expect("walk haves")
        .into_iter()
        .collect();
    let ids = objects.collect_closure(wants, &exclude).expect("walk wants");

    let mut builder = PackBuilder::new();
    builder.add_from_store(objects, &ids).expect("pack objects");
    builder.finish().expect("finish pack")
}

/// Applies a push the way a receiving server would.
pub fn receive(repo: &Repository, commands: &[PushCommand], pack: Option<&[u8]>) -> PushReport {
    if let Some(pack) = pack {
        let entries = match read_entries(pack) {
            Ok(entries) => entries,
            Err(_) => {
                return PushReport {
                    unpack_ok: false,
                    unpack_message: Some("bad pack".to_string()),
                    refs: commands
                        .iter()
                        .map(|c| RefStatus {
                            name: c.remote_ref.clone(),
                            error: Some("unpacker error".to_string()),
                        })
                        .collect(),
                };
            }
        };
        for (kind, data) in entries {
            repo.objects().write_raw(kind, &data).expect("store object");
        }
    }

    let refs = commands
        .iter()
        .map(|command| {
            let outcome = match command.new {
                None => repo.refs().delete(&command.remote_ref, command.old),
                Some(new) => repo
                    .refs()
                    .compare_and_set(&command.remote_ref, command.old, new),
            };
            RefStatus {
                name: command.remote_ref.clone(),
                error: outcome.err().map(|_| "failed to update ref".to_string()),
            }
        })
        .collect();

    PushReport {
        unpack_ok: true,
        unpack_message: None,
        refs,
    }
}
