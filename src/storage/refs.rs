use crate::storage::utils::{HEAD_FILE, REFS_PREFIX, SYMREF_PREFIX};
use crate::storage::{ObjectId, RefStore};
use crate::{Error, Result};
use lazy_static::lazy_static;
use log::{debug, trace};
use regex::Regex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const MAX_SYMREF_DEPTH: usize = 5;
const LOCK_SUFFIX: &str = ".lock";

lazy_static! {
    static ref INVALID_REF_CHARS: Regex =
        Regex::new(r"[\x00-\x20~^:?*\[\\\x7f]").expect("ref name pattern is valid");
}

/// Contents of a single ref file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefValue {
    Direct(ObjectId),
    Symbolic(String),
}

impl RefValue {
    fn parse(name: &str, content: &str) -> Result<Self> {
        let content = content.trim();
        match content.strip_prefix(SYMREF_PREFIX) {
            Some(target) => Ok(RefValue::Symbolic(target.trim().to_string())),
            None => ObjectId::from_hex(content)
                .map(RefValue::Direct)
                .map_err(|_| Error::InvalidRefName(format!("{name}: unreadable value `{content}`"))),
        }
    }
}

/// Rejects names git would refuse, except for the bare `HEAD`.
pub fn validate_ref_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || (name != HEAD_FILE && !name.starts_with(REFS_PREFIX))
        || name.starts_with('/')
        || name.ends_with('/')
        || name.ends_with('.')
        || name.ends_with(LOCK_SUFFIX)
        || name.contains("..")
        || name.contains("//")
        || name.contains("@{")
        || name.split('/').any(|part| part.starts_with('.'))
        || INVALID_REF_CHARS.is_match(name);
    if bad {
        return Err(Error::InvalidRefName(name.to_string()));
    }
    Ok(())
}

/// Refs stored one file per name under the repository directory.
///
/// Writers take `<name>.lock` with `create_new`, so two updates of the same
/// ref serialize while updates of different refs never contend.
#[derive(Debug, Clone)]
pub struct FileRefStore {
    dir: PathBuf,
}

impl FileRefStore {
    /// `dir` is the repository directory that holds `HEAD` and `refs/`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileRefStore { dir: dir.into() }
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn read(&self, name: &str) -> Result<Option<RefValue>> {
        match fs::read_to_string(self.path_of(name)) {
            Ok(content) => Ok(Some(RefValue::parse(name, &content)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // A directory named like the ref (refs/heads/a vs refs/heads/a/b)
            Err(_) if self.path_of(name).is_dir() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolves symbolic refs to an object id.
    pub fn resolve(&self, name: &str) -> Result<Option<ObjectId>> {
        let mut current = name.to_string();
        for _ in 0..MAX_SYMREF_DEPTH {
            match self.read(&current)? {
                Some(RefValue::Direct(id)) => return Ok(Some(id)),
                Some(RefValue::Symbolic(target)) => current = target,
                None => return Ok(None),
            }
        }
        Err(Error::InvalidRefName(format!(
            "{name}: symbolic ref chain too deep"
        )))
    }

    /// The ref a write to `name` lands on: the end of its symbolic chain.
    fn write_target(&self, name: &str) -> Result<String> {
        let mut current = name.to_string();
        for _ in 0..MAX_SYMREF_DEPTH {
            match self.read(&current)? {
                Some(RefValue::Symbolic(target)) => current = target,
                _ => return Ok(current),
            }
        }
        Err(Error::InvalidRefName(format!(
            "{name}: symbolic ref chain too deep"
        )))
    }

    pub fn head(&self) -> Result<Option<RefValue>> {
        self.read(HEAD_FILE)
    }

    pub fn set_head_symbolic(&self, target: &str) -> Result<()> {
        validate_ref_name(target)?;
        let lock = RefLock::acquire(&self.path_of(HEAD_FILE), HEAD_FILE)?;
        lock.commit(&format!("{SYMREF_PREFIX}{target}\n"))
    }

    /// All refs below `prefix`, sorted by name, symbolic refs resolved.
    /// Dangling symbolic refs are skipped.
    pub fn list(&self, prefix: &str) -> Result<Vec<(String, ObjectId)>> {
        let root = self.dir.join(REFS_PREFIX.trim_end_matches('/'));
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(io::Error::other(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.dir)
                .map_err(|e| Error::Io(io::Error::other(e)))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if name.ends_with(LOCK_SUFFIX) || !name.starts_with(prefix) {
                continue;
            }
            if let Some(id) = self.resolve(&name)? {
                out.push((name, id));
            }
        }
        out.sort();
        Ok(out)
    }

    /// Removes `name` if it still holds `expected`.
    pub fn delete(&self, name: &str, expected: Option<ObjectId>) -> Result<()> {
        validate_ref_name(name)?;
        let path = self.path_of(name);
        let lock = RefLock::acquire(&path, name)?;
        if let Some(expected) = expected {
            if self.read(name)? != Some(RefValue::Direct(expected)) {
                return Err(Error::RefConflict {
                    name: name.to_string(),
                });
            }
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        drop(lock);
        debug!("deleted {name}");
        Ok(())
    }

    fn write_locked(
        &self,
        name: &str,
        check: impl FnOnce(Option<RefValue>) -> Result<()>,
        new: ObjectId,
    ) -> Result<()> {
        validate_ref_name(name)?;
        let lock = RefLock::acquire(&self.path_of(name), name)?;
        check(self.read(name)?)?;
        lock.commit(&format!("{new}\n"))?;
        trace!("{name} -> {new}");
        Ok(())
    }
}

impl RefStore for FileRefStore {
    fn get(&self, name: &str) -> Result<Option<ObjectId>> {
        self.resolve(name)
    }

    fn compare_and_set(
        &self,
        name: &str,
        expected_old: Option<ObjectId>,
        new: ObjectId,
    ) -> Result<()> {
        let target = self.write_target(name)?;
        self.write_locked(
            &target,
            |current| {
                let current = match current {
                    Some(RefValue::Direct(id)) => Some(id),
                    Some(RefValue::Symbolic(_)) => self.resolve(&target)?,
                    None => None,
                };
                if current != expected_old {
                    return Err(Error::RefConflict {
                        name: target.clone(),
                    });
                }
                Ok(())
            },
            new,
        )
    }

    fn create(&self, name: &str, id: ObjectId) -> Result<()> {
        self.write_locked(
            name,
            |current| match current {
                Some(_) => Err(Error::RefExists(name.to_string())),
                None => Ok(()),
            },
            id,
        )
    }
}

/// Exclusive `<ref>.lock` file; removed on drop unless committed.
struct RefLock {
    lock_path: PathBuf,
    target: PathBuf,
    file: Option<File>,
}

impl RefLock {
    fn acquire(target: &Path, name: &str) -> Result<Self> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lock_path = target.as_os_str().to_owned();
        lock_path.push(LOCK_SUFFIX);
        let lock_path = PathBuf::from(lock_path);

        match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
            Ok(file) => Ok(RefLock {
                lock_path,
                target: target.to_path_buf(),
                file: Some(file),
            }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(Error::RefConflict {
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn commit(mut self, content: &str) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&self.lock_path, &self.target)?;
        Ok(())
    }
}

impl Drop for RefLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectKind;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    fn oid(seed: &str) -> ObjectId {
        ObjectId::hash_object(ObjectKind::Blob, seed.as_bytes())
    }

    #[test]
    fn test_create_and_get() {
        let tmp = tempdir().unwrap();
        let refs = FileRefStore::new(tmp.path());

        refs.create("refs/heads/master", oid("a")).unwrap();
        assert_eq!(refs.get("refs/heads/master").unwrap(), Some(oid("a")));
        assert_eq!(refs.get("refs/heads/other").unwrap(), None);
        assert_matches!(
            refs.create("refs/heads/master", oid("b")),
            Err(Error::RefExists(name)) if name == "refs/heads/master"
        );
    }

    #[test]
    fn test_compare_and_set() {
        let tmp = tempdir().unwrap();
        let refs = FileRefStore::new(tmp.path());

        refs.compare_and_set("refs/heads/dev", None, oid("a")).unwrap();
        refs.compare_and_set("refs/heads/dev", Some(oid("a")), oid("b"))
            .unwrap();
        assert_matches!(
            refs.compare_and_set("refs/heads/dev", Some(oid("a")), oid("c")),
            Err(Error::RefConflict { .. })
        );
        assert_eq!(refs.get("refs/heads/dev").unwrap(), Some(oid("b")));
        assert!(!tmp.path().join("refs/heads/dev.lock").exists());
    }

    #[test]
    fn test_held_lock_conflicts() {
        let tmp = tempdir().unwrap();
        let refs = FileRefStore::new(tmp.path());
        fs::create_dir_all(tmp.path().join("refs/heads")).unwrap();
        fs::write(tmp.path().join("refs/heads/busy.lock"), "").unwrap();

        assert_matches!(
            refs.create("refs/heads/busy", oid("a")),
            Err(Error::RefConflict { name }) if name == "refs/heads/busy"
        );
    }

    #[test]
    fn test_symbolic_head() {
        let tmp = tempdir().unwrap();
        let refs = FileRefStore::new(tmp.path());
        refs.set_head_symbolic("refs/heads/master").unwrap();
        assert_eq!(refs.get("HEAD").unwrap(), None);

        refs.create("refs/heads/master", oid("a")).unwrap();
        assert_eq!(refs.get("HEAD").unwrap(), Some(oid("a")));
        assert_eq!(
            refs.head().unwrap(),
            Some(RefValue::Symbolic("refs/heads/master".to_string()))
        );
    }

    #[test]
    fn test_update_through_symbolic_head() {
        let tmp = tempdir().unwrap();
        let refs = FileRefStore::new(tmp.path());
        refs.set_head_symbolic("refs/heads/master").unwrap();

        refs.compare_and_set("HEAD", None, oid("a")).unwrap();
        refs.compare_and_set("HEAD", Some(oid("a")), oid("b")).unwrap();

        assert_eq!(refs.get("refs/heads/master").unwrap(), Some(oid("b")));
        assert_eq!(
            refs.head().unwrap(),
            Some(RefValue::Symbolic("refs/heads/master".to_string()))
        );
        assert_matches!(
            refs.compare_and_set("HEAD", Some(oid("a")), oid("c")),
            Err(Error::RefConflict { name }) if name == "refs/heads/master"
        );
    }

    #[test]
    fn test_list_is_sorted_and_filtered() {
        let tmp = tempdir().unwrap();
        let refs = FileRefStore::new(tmp.path());
        refs.create("refs/tags/v1", oid("t")).unwrap();
        refs.create("refs/heads/zeta", oid("z")).unwrap();
        refs.create("refs/heads/alpha", oid("a")).unwrap();
        refs.create("refs/heads/nested/branch", oid("n")).unwrap();

        let names: Vec<_> = refs
            .list("refs/heads/")
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(
            names,
            vec!["refs/heads/alpha", "refs/heads/nested/branch", "refs/heads/zeta"]
        );
        assert_eq!(refs.list("refs/").unwrap().len(), 4);
    }

    #[test]
    fn test_delete() {
        let tmp = tempdir().unwrap();
        let refs = FileRefStore::new(tmp.path());
        refs.create("refs/heads/gone", oid("a")).unwrap();
        assert_matches!(
            refs.delete("refs/heads/gone", Some(oid("b"))),
            Err(Error::RefConflict { .. })
        );
        refs.delete("refs/heads/gone", Some(oid("a"))).unwrap();
        assert_eq!(refs.get("refs/heads/gone").unwrap(), None);
    }

    #[test]
    fn test_validate_ref_name() {
        assert!(validate_ref_name("refs/heads/master").is_ok());
        assert!(validate_ref_name("HEAD").is_ok());
        assert!(validate_ref_name("refs/tags/v1.0").is_ok());
        for bad in [
            "master",
            "refs/heads/",
            "refs/heads/a..b",
            "refs/heads/a b",
            "refs/heads/x.lock",
            "refs/heads/.hidden",
            "refs/heads/a~1",
            "refs/heads/what?",
        ] {
            assert_matches!(validate_ref_name(bad), Err(Error::InvalidRefName(_)), "{bad}");
        }
    }
}
