use crate::config::{PersistentConfig, RepoConfig};
use crate::storage::utils::{CONFIG_FILE, DEFAULT_BRANCH, HEAD_FILE, OBJ_DIR, REFS_DIR, VOX_DIR};
use crate::storage::{FileRefStore, LooseObjectStore, RefValue, RepositoryInfo};
use crate::{Error, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// An on-disk repository: either `<workdir>/.vox/…` or a bare directory
/// holding `HEAD`, `objects/` and `refs/` directly.
#[derive(Debug, Clone)]
pub struct Repository {
    git_dir: PathBuf,
    workdir: Option<PathBuf>,
    objects: LooseObjectStore,
    refs: FileRefStore,
}

impl Repository {
    pub fn init(path: impl AsRef<Path>, bare: bool) -> Result<Self> {
        let path = path.as_ref();
        let git_dir = if bare {
            path.to_path_buf()
        } else {
            path.join(VOX_DIR)
        };

        fs::create_dir_all(git_dir.join(OBJ_DIR))?;
        fs::create_dir_all(git_dir.join(REFS_DIR).join("heads"))?;
        fs::create_dir_all(git_dir.join(REFS_DIR).join("tags"))?;

        let repo = Self::at(git_dir, (!bare).then(|| path.to_path_buf()));
        if repo.refs.head()?.is_none() {
            repo.refs.set_head_symbolic(DEFAULT_BRANCH)?;
        }

        let mut config = repo.config()?;
        config.core.bare = bare;
        repo.save_config(&config)?;

        debug!(
            "initialized {} repository at {}",
            if bare { "bare" } else { "non-bare" },
            path.display()
        );
        Ok(repo)
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let vox_dir = path.join(VOX_DIR);
        if vox_dir.is_dir() {
            return Ok(Self::at(vox_dir, Some(path.to_path_buf())));
        }

        if path.join(HEAD_FILE).is_file() && path.join(OBJ_DIR).is_dir() {
            // Pointed straight at the `.vox` directory of a working tree.
            if path.file_name().is_some_and(|name| name == VOX_DIR) {
                let workdir = path.parent().map(Path::to_path_buf);
                return Ok(Self::at(path.to_path_buf(), workdir));
            }
            return Ok(Self::at(path.to_path_buf(), None));
        }

        Err(Error::NotARepository(path.to_path_buf()))
    }

    fn at(git_dir: PathBuf, workdir: Option<PathBuf>) -> Self {
        Repository {
            objects: LooseObjectStore::new(git_dir.join(OBJ_DIR)),
            refs: FileRefStore::new(&git_dir),
            git_dir,
            workdir,
        }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn workdir(&self) -> Option<&Path> {
        self.workdir.as_deref()
    }

    pub fn objects(&self) -> &LooseObjectStore {
        &self.objects
    }

    pub fn refs(&self) -> &FileRefStore {
        &self.refs
    }

    pub fn config(&self) -> Result<RepoConfig> {
        RepoConfig::read_from_file(&self.git_dir.join(CONFIG_FILE))
    }

    pub fn save_config(&self, config: &RepoConfig) -> Result<()> {
        config.write_to_file(&self.git_dir.join(CONFIG_FILE))
    }
}

impl RepositoryInfo for Repository {
    fn is_bare(&self) -> bool {
        self.workdir.is_none()
    }

    fn current_branch_ref(&self) -> Result<Option<String>> {
        Ok(match self.refs.head()? {
            Some(RefValue::Symbolic(target)) => Some(target),
            _ => None,
        })
    }
}
