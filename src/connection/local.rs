use crate::advertisement::Advertisement;
use crate::connection::transport::{
    DestinationInfo, Direction, PushCommand, PushReport, RefStatus, Transport,
};
use crate::storage::utils::{HEAD_FILE, REFS_PREFIX};
use crate::storage::{ObjectId, RefStore, Repository, RepositoryInfo};
use crate::{Error, Result};
use log::{debug, info};
use std::path::PathBuf;
use url::Url;

/// Reads another repository on the same filesystem directly.
pub struct LocalTransport {
    url: String,
    repo: Option<Repository>,
    direction: Option<Direction>,
}

impl LocalTransport {
    pub fn new(url: impl Into<String>) -> Self {
        LocalTransport {
            url: url.into(),
            repo: None,
            direction: None,
        }
    }

    fn path(&self) -> Result<PathBuf> {
        if self.url.starts_with("file://") {
            let parsed = Url::parse(&self.url).map_err(Error::transport)?;
            return parsed
                .to_file_path()
                .map_err(|_| Error::transport(format!("`{}` is not a local path", self.url)));
        }
        Ok(PathBuf::from(&self.url))
    }

    fn repo(&self) -> Result<&Repository> {
        self.repo.as_ref().ok_or(Error::NotConnected)
    }

    /// Applies one command on the destination the way a receiving end would.
    fn receive(&self, repo: &Repository, command: &PushCommand) -> Result<Option<String>> {
        let checked_out = repo.current_branch_ref()?;
        if !repo.is_bare() && checked_out.as_deref() == Some(command.remote_ref.as_str()) {
            return Ok(Some("branch is currently checked out".to_string()));
        }

        let outcome = match command.new {
            None => repo.refs().delete(&command.remote_ref, command.old),
            Some(new) => repo
                .refs()
                .compare_and_set(&command.remote_ref, command.old, new),
        };
        match outcome {
            Ok(()) => Ok(None),
            Err(Error::RefConflict { .. }) => Ok(Some("failed to lock".to_string())),
            Err(Error::InvalidRefName(_)) => Ok(Some("funny refname".to_string())),
            Err(e) => Err(e),
        }
    }
}

impl Transport for LocalTransport {
    fn url(&self) -> &str {
        &self.url
    }

    fn connect(&mut self, direction: Direction) -> Result<()> {
        let path = self.path()?;
        let repo = Repository::open(&path).map_err(|e| match e {
            Error::NotARepository(path) => Error::transport(format!(
                "could not find repository at `{}`",
                path.display()
            )),
            other => other,
        })?;
        debug!("opened {} for {direction}", repo.git_dir().display());
        self.repo = Some(repo);
        self.direction = Some(direction);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.repo.is_some()
    }

    fn list_refs(&mut self) -> Result<Advertisement> {
        let repo = self.repo()?;
        let mut raw = Vec::new();
        if let Some(head) = repo.refs().get(HEAD_FILE)? {
            raw.push((HEAD_FILE.to_string(), head));
        }
        raw.extend(repo.refs().list(REFS_PREFIX)?);
        Advertisement::peel_from(raw, repo.objects())
    }

    fn negotiate_and_fetch(&mut self, local: &Repository, wants: &[ObjectId]) -> Result<()> {
        let repo = self.repo()?;
        let copied = repo
            .objects()
            .copy_closure(local.objects(), wants)
            .map_err(|e| match e {
                Error::ObjectMissing(id) => {
                    Error::transport(format!("remote is missing object {id}"))
                }
                other => other,
            })?;
        info!("received {copied} objects from {}", self.url);
        Ok(())
    }

    fn negotiate_and_push(
        &mut self,
        local: &Repository,
        commands: &[PushCommand],
    ) -> Result<PushReport> {
        let repo = self.repo()?;
        let tips: Vec<ObjectId> = commands.iter().filter_map(|c| c.new).collect();

        if let Err(e) = local.objects().copy_closure(repo.objects(), &tips) {
            let message = e.to_string();
            return Ok(PushReport {
                unpack_ok: false,
                refs: commands
                    .iter()
                    .map(|c| RefStatus {
                        name: c.remote_ref.clone(),
                        error: Some("unpacker error".to_string()),
                    })
                    .collect(),
                unpack_message: Some(message),
            });
        }

        let mut refs = Vec::with_capacity(commands.len());
        for command in commands {
            refs.push(RefStatus {
                name: command.remote_ref.clone(),
                error: self.receive(repo, command)?,
            });
        }
        Ok(PushReport {
            unpack_ok: true,
            unpack_message: None,
            refs,
        })
    }

    fn destination_info(&self) -> Result<Option<DestinationInfo>> {
        let repo = self.repo()?;
        Ok(Some(DestinationInfo {
            bare: repo.is_bare(),
            current_branch: repo.current_branch_ref()?,
        }))
    }

    fn close(&mut self) -> Result<()> {
        if let Some(direction) = self.direction.take() {
            debug!("closed {direction} connection to {}", self.url);
        }
        self.repo = None;
        Ok(())
    }
}
