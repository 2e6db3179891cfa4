//! The remote: a named or anonymous peer repository, its refspecs and tag
//! policy, and the connection to it.

pub mod fetch;
pub mod push;

pub use fetch::{RejectReason, TipMapping, TipUpdate, TipUpdateReport};
pub use push::{PushOutcome, PushSession, PushStatus};

use crate::advertisement::Advertisement;
use crate::config::RemoteConfig;
use crate::connection::{self, Direction, Transport};
use crate::refspec::{Refspec, ShorthandTarget};
use crate::storage::refs::validate_ref_name;
use crate::storage::utils::{HEADS_PREFIX, REMOTES_PREFIX};
use crate::storage::{ObjectId, ObjectStore, Repository};
use crate::{Error, Result};
use fetch::{apply_tips, autotag_candidates, map_refspecs, merge_mappings};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Which tags a fetch brings in beyond what the refspecs name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutotagOption {
    /// Only tags a refspec matches.
    None,
    /// Tags pointing into history the fetch brings in or already has.
    #[default]
    Auto,
    /// Every advertised tag.
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting(Direction),
    Connected(Direction),
}

pub struct Remote<'r> {
    repo: &'r Repository,
    name: Option<String>,
    url: String,
    transport: Box<dyn Transport + Send>,
    refspecs: Vec<Refspec>,
    push_refspecs: Vec<Refspec>,
    /// Set by `clear_refspecs`; shorthand fetches then bypass tracking refs.
    cleared: bool,
    autotag: AutotagOption,
    state: ConnectionState,
    advertisement: Option<Advertisement>,
}

impl<'r> Remote<'r> {
    /// An unnamed remote with no refspecs; nothing is written to the config.
    pub fn create_anonymous(repo: &'r Repository, url: &str) -> Result<Self> {
        Ok(Self::with_transport(repo, None, url, connection::for_url(url)?))
    }

    /// Adds `[[remote]] name` to the repository config with the default
    /// tracking refspec.
    pub fn create(repo: &'r Repository, name: &str, url: &str) -> Result<Self> {
        if name.is_empty() || validate_ref_name(&format!("{REMOTES_PREFIX}{name}/HEAD")).is_err() {
            return Err(Error::Config(format!("invalid remote name `{name}`")));
        }

        let default_spec = format!("+{HEADS_PREFIX}*:{REMOTES_PREFIX}{name}/*");
        let mut remote = Self::with_transport(repo, Some(name), url, connection::for_url(url)?);
        remote.add_fetch(&default_spec)?;

        let mut config = repo.config()?;
        config.add_remote(remote.to_config())?;
        repo.save_config(&config)?;
        debug!("created remote {name} -> {url}");
        Ok(remote)
    }

    pub fn lookup(repo: &'r Repository, name: &str) -> Result<Self> {
        let config = repo.config()?;
        let entry = config
            .find_remote(name)
            .ok_or_else(|| Error::RemoteNotFound(name.to_string()))?;

        let mut remote = Self::with_transport(
            repo,
            Some(name),
            &entry.url,
            connection::for_url(&entry.url)?,
        );
        for spec in &entry.fetch {
            remote.add_fetch(spec)?;
        }
        for spec in &entry.push {
            remote.add_push(spec)?;
        }
        remote.autotag = entry.tagopt.unwrap_or_default();
        Ok(remote)
    }

    /// A remote over a caller-supplied transport.
    pub fn with_transport(
        repo: &'r Repository,
        name: Option<&str>,
        url: &str,
        transport: Box<dyn Transport + Send>,
    ) -> Self {
        Remote {
            repo,
            name: name.map(str::to_string),
            url: url.to_string(),
            transport,
            refspecs: Vec::new(),
            push_refspecs: Vec::new(),
            cleared: false,
            autotag: AutotagOption::default(),
            state: ConnectionState::Disconnected,
            advertisement: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn repository(&self) -> &'r Repository {
        self.repo
    }

    pub fn refspecs(&self) -> &[Refspec] {
        &self.refspecs
    }

    pub fn push_refspecs(&self) -> &[Refspec] {
        &self.push_refspecs
    }

    pub fn add_fetch(&mut self, text: &str) -> Result<()> {
        self.refspecs.push(Refspec::parse(text, Direction::Fetch)?);
        Ok(())
    }

    pub fn add_push(&mut self, text: &str) -> Result<()> {
        self.push_refspecs.push(Refspec::parse(text, Direction::Push)?);
        Ok(())
    }

    /// Drops the fetch refspecs. Shorthand refspecs added afterwards write
    /// straight into `refs/heads/` instead of a tracking namespace.
    pub fn clear_refspecs(&mut self) {
        self.refspecs.clear();
        self.cleared = true;
    }

    pub fn autotag(&self) -> AutotagOption {
        self.autotag
    }

    pub fn set_autotag(&mut self, option: AutotagOption) {
        self.autotag = option;
    }

    /// Writes the current refspecs and tag policy back to the config.
    pub fn save(&self) -> Result<()> {
        let name = self
            .name
            .as_deref()
            .ok_or_else(|| Error::Config("an anonymous remote cannot be saved".to_string()))?;
        let mut config = self.repo.config()?;
        let entry = config
            .remote
            .iter_mut()
            .find(|entry| entry.name == name)
            .ok_or_else(|| Error::RemoteNotFound(name.to_string()))?;
        *entry = self.to_config();
        self.repo.save_config(&config)
    }

    fn to_config(&self) -> RemoteConfig {
        RemoteConfig {
            name: self.name.clone().unwrap_or_default(),
            url: self.url.clone(),
            fetch: self.refspecs.iter().map(ToString::to_string).collect(),
            push: self.push_refspecs.iter().map(ToString::to_string).collect(),
            tagopt: (self.autotag != AutotagOption::default()).then_some(self.autotag),
        }
    }

    pub(crate) fn shorthand_target(&self) -> ShorthandTarget {
        match &self.name {
            Some(name) if !self.cleared => ShorthandTarget::Tracking(name.clone()),
            _ => ShorthandTarget::LocalBranches,
        }
    }

    /// The tag policy in effect. Without a tracking namespace only `All`
    /// brings in tags a refspec did not name.
    fn effective_autotag(&self) -> AutotagOption {
        match (self.autotag, self.shorthand_target()) {
            (AutotagOption::Auto, ShorthandTarget::LocalBranches) => AutotagOption::None,
            (policy, _) => policy,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Opens the transport and snapshots what the remote advertises.
    ///
    /// Connecting again in the same direction is a no-op; the other direction
    /// replaces the connection.
    pub fn connect(&mut self, direction: Direction) -> Result<()> {
        match self.state {
            ConnectionState::Connected(current)
                if current == direction && self.transport.is_connected() =>
            {
                return Ok(());
            }
            ConnectionState::Disconnected => {}
            _ => self.disconnect(),
        }

        self.state = ConnectionState::Connecting(direction);
        debug!("connecting to {} for {direction}", self.url);
        let listed = self
            .transport
            .connect(direction)
            .and_then(|()| self.transport.list_refs());

        match listed {
            Ok(advertisement) => {
                debug!("{} advertised {} refs", self.url, advertisement.len());
                self.advertisement = Some(advertisement);
                self.state = ConnectionState::Connected(direction);
                Ok(())
            }
            Err(e) => {
                self.disconnect();
                Err(e)
            }
        }
    }

    pub fn connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected(_)) && self.transport.is_connected()
    }

    pub fn direction(&self) -> Option<Direction> {
        match self.state {
            ConnectionState::Connected(direction) => Some(direction),
            _ => None,
        }
    }

    /// Releases the transport. Safe in any state; the advertisement snapshot
    /// stays readable.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected && !self.transport.is_connected() {
            return;
        }
        if let Err(e) = self.transport.close() {
            warn!("closing connection to {} failed: {e}", self.url);
        }
        self.state = ConnectionState::Disconnected;
        debug!("disconnected from {}", self.url);
    }

    /// The refs the remote advertised on the last connection.
    pub fn ls(&self) -> Result<&Advertisement> {
        self.advertisement.as_ref().ok_or(Error::NotConnected)
    }

    pub(crate) fn require(&self, direction: Direction) -> Result<&Advertisement> {
        match self.state {
            ConnectionState::Connected(actual) if actual != direction => {
                Err(Error::WrongDirection {
                    expected: direction,
                    actual,
                })
            }
            ConnectionState::Connected(_) if self.transport.is_connected() => self.ls(),
            _ => Err(Error::NotConnected),
        }
    }

    pub(crate) fn transport_mut(&mut self) -> &mut (dyn Transport + Send) {
        self.transport.as_mut()
    }

    pub(crate) fn transport(&self) -> &(dyn Transport + Send) {
        self.transport.as_ref()
    }

    /// Transfers the objects the refspecs and tag policy call for.
    pub fn download(&mut self) -> Result<()> {
        let advertisement = self.require(Direction::Fetch)?;
        let objects = self.repo.objects();

        let mappings = map_refspecs(advertisement, &self.refspecs, &self.shorthand_target());
        let mut wants: Vec<ObjectId> = mappings.iter().map(|m| m.id).collect();
        let wanted: HashSet<ObjectId> = wants.iter().copied().collect();
        let tags = autotag_candidates(advertisement, self.effective_autotag(), |_, target| {
            wanted.contains(&target) || objects.has(&target)
        });
        wants.extend(tags.iter().map(|t| t.id));

        let mut seen = HashSet::new();
        wants.retain(|id| !objects.has(id) && seen.insert(*id));
        debug!("{} objects wanted from {}", wants.len(), self.url);

        if let Err(e) = self.transport.negotiate_and_fetch(self.repo, &wants) {
            self.disconnect();
            return Err(e);
        }
        Ok(())
    }

    /// Moves local refs to what the last advertisement says, under the
    /// refspecs and tag policy.
    pub fn update_tips(&self) -> Result<TipUpdateReport> {
        let advertisement = self.ls()?;
        let objects = self.repo.objects();

        let mappings = map_refspecs(advertisement, &self.refspecs, &self.shorthand_target());
        let tags = autotag_candidates(advertisement, self.effective_autotag(), |tag, target| {
            objects.has(&tag) && objects.has(&target)
        });
        let mappings = merge_mappings(mappings, tags);

        let updates = apply_tips(objects, self.repo.refs(), &mappings)?;
        let sources: HashSet<&str> = mappings.iter().map(|m| m.source.as_str()).collect();
        let skipped = advertisement
            .refs()
            .filter(|head| !sources.contains(head.name.as_str()))
            .map(|head| head.name.clone())
            .collect();

        let report = TipUpdateReport { updates, skipped };
        info!(
            "updated {} refs from {}, {} rejected",
            report.changed(),
            self.url,
            report.rejected().count()
        );
        Ok(report)
    }

    /// Connect, download, update tips and disconnect.
    pub fn fetch(&mut self) -> Result<TipUpdateReport> {
        self.connect(Direction::Fetch)?;
        let report = self.download().and_then(|()| self.update_tips());
        self.disconnect();
        report
    }

    /// Starts a push over the current push connection, seeded with the
    /// configured push refspecs.
    pub fn push(&mut self) -> Result<PushSession<'_, 'r>> {
        self.require(Direction::Push)?;
        let refspecs = self.push_refspecs.clone();
        Ok(PushSession::new(self, refspecs))
    }
}

impl Drop for Remote<'_> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
