//! Transports: the backends a [`crate::Remote`] talks through.

pub mod git;
pub mod http;
pub mod local;
pub mod protocol;
pub mod transport;

pub use git::GitTransport;
pub use http::HttpTransport;
pub use local::LocalTransport;
pub use transport::{Direction, DestinationInfo, PushCommand, PushReport, RefStatus, Transport};

use crate::storage::objects::pack::PackBuilder;
use crate::storage::{ObjectId, ObjectStore, Repository};
use crate::{Error, Result};
use log::debug;
use std::collections::HashSet;
use url::Url;

/// Picks the backend for `url`: `git://`, `http(s)://`, or a local path
/// (plain or `file://`).
pub fn for_url(url: &str) -> Result<Box<dyn Transport + Send>> {
    match Url::parse(url) {
        Ok(parsed) => match parsed.scheme() {
            "git" => Ok(Box::new(GitTransport::new(url)?)),
            "http" | "https" => Ok(Box::new(HttpTransport::new(url)?)),
            "file" => Ok(Box::new(LocalTransport::new(url))),
            // Windows drive letters parse as a one-letter scheme.
            scheme if scheme.len() == 1 => Ok(Box::new(LocalTransport::new(url))),
            scheme => Err(Error::transport(format!("unsupported URL scheme `{scheme}`"))),
        },
        Err(_) => Ok(Box::new(LocalTransport::new(url))),
    }
}

/// Pack of what the destination needs for `commands`, given the tips it
/// advertised. `None` when every command is a deletion.
pub(crate) fn pack_for_push(
    local: &Repository,
    remote_tips: &[ObjectId],
    commands: &[PushCommand],
) -> Result<Option<Vec<u8>>> {
    let tips: Vec<ObjectId> = commands.iter().filter_map(|c| c.new).collect();
    if tips.is_empty() {
        return Ok(None);
    }

    let known: Vec<ObjectId> = remote_tips
        .iter()
        .copied()
        .filter(|id| local.objects().has(id))
        .collect();
    let exclude: HashSet<ObjectId> = local
        .objects()
        .collect_closure(&known, &HashSet::new())?
        .into_iter()
        .collect();

    let ids = local.objects().collect_closure(&tips, &exclude)?;
    let mut builder = PackBuilder::new();
    builder.add_from_store(local.objects(), &ids)?;
    debug!("sending pack with {} objects", builder.len());
    Ok(Some(builder.finish()?))
}
