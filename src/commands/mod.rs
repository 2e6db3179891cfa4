pub mod fetch;
pub mod ls_remote;
pub mod push;

use anyhow::{Context, Result};
use vox_remote::connection::{self, Transport};
use vox_remote::{Remote, Repository};

/// A configured remote if `url` names one, otherwise an anonymous remote on
/// the URL itself.
pub(crate) fn open_remote<'r>(repo: &'r Repository, url: &str) -> Result<Remote<'r>> {
    let configured = repo
        .config()
        .context("Failed to read repository config")?
        .find_remote(url)
        .is_some();
    if configured {
        return Remote::lookup(repo, url).with_context(|| format!("Failed to load remote {url}"));
    }
    Remote::create_anonymous(repo, url).with_context(|| format!("Unsupported remote {url}"))
}

/// An unsaved remote with a name, so shorthand refspecs track under it.
pub(crate) fn named_remote<'r>(repo: &'r Repository, name: &str, url: &str) -> Result<Remote<'r>> {
    let transport: Box<dyn Transport + Send> =
        connection::for_url(url).with_context(|| format!("Unsupported remote {url}"))?;
    Ok(Remote::with_transport(repo, Some(name), url, transport))
}
