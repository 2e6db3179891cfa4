use super::{named_remote, open_remote};
use anyhow::{Context, Result, bail};
use colored::Colorize;
use vox_remote::storage::utils::{HEADS_PREFIX, REMOTES_PREFIX};
use vox_remote::{AutotagOption, Repository, TipUpdate};

pub fn fetch_command(
    repo: &Repository,
    url: &str,
    refspecs: &[String],
    name: Option<&str>,
    tags: Option<AutotagOption>,
) -> Result<()> {
    let mut remote = match name {
        Some(name) => {
            let mut remote = named_remote(repo, name, url)?;
            if refspecs.is_empty() {
                remote.add_fetch(&format!("+{HEADS_PREFIX}*:{REMOTES_PREFIX}{name}/*"))?;
            }
            remote
        }
        None => open_remote(repo, url)?,
    };

    // Refspecs given on the command line replace the configured ones.
    if !refspecs.is_empty() {
        if !remote.refspecs().is_empty() {
            remote.clear_refspecs();
        }
        for spec in refspecs {
            remote
                .add_fetch(spec)
                .with_context(|| format!("Invalid refspec {spec}"))?;
        }
    }
    if let Some(tags) = tags {
        remote.set_autotag(tags);
    }

    let report = remote
        .fetch()
        .with_context(|| format!("Failed to fetch from {url}"))?;

    println!("From {}", remote.url());
    for update in &report.updates {
        match update {
            TipUpdate::Created { name, .. } => {
                println!(" {} {name}", "* [new]".green());
            }
            TipUpdate::Updated {
                name,
                old,
                new,
                forced: false,
            } => {
                println!("   {}..{}  {name}", &old.to_hex()[..7], &new.to_hex()[..7]);
            }
            TipUpdate::Updated {
                name, old, new, ..
            } => {
                println!(
                    " {} {}...{}  {name} (forced update)",
                    "+".yellow(),
                    &old.to_hex()[..7],
                    &new.to_hex()[..7]
                );
            }
            TipUpdate::Unchanged { .. } => {}
            TipUpdate::Rejected { name, reason, .. } => {
                println!(" {} {name} ({reason})", "! [rejected]".red());
            }
        }
    }

    let rejected = report.rejected().count();
    if rejected > 0 {
        bail!("{rejected} reference(s) were not updated");
    }
    Ok(())
}
