use super::open_remote;
use anyhow::{Context, Result};
use colored::Colorize;
use vox_remote::{Direction, Repository};

pub fn ls_remote_command(repo: &Repository, url: &str) -> Result<()> {
    let mut remote = open_remote(repo, url)?;
    remote
        .connect(Direction::Fetch)
        .with_context(|| format!("Failed to connect to {url}"))?;
    remote.disconnect();

    let advertisement = remote.ls()?;
    for head in advertisement {
        println!("{}\t{}", head.id.to_string().yellow(), head.name);
    }
    for (name, id) in advertisement.dropped() {
        eprintln!(
            "{}",
            format!("warning: skipped {name} ({id}): object is missing").red()
        );
    }
    Ok(())
}
