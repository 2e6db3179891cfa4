use crate::cli::{Cli, Commands};
use crate::commands::{fetch::fetch_command, ls_remote::ls_remote_command, push::push_command};
use anyhow::{Context, Result};
use std::path::Path;
use vox_remote::Repository;

pub fn handle_command(cli: Cli) -> Result<()> {
    let repo_path = match cli.repo {
        Some(path) => path,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command {
        Commands::LsRemote { url } => {
            let repo = open_repository(&repo_path)?;
            ls_remote_command(&repo, &url)?;
        }
        Commands::Fetch {
            url,
            refspecs,
            name,
            tags,
        } => {
            let repo = open_repository(&repo_path)?;
            fetch_command(&repo, &url, &refspecs, name.as_deref(), tags.map(Into::into))?;
        }
        Commands::Push { url, refspecs } => {
            let repo = open_repository(&repo_path)?;
            push_command(&repo, &url, &refspecs)?;
        }
    }

    Ok(())
}

fn open_repository(path: &Path) -> Result<Repository> {
    Repository::open(path)
        .with_context(|| format!("Failed to open repository at {}", path.display()))
}
