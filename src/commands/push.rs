use super::open_remote;
use anyhow::{Context, Result, bail};
use colored::Colorize;
use vox_remote::{Direction, PushOutcome, Repository};

pub fn push_command(repo: &Repository, url: &str, refspecs: &[String]) -> Result<()> {
    let mut remote = open_remote(repo, url)?;
    remote
        .connect(Direction::Push)
        .with_context(|| format!("Failed to connect to {url}"))?;

    let mut session = remote.push()?;
    for spec in refspecs {
        session
            .add_refspec(spec)
            .with_context(|| format!("Invalid refspec {spec}"))?;
    }
    session
        .finish()
        .with_context(|| format!("Failed to push to {url}"))?;

    println!("To {url}");
    let mut failed = 0;
    for status in session.statuses() {
        let local = status.local.as_deref().unwrap_or("(delete)");
        match &status.outcome {
            PushOutcome::Accepted => {
                println!(" {} {local} -> {}", "*".green(), status.remote);
            }
            PushOutcome::UpToDate => {
                println!(" {} {local} -> {}", "= [up to date]".dimmed(), status.remote);
            }
            PushOutcome::Rejected(reason) => {
                failed += 1;
                println!(
                    " {} {local} -> {} ({reason})",
                    "! [rejected]".red(),
                    status.remote
                );
            }
        }
    }

    if !session.unpack_ok() {
        bail!("remote failed to unpack the pushed objects");
    }
    if failed > 0 {
        bail!("failed to push {failed} reference(s)");
    }
    Ok(())
}
