use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use vox_remote::AutotagOption;

#[derive(Parser, Debug)]
#[clap(version, about = "Talk to remote vox repositories", long_about = None)]
pub struct Cli {
    /// Repository to operate on (defaults to the current directory)
    #[clap(long, global = true)]
    pub repo: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[clap(short, long, global = true)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "List the references a remote advertises")]
    LsRemote { url: String },

    #[command(about = "Download objects and update local references")]
    Fetch {
        /// URL, path, or configured remote name
        url: String,

        refspecs: Vec<String>,

        /// Track into refs/remotes/<name>/ for an unconfigured URL
        #[clap(long)]
        name: Option<String>,

        #[clap(long, value_enum)]
        tags: Option<TagMode>,
    },

    #[command(about = "Update remote references from local ones")]
    Push {
        url: String,

        #[clap(required = true)]
        refspecs: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TagMode {
    Auto,
    All,
    None,
}

impl From<TagMode> for AutotagOption {
    fn from(mode: TagMode) -> Self {
        match mode {
            TagMode::Auto => AutotagOption::Auto,
            TagMode::All => AutotagOption::All,
            TagMode::None => AutotagOption::None,
        }
    }
}
