use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::core::config::collection;
use crate::core::types::SourceKind;

#[derive(Parser)]
#[command(name = "reelscout")]
#[command(author, version, about = "Collects and downloads short-form videos from profiles, hashtags and post lists", long_about = None)]
pub struct Cli {
    /// Debug-level logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover videos and print them as JSON
    Collect(CollectArgs),

    /// Download posts into a directory as <shortcode>.mp4
    Download {
        /// Post URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Target directory (defaults to DOWNLOAD_DIR)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Account whose session is used
        #[arg(short, long)]
        account: Option<String>,
    },

    /// Check whether the saved session of an account is still logged in
    ProbeSession {
        /// Account name the session was saved under
        account: String,
    },

    /// Import a logged-in session from a cookie file or local browsers
    ImportCookies {
        /// Account name to save the session under
        account: String,

        /// Netscape cookie file (browser profiles are scanned when omitted)
        #[arg(short, long)]
        from: Option<PathBuf>,
    },
}

#[derive(Args)]
pub struct CollectArgs {
    /// profile, reels, hashtag, keyword or url_list
    pub kind: SourceKind,

    /// Handle, hashtag, keywords or post URLs
    pub identifier: String,

    /// Maximum number of videos
    #[arg(short, long, default_value_t = collection::DEFAULT_CAP)]
    pub cap: usize,

    #[arg(long)]
    pub min_views: Option<u64>,

    #[arg(long)]
    pub min_likes: Option<u64>,

    /// Account whose session is used
    #[arg(short, long)]
    pub account: Option<String>,

    /// File with post ids to skip, one per line
    #[arg(long)]
    pub known_ids: Option<PathBuf>,

    /// Stop at the first strategy that returns anything
    #[arg(long)]
    pub accept_partial: bool,

    /// Overall time budget in seconds
    #[arg(long)]
    pub budget: Option<u64>,

    /// Download the collected videos into this directory
    #[arg(long)]
    pub download: Option<PathBuf>,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
