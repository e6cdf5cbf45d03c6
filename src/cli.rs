use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{
    ModulePolicy, MirrorOptions, MirrorRules, Target, DEFAULT_FOLDER, DEFAULT_TARGET_URL,
    DEFAULT_USER_AGENT,
};

#[derive(Parser, Debug)]
#[command(
    name = "site-mirror",
    about = "Mirror a single published page and its assets for local hosting",
    version,
    long_about = "Fetches one page, downloads every image, stylesheet, script, font and media file it references, rewrites the references to point at the local copies, and writes <public-root>/<folder>/index.html plus an assets/ directory."
)]
pub struct MirrorCommand {
    /// The URL of the page to mirror
    #[arg(default_value = DEFAULT_TARGET_URL)]
    pub url: String,

    /// Folder name for the mirrored bundle
    #[arg(default_value = DEFAULT_FOLDER)]
    pub folder: String,

    /// Directory the bundle folder is created in
    #[arg(short = 'p', long, default_value = "public")]
    pub public_root: PathBuf,

    /// URL prefix used in rewritten references (default: /<folder>)
    #[arg(long)]
    pub public_prefix: Option<String>,

    /// Maximum concurrent downloads per pass
    #[arg(short = 'c', long, default_value = "8", value_parser = clap::value_parser!(u16).range(1..))]
    pub max_concurrent: u16,

    /// Timeout for requests in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// User agent string to use for requests
    #[arg(long, default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// JSON rules file for the site builder (default: built-in Framer rules)
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Point runtime module files back at their remote URLs
    #[arg(long)]
    pub revert_modules: bool,

    /// Replacement for canonical and og:url links (default: /<folder>)
    #[arg(long)]
    pub canonical_path: Option<String>,

    /// Log debug output
    #[arg(short, long)]
    pub verbose: bool,
}

impl MirrorCommand {
    pub fn target(&self) -> Result<Target> {
        Target::new(&self.url, &self.folder, &self.public_root)
    }

    pub fn options(&self, target: &Target) -> MirrorOptions {
        let mut options = MirrorOptions::for_target(target);
        if let Some(prefix) = &self.public_prefix {
            options.public_prefix = prefix.clone();
        }
        if let Some(path) = &self.canonical_path {
            options.canonical_path = path.clone();
        }
        options.user_agent = self.user_agent.clone();
        options.max_concurrent = usize::from(self.max_concurrent);
        options.timeout = self.timeout.map(Duration::from_secs);
        if self.revert_modules {
            options.module_policy = ModulePolicy::Revert;
        }
        options
    }

    pub fn mirror_rules(&self) -> Result<MirrorRules> {
        match &self.rules {
            Some(path) => MirrorRules::load(path),
            None => Ok(MirrorRules::framer()),
        }
    }
}
