use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "Resource catalog resolution and cached archive fetching",
    long_about = "Resolves resources against a remote catalog and fetches single files\n\
                  out of their release archives through a tiered cache (memory, disk,\n\
                  optional remote). Archives are downloaded once, validated, and served\n\
                  from cache on every later request."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Base URL of the catalog service
    #[arg(long, help = "Catalog service base URL (default: https://git.door43.org)")]
    pub catalog_url: Option<String>,

    /// Release stage filter for catalog queries
    #[arg(long, default_value = "prod", help = "Release stage to search (prod, preprod, latest)")]
    pub stage: String,

    /// Directory for the disk cache tier
    #[arg(long, help = "Disk cache directory (default: a per-user temp directory)")]
    pub cache_dir: Option<PathBuf>,

    /// Base URL of a remote cache tier
    #[arg(long, help = "Remote key/value cache endpoint, if this deployment has one")]
    pub remote_cache: Option<String>,

    /// Disable all cache tiers
    #[arg(long, help = "Disable caching entirely (every request goes to origin)")]
    pub no_cache: bool,

    /// Bypass cache reads for this invocation
    #[arg(
        long,
        help = "Skip cache reads but still write results back (staleness recovery)"
    )]
    pub force_refresh: bool,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Print the per-request fetch trace as JSON
    #[arg(long, help = "Print the fetch trace (tiers and URLs tried) as JSON to stderr")]
    pub trace: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve catalog entries matching a filter
    Resolve {
        /// Organization(s) to search; repeat for fan-out, omit for all
        #[arg(short, long, help = "Organization owner(s); repeatable, omit to search all")]
        organization: Vec<String>,

        /// Language code
        #[arg(short, long, help = "Language code (e.g. en)")]
        language: String,

        /// Subject
        #[arg(short, long, help = "Subject (e.g. Bible, \"Translation Notes\")")]
        subject: String,
    },

    /// Fetch one file out of a resolved entry's archive
    Get {
        /// Organization owning the resource
        #[arg(short, long, help = "Organization owner (e.g. unfoldingWord)")]
        organization: String,

        /// Language code
        #[arg(short, long, help = "Language code (e.g. en)")]
        language: String,

        /// Subject
        #[arg(short, long, help = "Subject (e.g. Bible)")]
        subject: String,

        /// Logical content identifier (e.g. a book code)
        #[arg(
            short,
            long,
            conflicts_with = "path",
            help = "Content identifier resolved through the entry's ingredient map (e.g. gen)"
        )]
        ingredient: Option<String>,

        /// Exact path inside the archive
        #[arg(short, long, help = "Exact inner path (e.g. 51-GEN.usfm)")]
        path: Option<String>,

        /// Write the bytes here instead of stdout
        #[arg(short = 'O', long, help = "Output file (default: stdout)")]
        output: Option<PathBuf>,
    },
}
