use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "unifs")]
#[command(version)]
#[command(about = "Uniform virtual filesystem toolbox", long_about = None)]
pub struct Args {
    /// Log filter (e.g. "debug", "unifs=trace")
    #[arg(long, global = true, value_name = "FILTER")]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List directory contents
    Ls {
        /// URL to list (e.g. /tmp, memory://data, filecache::...)
        url: String,

        /// Show type, size and mtime columns
        #[arg(short, long)]
        long: bool,
    },
    /// Print file contents to stdout
    Cat {
        /// URL of the file
        url: String,

        /// Start offset (negative counts from the end)
        #[arg(long)]
        start: Option<i64>,

        /// End offset (negative counts from the end)
        #[arg(long)]
        end: Option<i64>,
    },
    /// Write stdin to a file
    Pipe {
        /// Destination URL
        url: String,
    },
    /// Copy files or trees
    Cp {
        /// Source URL (file, directory or glob)
        src: String,

        /// Destination URL; trailing slash means "into this directory"
        dst: String,

        /// Descend into directory sources
        #[arg(short, long)]
        recursive: bool,

        /// Cap recursion depth
        #[arg(long, value_name = "DEPTH")]
        max_depth: Option<usize>,

        /// Create missing intermediate directories
        #[arg(long)]
        auto_mkdir: bool,
    },
    /// Move or rename
    Mv {
        src: String,
        dst: String,

        /// Descend into directory sources
        #[arg(short, long)]
        recursive: bool,
    },
    /// Remove files or trees
    Rm {
        /// URLs to remove (files, directories or globs)
        #[arg(required = true)]
        urls: Vec<String>,

        /// Remove directories and their contents
        #[arg(short, long)]
        recursive: bool,

        /// Cap recursion depth
        #[arg(long, value_name = "DEPTH")]
        max_depth: Option<usize>,
    },
    /// Total size of a tree
    Du {
        url: String,

        /// Cap recursion depth
        #[arg(long, value_name = "DEPTH")]
        max_depth: Option<usize>,
    },
    /// Find files matching a glob pattern
    Glob {
        /// Pattern (supports *, ?, [abc], **)
        pattern: String,
    },
    /// Show metadata for one path
    Info {
        url: String,
    },
    /// List registered protocols
    Protocols,
}
