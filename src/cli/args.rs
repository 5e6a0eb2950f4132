use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Content-addressed cache and fetch coordination for vendored source trees.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Location of the cache directory [default: $HOME/.vendorsync/cache]
    #[clap(short, long, global = true)]
    pub cache_directory: Option<PathBuf>,
    /// Maximum number of parallel fetches [default: 10]
    #[clap(short, long, global = true)]
    pub jobs: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    ///Prints the cache key of a JSON document
    Key { json: String },
    ///Exits successfully if the cache holds an entry for the key
    Has { key: String },
    ///Stores a copy of a directory under the key
    Put { key: String, directory: PathBuf },
    ///Restores the entry for the key into a directory
    Get {
        key: String,
        directory: PathBuf,
        /// Only restore paths matching this glob (repeatable)
        #[clap(long)]
        pick: Vec<String>,
        /// Skip paths matching this glob (repeatable)
        #[clap(long)]
        exclude: Vec<String>,
    },
    ///Archives a directory and prints the hash of the archive
    PutTree { directory: PathBuf },
    ///Unpacks an archived tree into a directory
    GetTree { hash: String, directory: PathBuf },
    ///Prints the paths matched by a glob pattern
    Glob {
        pattern: String,
        #[clap(required = true)]
        paths: Vec<String>,
    },
    ///Removes every cache entry and archived tree
    ClearCache,
}
