use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
pub struct Cli {
    /// Disk image path
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Format a fresh disk image
    Format,
    /// Copy a host file into the file system
    Cp {
        /// Host source file
        source: PathBuf,
        /// Target path inside the image
        target: String,
    },
    /// Print the contents of a file
    Cat { path: String },
    /// List the root directory
    Ls,
    /// Create a directory
    Mkdir { path: String },
    /// Remove a file or directory tree
    Rm { path: String },
    /// Dump the whole file system state
    Print,
}
