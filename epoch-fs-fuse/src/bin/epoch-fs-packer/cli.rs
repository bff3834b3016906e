use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(version, about = "Build and inspect epoch-fs images")]
pub struct Cli {
    /// Image file
    #[arg(long, short, global = true, default_value = "fs.img")]
    pub image: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Format a new image and copy a host directory into it
    Pack {
        /// Host directory to copy
        #[arg(long, short)]
        source: PathBuf,

        /// Image size in MiB
        #[arg(long, default_value_t = 64)]
        size: u64,

        /// Store every packed entry as a versioned file
        #[arg(long)]
        versioned: bool,
    },

    /// Copy a host file into the image, adding a version if it is versioned
    Put {
        /// Host file
        host: PathBuf,

        /// Destination path inside the image
        path: String,

        #[arg(long)]
        versioned: bool,
    },

    /// List a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,

        /// Browse the image as it was at this timestamp
        #[arg(long, short = 't')]
        at: Option<u32>,
    },

    /// Print a file to stdout
    Cat {
        path: String,

        #[arg(long, short = 't')]
        at: Option<u32>,
    },

    /// Show the versions of a file, or restore it to an earlier timestamp
    Track {
        path: String,

        /// Make the version visible at this timestamp current again
        #[arg(long, short = 't')]
        restore: Option<u32>,
    },

    /// Go back to the version before the current one
    Undo { path: String },
}
