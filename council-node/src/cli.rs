use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "council-node")]
#[command(about = "Runs a council round under one of the consensus protocols")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one petition through the council described by a file
    Run {
        #[arg(short, long, value_name = "FILE", default_value = "council.json")]
        config: PathBuf,
        /// Override the file's protocol
        #[arg(short, long)]
        protocol: Option<String>,
        /// Write consensus milestones to this file (defaults to logs/council-<date>.log)
        #[arg(long, value_name = "FILE")]
        audit_log: Option<PathBuf>,
        /// Skip the audit log entirely
        #[arg(long, conflicts_with = "audit_log")]
        no_audit: bool,
        /// Save a snapshot of petitions and results after the round
        #[arg(long, value_name = "FILE")]
        snapshot: Option<PathBuf>,
    },
    /// Print the protocol suited to an element
    Select {
        #[arg(value_name = "ELEMENT")]
        element: Option<String>,
    },
    /// Write a sample council file
    InitConfig {
        #[arg(short, long, value_name = "OUT", default_value = "council.json")]
        out: PathBuf,
        #[arg(short, long)]
        protocol: Option<String>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
