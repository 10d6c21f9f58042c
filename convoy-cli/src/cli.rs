//! CLI argument definitions

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(about = "Run a group of containers sharing one network namespace", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a manifest and supervise the group until interrupted
    Run(RunArgs),

    /// Check a manifest without starting anything
    Validate(ValidateArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Manifest file (YAML or JSON); reads stdin when omitted or "-"
    pub manifest: Option<PathBuf>,

    /// Directory under which group volumes are created
    #[arg(long, env = "CONVOY_VOLUME_ROOT", default_value = "/export")]
    pub volume_root: PathBuf,

    /// Seconds a container gets to stop before it is killed
    #[arg(long, env = "CONVOY_GRACE_SECS", default_value_t = 10)]
    pub grace_secs: u64,

    /// Restarts allowed before a container is given up on
    #[arg(long, env = "CONVOY_MAX_RESTARTS", default_value_t = 5)]
    pub max_restarts: u32,

    /// Docker binary
    #[arg(long, env = "CONVOY_DOCKER", default_value = "docker")]
    pub docker: PathBuf,
}

#[derive(Args)]
pub struct ValidateArgs {
    /// Manifest file (YAML or JSON); reads stdin when omitted or "-"
    pub manifest: Option<PathBuf>,

    /// Print the normalized group as JSON
    #[arg(long)]
    pub json: bool,
}
