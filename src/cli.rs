use clap::Parser;
use std::path::PathBuf;

use crate::supervisor::DEFAULT_MAX_RESTARTS;

#[derive(Debug, Clone, Parser)]
#[command(name = "dev-stress")]
#[command(
    about = "Walk a device namespace and exercise every node with bounded control-code probes"
)]
pub struct Cli {
    /// Parallel instances, each with its own supervised worker (0 = one per CPU).
    #[arg(short = 'n', long, value_name = "N", default_value_t = 1)]
    pub instances: u32,

    /// Stop after this many seconds.
    #[arg(short = 't', long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Stop each instance after this many bogo operations.
    #[arg(long, value_name = "N")]
    pub ops: Option<u64>,

    /// Device namespace to walk [env: DEV_STRESS_ROOT] [default: /dev].
    #[arg(long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Registry tree used to detect SCSI-backed block devices.
    #[arg(long, value_name = "DIR")]
    pub scsi_root: Option<PathBuf>,

    /// Worker restarts allowed per instance after crashes or OOM kills.
    #[arg(long, value_name = "N", default_value_t = DEFAULT_MAX_RESTARTS)]
    pub max_restarts: u32,

    #[arg(short, long)]
    pub verbose: bool,
}
