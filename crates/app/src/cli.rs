use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::lab::{self, LabCliArgs, LabConfig, SweepArgs, SweepConfig, TelemetryOptions};

#[derive(Debug, Parser)]
#[command(name = "face-lab", version, about = "Live face capture with JPEG/WebP fidelity metrics")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the capture pipeline and HTTP server until interrupted.
    Serve(LabCliArgs),
    /// Print size, PSNR and SSIM for each codec across a range of qualities.
    Sweep(SweepArgs),
}

pub fn handle_commands(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => lab::run(LabConfig::try_from(args)?),
        Command::Sweep(args) => {
            let config = SweepConfig::try_from(args)?;
            let _telemetry = lab::install_telemetry(&TelemetryOptions::default());
            lab::run_sweep(config)
        }
    }
}
