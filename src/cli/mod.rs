//! CLI surface: `hearth serve` runs the HTTP server plus the heartbeat;
//! `hearth tasks ...` is a thin operator view over the Task Store.

pub mod tasks;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "hearth", about = "A locally-hosted personal assistant", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server and background heartbeat.
    Serve {
        /// Port to bind the HTTP server on.
        #[arg(long, default_value_t = 8787)]
        port: u16,
    },
    /// Operate on the task queue.
    Tasks {
        #[command(subcommand)]
        command: tasks::TasksCommands,
    },
}
