// Dotlock
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Dotlock CLI Tool
//!
//! Command-line collaborator for the dotlock engine: replays predefined
//! scenarios, runs detection and resolution, and prints snapshots and
//! reports for inspection.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "dotlock")]
#[command(about = "Dotlock - Deadlock Detection CLI")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the predefined scenario catalog
    Scenarios {
        /// Emit the catalog as JSON
        #[arg(long)]
        json: bool,
    },
    /// Replay a named scenario and run detection on the result
    Run {
        /// Scenario name (see `dotlock scenarios`)
        name: String,
        /// Apply a resolution plan when a deadlock is detected
        #[arg(long)]
        resolve: bool,
        /// Emit the report as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scenarios { json } => commands::scenarios::run(json),
        Commands::Run { name, resolve, json } => commands::run::run(&name, resolve, json),
    }
}
