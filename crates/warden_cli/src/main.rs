//! WARDEN CLI
//!
//! Evaluation command invoked by `warden-server`. Results go to stdout,
//! diagnostics to stderr.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use warden_policy::InputRole;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "WARDEN - policy evaluation command", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print CLI and library versions
    Version,
    /// Evaluate one built-in matcher function
    Match {
        /// Function name, e.g. keyMatch2
        function: String,
        /// Request-side value
        subject: String,
        /// Policy-side pattern
        pattern: String,
    },
    /// Assemble a context and print a JSON summary of it
    Inspect {
        /// Model file path or inline model text
        #[arg(short, long)]
        model: String,
        /// Policy file path or inline policy text
        #[arg(short, long)]
        policy: String,
        /// Directory for staged inputs
        #[arg(long)]
        staging_dir: Option<PathBuf>,
    },
    /// Stage an input as a file and print its path
    Stage {
        /// What the input describes
        #[arg(short, long, value_enum)]
        role: Role,
        /// File path or inline text
        input: String,
        /// Directory for the staged file
        #[arg(long)]
        staging_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Role {
    Model,
    Policy,
}

impl From<Role> for InputRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Model => InputRole::Model,
            Role::Policy => InputRole::Policy,
        }
    }
}

fn main() -> Result<()> {
    color_eyre::config::HookBuilder::default()
        .display_location_section(false)
        .display_env_section(false)
        .install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let output = match cli.command {
        Commands::Version => commands::version(),
        Commands::Match {
            function,
            subject,
            pattern,
        } => commands::match_function(&function, &subject, &pattern)?,
        Commands::Inspect {
            model,
            policy,
            staging_dir,
        } => commands::inspect(&model, &policy, staging_dir.as_deref())?,
        Commands::Stage {
            role,
            input,
            staging_dir,
        } => commands::stage(role.into(), &input, staging_dir.as_deref())?,
    };
    println!("{output}");

    Ok(())
}
