// misrecon CLI - reconcile insurer MIS reports against internal and offline records

mod exit_codes;
mod profiles;
mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_codes::{recon_exit_code, EXIT_SUCCESS};
use misrecon_recon::ReconError;

#[derive(Parser)]
#[command(name = "misrecon")]
#[command(about = "Reconcile insurer MIS reports against internal and offline records")]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug). RUST_LOG overrides.
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile one or more MIS files
    #[command(after_help = "\
Examples:
  misrecon run -c motor.recon.toml --internal booked.xlsx --mis reliance_may.xlsx
  misrecon run -c motor.recon.toml --internal booked.csv --offline offline.csv \\
      --mis reliance.xlsx --mis uiic.csv --json
  misrecon run -c motor.recon.toml --internal booked.csv --mis dump.xlsx --insurer Kotak
  misrecon run -c motor.recon.toml --internal booked.csv --mis r.csv --fields premium_amount,customer_name")]
    Run(run::RunArgs),

    /// Validate a recon config without running
    #[command(after_help = "\
Examples:
  misrecon validate motor.recon.toml")]
    Validate {
        /// Path to the .recon.toml config file
        config: PathBuf,
    },

    /// List insurer profiles, or show which profile a name resolves to
    #[command(after_help = "\
Examples:
  misrecon profiles motor.recon.toml
  misrecon profiles motor.recon.toml --json
  misrecon profiles motor.recon.toml --resolve \"United India Insurance Co. Ltd\"")]
    Profiles {
        /// Path to the .recon.toml config file
        config: PathBuf,

        /// Insurer name or file name to resolve
        #[arg(long, value_name = "HINT")]
        resolve: Option<String>,

        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => run::cmd_run(args),
        Commands::Validate { config } => profiles::cmd_validate(config),
        Commands::Profiles { config, resolve, json } => profiles::cmd_profiles(config, resolve, json),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn new(code: u8, msg: impl Into<String>) -> Self {
        Self { code, message: msg.into(), hint: None }
    }

    /// Error from the engine with its registered exit code.
    pub fn recon(err: &ReconError) -> Self {
        let hint = match err {
            ReconError::UnknownInsurer { .. } => {
                Some("pass --insurer, or add an alias to the matching [[insurers]] profile".to_string())
            }
            ReconError::UnknownField(_) => {
                Some("field names come from [fields] and the built-in schema".to_string())
            }
            ReconError::SheetNotFound { .. } => {
                Some("add the sheet name to the profile's `sheets` list".to_string())
            }
            _ => None,
        };
        Self { code: recon_exit_code(err), message: err.to_string(), hint }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
