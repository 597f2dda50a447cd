//! Industrial Package Manager (ipm)

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use ipm::installer::{InstallError, InstallOptions, Installer};
use ipm::registry::HttpRegistry;
use ipm::Cache;

#[derive(Parser)]
#[command(name = "ipm")]
#[command(about = "Industrial Package Manager")]
#[command(
    long_about = "A secure, extensible package manager for industrial applications."
)]
#[command(version)]
struct Cli {
    /// Custom registry URL (e.g., https://npm.pkg.github.com)
    #[arg(long, global = true, default_value = ipm::DEFAULT_REGISTRY)]
    registry: String,

    /// Authentication token for the registry
    #[arg(long, global = true)]
    token: Option<String>,

    /// Set log level (debug, info, warn, error) to enable logging
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Write logs to the specified file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a package
    Install {
        /// Package spec (`name[@range]`) or path to a local tarball
        spec: String,

        /// Public key (PEM) used to verify package signatures
        #[arg(long)]
        pubkey: Option<PathBuf>,
    },
    /// Print the version
    Version,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        eprintln!("Error: {err:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    ipm::logging::init(cli.log_level.as_deref(), cli.log_file.as_deref())?;

    match &cli.command {
        Commands::Install { spec, pubkey } => {
            let registry = HttpRegistry::new(&cli.registry, cli.token.clone())?;
            let cache = Cache::open()?;
            let options = InstallOptions {
                json_output: cli.json,
                public_key: pubkey.clone(),
                project_dir: std::env::current_dir()?,
            };
            let mut installer = Installer::new(&registry, cache, options);

            match installer.install(spec) {
                Ok(summary) => {
                    if cli.json {
                        let report = serde_json::json!({
                            "message": "installation complete",
                            "installed": summary.installed,
                            "cached": summary.cached,
                        });
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    }
                    Ok(())
                }
                Err(InstallError::Conflicts(report)) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    } else {
                        print!("{report}");
                    }
                    anyhow::bail!("unresolvable dependency conflicts detected");
                }
                Err(err) => Err(err.into()),
            }
        }
        Commands::Version => {
            if cli.json {
                println!("{{\"version\": \"{}\"}}", env!("CARGO_PKG_VERSION"));
            } else {
                println!("ipm {}", env!("CARGO_PKG_VERSION"));
            }
            Ok(())
        }
    }
}
