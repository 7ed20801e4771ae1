use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across all binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Common subcommands available for all binaries
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Log level implied by the verbosity flags
    pub fn log_level(args: &CommonArgs) -> &'static str {
        if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        }
    }

    /// Initialize logging based on CLI arguments; `RUST_LOG` takes precedence
    pub fn init_logging(args: &CommonArgs) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(log_level(args)));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                tracing::info!(path = %path.display(), "Loading configuration");
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            let eraser = &config.eraser;
            println!("EraserDB Configuration:");
            println!("=======================");
            println!("Log directory: {}", config.log.dir.display());
            println!("State directory: {}", config.state.dir.display());
            println!("Erasure enabled: {}", eraser.is_enabled());
            println!(
                "Erasure period: {}",
                humantime_serde::re::humantime::format_duration(eraser.period)
            );
            println!(
                "Erase deleted databases: {}",
                eraser.erases_deleted_databases()
            );
            println!("Erase extinct records: {}", eraser.erases_extinct_records());
            println!("Erase known obsolete: {}", eraser.erases_known_obsolete());
            println!("Erase all obsolete: {}", eraser.erases_all_obsolete());
            println!(
                "Abort timeout: {}",
                humantime_serde::re::humantime::format_duration(eraser.abort_timeout)
            );
            println!("Look-ahead cache size: {} bytes", eraser.lookahead_cache_size);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        tracing::info!("Validating configuration...");

        if config.log.dir.as_os_str().is_empty() {
            anyhow::bail!("Log directory cannot be empty");
        }

        if config.state.dir.as_os_str().is_empty() {
            anyhow::bail!("State directory cannot be empty");
        }

        config
            .eraser
            .validate()
            .context("Invalid eraser configuration")?;

        if config.eraser.enabled && config.eraser.period.is_zero() {
            tracing::warn!("Erasure is enabled but the period is zero; erasure stays off");
        }

        tracing::info!("Configuration validation passed");
        Ok(())
    }

    /// Handle common CLI commands
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[test]
    fn test_log_level_flags() {
        let args = CommonArgs {
            config: None,
            verbose: true,
            quiet: false,
        };
        assert_eq!(utils::log_level(&args), "debug");

        let args = CommonArgs {
            quiet: true,
            ..args
        };
        assert_eq!(utils::log_level(&args), "warn");
    }

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(utils::validate_config(&Configuration::default()).is_ok());
    }
}
