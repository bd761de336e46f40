use clap::{Parser, Subcommand};
use conclave_domain::Config;

/// conclave — a multi-party conversation orchestrator for autonomous agents.
#[derive(Debug, Parser)]
#[command(name = "conclave", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the effective config (file + env overrides) and print it.
    Validate,
}

/// Load configuration from the path named by `CONCLAVE_CONFIG` (or
/// `conclave.toml` if unset), applying `CONCLAVE_*` environment overrides on
/// top. Missing file is not an error: defaults plus env vars can supply
/// everything. Shared by `serve` and `config validate` so the logic lives in
/// one place.
pub fn load_config() -> anyhow::Result<(Config, std::path::PathBuf)> {
    let config_path = std::env::var("CONCLAVE_CONFIG").unwrap_or_else(|_| "conclave.toml".into());
    let path = std::path::PathBuf::from(config_path);
    let config = if path.exists() {
        Config::load(Some(&path))?
    } else {
        Config::load(None)?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_config_reads_the_file_named_by_conclave_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conclave.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"bind_addr = "0.0.0.0:4000""#).unwrap();

        std::env::set_var("CONCLAVE_CONFIG", &path);
        let (config, resolved) = load_config().unwrap();
        std::env::remove_var("CONCLAVE_CONFIG");

        assert_eq!(resolved, path);
        assert_eq!(config.bind_addr, "0.0.0.0:4000");
    }

    #[test]
    fn load_config_falls_back_to_defaults_when_the_file_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist.toml");
        std::env::set_var("CONCLAVE_CONFIG", &missing);
        let (config, _resolved) = load_config().unwrap();
        std::env::remove_var("CONCLAVE_CONFIG");

        assert_eq!(config, Config::default());
    }
}
