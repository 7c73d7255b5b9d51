use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "lwm2m-agent")]
#[command(about = "LwM2M client agent with persisted configuration and an interactive shell")]
#[command(version)]
pub struct Cli {
    /// Settings file (defaults to settings.toml in the config directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Settings database, overriding the settings file
    #[arg(long, conflicts_with = "in_memory")]
    pub db: Option<PathBuf>,

    /// Keep options and engine state in memory only
    #[arg(long)]
    pub in_memory: bool,

    /// Do not start the client after boot
    #[arg(long)]
    pub no_autostart: bool,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["lwm2m-agent"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.in_memory);
        assert!(!cli.no_autostart);
    }

    #[test]
    fn test_db_conflicts_with_in_memory() {
        let result = Cli::try_parse_from(["lwm2m-agent", "--db", "x.db", "--in-memory"]);
        assert!(result.is_err());
    }
}
