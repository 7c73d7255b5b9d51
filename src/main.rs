use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use lwm2m_agent::cli::{Cli, Shell, ShellFlow};
use lwm2m_agent::config::settings::AppSettings;
use lwm2m_agent::config::store::{MemoryStore, SettingsStore, SqliteStore};
use lwm2m_agent::engine::simulated::{SimulatedEngine, SimulatedVault};
use lwm2m_agent::{AppContext, BootOutcome};

fn init_logging(cli: &Cli) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    if let Some(path) = &cli.log_file {
        // Truncate on each run
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {:?}", path))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }

    builder.init();
    Ok(())
}

fn open_store(cli: &Cli, settings: &AppSettings) -> Result<Arc<dyn SettingsStore>> {
    if cli.in_memory {
        info!("Using in-memory settings store");
        return Ok(Arc::new(MemoryStore::new()));
    }

    let path = match &cli.db {
        Some(path) => path.clone(),
        None => settings.database_path()?,
    };
    info!("Using settings database: {:?}", path);
    Ok(Arc::new(SqliteStore::open(&path)?))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;
    info!("Starting lwm2m-agent {}", env!("CARGO_PKG_VERSION"));

    let settings = AppSettings::load(cli.config.as_deref())?;
    let store = open_store(&cli, &settings)?;

    let context = AppContext::builder(settings)
        .store(store)
        .engine(Arc::new(SimulatedEngine::new()))
        .vault(Arc::new(SimulatedVault::new()))
        .build()?;

    match context.boot()? {
        BootOutcome::Restored => println!("{}", "Configuration successfully restored".green()),
        BootOutcome::RestoredDefaults => {
            println!("{}", "Restoring default configuration".yellow())
        }
        BootOutcome::StoreUnavailable => {
            println!("{}", "Failed to initialize settings subsystem".yellow())
        }
    }

    if !cli.no_autostart {
        if let Err(e) = context.lifecycle().request_start() {
            warn!("Could not start client: {}", e);
        }
    }

    let shell = Shell::new(&context);
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut line = String::new();

    loop {
        write!(stdout, "lwm2m> ")?;
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF behaves like quit
            writeln!(stdout)?;
            context.lifecycle().stop();
            break;
        }

        if shell.execute(&line, &mut stdout)? == ShellFlow::Quit {
            break;
        }
    }

    info!("Exiting");
    Ok(())
}
