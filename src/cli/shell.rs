//! Interactive shell commands
//!
//! Each input line is tokenized and parsed with clap, then dispatched
//! against the [`AppContext`]. Output goes to any writer so the same code
//! serves stdin sessions and tests.

use crate::context::AppContext;
use crate::lifecycle::{LifecycleError, LifecycleState, WorkerExit};
use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::io::Write;

#[derive(Parser, Debug)]
#[command(name = "lwm2m", no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Subcommand, Debug)]
enum ShellCommand {
    /// Start the client
    Start,
    /// Stop the client and wait until it has shut down
    Stop,
    /// Show the client state
    Status,
    /// Client configuration
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Stop the client and leave the shell
    #[command(alias = "exit")]
    Quit,
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Print the current configuration
    Show,
    /// Change one option; takes effect on the next start
    Set {
        key: String,
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
    /// Persist the current configuration
    Save,
    /// Reload the persisted configuration
    Load,
    /// Reset every option to its default
    Defaults,
}

/// What the input loop should do after a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellFlow {
    Continue,
    Quit,
}

pub struct Shell<'a> {
    context: &'a AppContext,
}

impl<'a> Shell<'a> {
    pub fn new(context: &'a AppContext) -> Self {
        Self { context }
    }

    /// Run one input line
    ///
    /// Command failures are printed, not returned; errors only come from
    /// writing to `out`.
    pub fn execute(&self, line: &str, out: &mut impl Write) -> Result<ShellFlow> {
        let tokens = match tokenize(line) {
            Ok(tokens) => tokens,
            Err(e) => {
                writeln!(out, "{} {}", "Error:".red(), e)?;
                return Ok(ShellFlow::Continue);
            }
        };
        if tokens.is_empty() {
            return Ok(ShellFlow::Continue);
        }

        let command = match ShellLine::try_parse_from(&tokens) {
            Ok(parsed) => parsed.command,
            Err(e) => {
                write!(out, "{}", e.render())?;
                return Ok(ShellFlow::Continue);
            }
        };

        match command {
            ShellCommand::Start => self.start(out)?,
            ShellCommand::Stop => self.stop(out)?,
            ShellCommand::Status => self.status(out)?,
            ShellCommand::Config(command) => self.config(command, out)?,
            ShellCommand::Quit => {
                self.context.lifecycle().stop();
                return Ok(ShellFlow::Quit);
            }
        }
        Ok(ShellFlow::Continue)
    }

    fn start(&self, out: &mut impl Write) -> Result<()> {
        match self.context.lifecycle().request_start() {
            Ok(true) => writeln!(out, "{}", "Client starting".green())?,
            Ok(false) => writeln!(out, "{}", "Client is already running".yellow())?,
            Err(LifecycleError::StopInProgress) => writeln!(
                out,
                "{}",
                "Client is still stopping, try again shortly".yellow()
            )?,
            Err(e) => writeln!(out, "{} {}", "Error:".red(), e)?,
        }
        Ok(())
    }

    fn stop(&self, out: &mut impl Write) -> Result<()> {
        let lifecycle = self.context.lifecycle();
        if lifecycle.state() == LifecycleState::Stopping {
            writeln!(out, "{}", "Waiting for the client to stop...".dimmed())?;
            lifecycle.await_stop();
        } else if !lifecycle.request_stop() {
            writeln!(out, "{}", "Client is not running".yellow())?;
            return Ok(());
        } else {
            lifecycle.await_stop();
        }
        writeln!(out, "{}", "Client stopped".green())?;
        Ok(())
    }

    fn status(&self, out: &mut impl Write) -> Result<()> {
        let report = self.context.lifecycle().status();

        let state = match report.state {
            LifecycleState::Running => report.state.to_string().green(),
            LifecycleState::Stopped => report.state.to_string().normal(),
            _ => report.state.to_string().yellow(),
        };
        writeln!(out, "State:      {}", state)?;

        if let Some(endpoint) = &report.endpoint {
            writeln!(out, "Endpoint:   {}", endpoint.cyan())?;
        }
        if let Some(started_at) = report.started_at {
            writeln!(out, "Started at: {}", started_at.format("%Y-%m-%d %H:%M:%S"))?;
        }
        match &report.last_exit {
            Some(WorkerExit::Failed(reason)) => {
                writeln!(out, "Last run:   {} {}", "failed:".red(), reason)?
            }
            Some(WorkerExit::Cancelled) => writeln!(out, "Last run:   cancelled")?,
            Some(WorkerExit::Stopped) => writeln!(out, "Last run:   stopped")?,
            None => {}
        }
        Ok(())
    }

    fn config(&self, command: ConfigCommand, out: &mut impl Write) -> Result<()> {
        let config = self.context.config();

        match command {
            ConfigCommand::Show => {
                writeln!(out, "\nCurrent client config:\n")?;
                for (description, value) in config.describe() {
                    writeln!(out, " {}: {}", description, value)?;
                }
            }
            ConfigCommand::Set { key, value } => {
                if !config.registry().contains(&key) {
                    writeln!(
                        out,
                        "{} Unknown option '{}'. Available: {}",
                        "Error:".red(),
                        key,
                        config.registry().keys().join(", ")
                    )?;
                    return Ok(());
                }
                match config.set(&key, &value) {
                    Ok(()) => {
                        writeln!(out, "{}", format!("Option '{}' updated", key).green())?;
                        if self.context.lifecycle().state() != LifecycleState::Stopped {
                            writeln!(out, "{}", "Restart the client to apply the change".dimmed())?;
                        }
                    }
                    Err(e) => writeln!(out, "{} {}", "Error:".red(), e)?,
                }
            }
            ConfigCommand::Save => match config.save() {
                Ok(()) => writeln!(out, "{}", "Configuration saved".green())?,
                Err(_) => writeln!(out, "{}", "Cannot save the config".yellow())?,
            },
            ConfigCommand::Load => {
                if config.load_from_persistence() {
                    writeln!(out, "{}", "Configuration successfully restored".green())?;
                } else {
                    writeln!(out, "{}", "Restoring default configuration".yellow())?;
                }
            }
            ConfigCommand::Defaults => {
                config.initialize_defaults();
                writeln!(out, "{}", "Default configuration restored".green())?;
            }
        }
        Ok(())
    }
}

/// Split a line into words, honouring single and double quotes
fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        anyhow::bail!("Unterminated quote");
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::AppSettings;

    fn context() -> AppContext {
        AppContext::builder(AppSettings::default())
            .device_id("0123")
            .build()
            .unwrap()
    }

    fn run(shell: &Shell, line: &str) -> String {
        colored::control::set_override(false);
        let mut out = Vec::new();
        shell.execute(line, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(
            tokenize(r#"config set ssid "My Network""#).unwrap(),
            vec!["config", "set", "ssid", "My Network"]
        );
        assert_eq!(tokenize("config set psk ''").unwrap(), vec!["config", "set", "psk", ""]);
        assert!(tokenize("config set ssid \"open").is_err());
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_show_lists_in_declaration_order() {
        let context = context();
        let output = run(&Shell::new(&context), "config show");

        let lines: Vec<_> = output.lines().filter(|l| l.starts_with(' ')).collect();
        assert_eq!(lines[0], " Wi-Fi SSID: ");
        assert_eq!(lines[2], " LwM2M Server URI: coaps://localhost:5684");
        assert!(lines.contains(&" Endpoint name: lwm2m-agent-0123"));
    }

    #[test]
    fn test_set_reports_validation_errors() {
        let context = context();
        let shell = Shell::new(&context);

        assert!(run(&shell, "config set lifetime 120").contains("updated"));
        assert_eq!(context.config().lifetime().unwrap(), 120);

        let output = run(&shell, "config set lifetime -5");
        assert!(output.contains("not a valid 32-bit unsigned integer"));
        assert_eq!(context.config().lifetime().unwrap(), 120);

        let output = run(&shell, "config set bootstrap yes");
        assert!(output.contains("'y' or 'n' is allowed"));
    }

    #[test]
    fn test_set_unknown_key_is_reported() {
        let context = context();
        let output = run(&Shell::new(&context), "config set colour blue");
        assert!(output.contains("Unknown option 'colour'"));
    }

    #[test]
    fn test_wrong_argument_count() {
        let context = context();
        let output = run(&Shell::new(&context), "config set lifetime");
        assert!(output.contains("error"));
        assert_eq!(context.config().lifetime().unwrap(), 50);
    }

    #[test]
    fn test_save_load_and_defaults() {
        let context = context();
        let shell = Shell::new(&context);

        run(&shell, "config set psk secret");
        assert!(run(&shell, "config save").contains("Configuration saved"));
        run(&shell, "config defaults");
        assert_eq!(context.config().psk().unwrap(), "test");

        assert!(run(&shell, "config load").contains("successfully restored"));
        assert_eq!(context.config().psk().unwrap(), "secret");
    }

    #[test]
    fn test_start_status_stop() {
        let context = context();
        let shell = Shell::new(&context);

        assert!(run(&shell, "stop").contains("not running"));
        assert!(run(&shell, "start").contains("Client starting"));
        assert!(run(&shell, "status").contains("State:"));
        assert!(run(&shell, "stop").contains("Client stopped"));
        assert_eq!(context.lifecycle().state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_quit() {
        let context = context();
        let shell = Shell::new(&context);
        let mut out = Vec::new();

        assert_eq!(shell.execute("quit", &mut out).unwrap(), ShellFlow::Quit);
        assert_eq!(shell.execute("exit", &mut out).unwrap(), ShellFlow::Quit);
        assert_eq!(shell.execute("", &mut out).unwrap(), ShellFlow::Continue);
    }
}
