pub mod app;
pub mod shell;

pub use app::Cli;
pub use shell::{Shell, ShellFlow};
