use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;

use wozmon::config::HostConfig;
use wozmon::machine::Machine;
use wozmon::port::TerminalPort;
use wozmon::server::run_server;

#[derive(Parser)]
#[command(name = "wozmon", version, about = "Hex memory monitor on an emulated 6502")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the monitor on this terminal (default)
    Terminal {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Serve monitor sessions over HTTP
    Serve {
        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the listen port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

impl Command {
    fn config_path(&self) -> Option<&PathBuf> {
        match self {
            Command::Terminal { config } | Command::Serve { config, .. } => config.as_ref(),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Terminal { config: None });

    let mut config = HostConfig::load_or_default(command.config_path().map(PathBuf::as_path))?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str())).init();

    match command {
        Command::Terminal { .. } => {
            info!("monitor on terminal, entry ${:04X}", config.machine.monitor_entry);
            let mut machine = Machine::new(TerminalPort::new(), config.machine);
            machine.boot();
            machine.run_forever();
        }
        Command::Serve { port, .. } => {
            if let Some(port) = port {
                config.server.port = port;
            }
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(run_server(config))?;
        }
    }

    Ok(())
}
