use std::{net::SocketAddr, path::PathBuf};

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(version, about = "Real-time party card game server")]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Args)]
pub struct Config {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://cardgame.db")]
    pub database_url: String,

    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub bind_address: SocketAddr,

    #[arg(long, env = "MAX_DB_CONNECTIONS", default_value_t = 16)]
    pub max_connections: u32,

    /// JSON deck to seed instead of the bundled one.
    #[arg(long, env = "DECK_PATH")]
    pub deck: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Accept websocket clients (the default).
    Serve,
    /// Delete every game along with its players and cards in play.
    ClearGames,
}

impl Cli {
    pub fn command_or_default(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_and_subcommands_parse() {
        let cli = Cli::try_parse_from([
            "cardgame",
            "--database-url",
            "sqlite::memory:",
            "--bind-address",
            "127.0.0.1:9000",
            "--max-connections",
            "2",
            "clear-games",
        ])
        .unwrap();

        assert_eq!(cli.config.database_url, "sqlite::memory:");
        assert_eq!(cli.config.bind_address.port(), 9000);
        assert_eq!(cli.config.max_connections, 2);
        assert_eq!(cli.command_or_default(), Command::ClearGames);
    }
}
