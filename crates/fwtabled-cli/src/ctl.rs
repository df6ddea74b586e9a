#![deny(unsafe_code)]

//! fwtablectl: send one command record to a running fwtabled.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fwtabled_config::{BindTarget, DEFAULT_PORT, Transport};
use fwtabled_core::protocol::parse_cidr;
use fwtabled_core::{Client, Message};

/// Send add/delete/flush commands to fwtabled.
#[derive(Parser, Debug)]
#[command(name = "fwtablectl", version, about, long_about = None)]
struct Cli {
    /// Daemon address: host[:port] or a Unix socket path.
    #[arg(short, long, default_value = "127.0.0.1")]
    server: String,

    /// Port used when the server address has none.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Send over a stream connection.
    #[arg(short = 't', long, conflicts_with = "datagram")]
    stream: bool,

    /// Send as a datagram. The default.
    #[arg(short = 'u', long)]
    datagram: bool,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Add ADDRESS[/PREFIX] to TABLE.
    Add { table: u8, address: String },

    /// Delete ADDRESS[/PREFIX] from TABLE.
    #[command(alias = "delete")]
    Del { table: u8, address: String },

    /// Remove every entry from TABLE.
    Flush { table: u8 },
}

impl Commands {
    fn message(&self) -> Result<Message> {
        Ok(match self {
            Commands::Add { table, address } => {
                let (addr, prefix) = parse_cidr(address)?;
                Message::add(*table, addr, prefix)
            }
            Commands::Del { table, address } => {
                let (addr, prefix) = parse_cidr(address)?;
                Message::delete(*table, addr, prefix)
            }
            Commands::Flush { table } => Message::flush(*table),
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let target: BindTarget = cli
        .server
        .parse()
        .with_context(|| format!("invalid server address {:?}", cli.server))?;
    let transport = if cli.stream {
        Transport::Stream
    } else {
        Transport::Datagram
    };

    let message = cli.command.message()?;
    Client::new(target, transport, cli.port)
        .send(&message)
        .await
        .with_context(|| format!("cannot send to {}", cli.server))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    #[test]
    fn test_add_command_message() {
        let cli = Cli::try_parse_from(["fwtablectl", "add", "3", "198.51.100.0/24"]).unwrap();
        assert_eq!(
            cli.command.message().unwrap(),
            Message::add(3, Ipv4Addr::new(198, 51, 100, 0), 24)
        );
        assert_eq!(cli.server, "127.0.0.1");
        assert_eq!(cli.port, DEFAULT_PORT);
    }

    #[test]
    fn test_delete_alias_and_host_default() {
        let cli = Cli::try_parse_from(["fwtablectl", "-t", "delete", "0", "192.0.2.1"]).unwrap();
        assert!(cli.stream);
        assert_eq!(
            cli.command.message().unwrap(),
            Message::delete(0, Ipv4Addr::new(192, 0, 2, 1), 32)
        );
    }

    #[test]
    fn test_flush_command_message() {
        let cli = Cli::try_parse_from(["fwtablectl", "-s", "/var/run/fw.sock", "flush", "9"])
            .unwrap();
        assert_eq!(cli.command, Commands::Flush { table: 9 });
        assert_eq!(cli.command.message().unwrap(), Message::flush(9));
    }

    #[test]
    fn test_bad_address_rejected() {
        let cli = Cli::try_parse_from(["fwtablectl", "add", "0", "2001:db8::1"]).unwrap();
        assert!(cli.command.message().is_err());
    }

    #[test]
    fn test_table_must_fit_a_byte() {
        assert!(Cli::try_parse_from(["fwtablectl", "flush", "256"]).is_err());
    }
}
