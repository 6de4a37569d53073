use cdht::{
    chord::types::{FileId, PeerId},
    config::PeerConfig,
    error::CdhtError,
    logging::init_logging,
    network::node::RingPeer,
};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};

const EXIT_STARTUP: u8 = 1;
const EXIT_INVARIANT: u8 = 2;

#[derive(Parser)]
#[command(author, version, long_about = None)]
#[command(name = "cdht")]
#[command(about = "One peer of a circular distributed hash table")]
struct Cli {
    /// Identifier of this peer on the ring
    #[arg(required_unless_present = "config")]
    peer_id: Option<u32>,
    /// Identifier of the first successor
    #[arg(required_unless_present = "config")]
    first_successor: Option<u32>,
    /// Identifier of the second successor
    #[arg(required_unless_present = "config")]
    second_successor: Option<u32>,
    /// Maximum segment size for file transfers, in bytes
    #[arg(required_unless_present = "config")]
    mss: Option<usize>,
    /// Probability of dropping an outgoing transfer segment
    #[arg(required_unless_present = "config")]
    drop_prob: Option<f64>,

    /// JSON configuration file; positional arguments override it
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    /// Port of peer 0; each peer listens on base port + id
    #[arg(short = 'p', long = "base-port")]
    base_port: Option<u16>,
    /// Directory holding served files, received files and the transfer log
    #[arg(short = 'd', long = "data-dir")]
    data_dir: Option<PathBuf>,
    /// off, error, warn, info, debug or trace
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn peer_config(&self) -> Result<PeerConfig, CdhtError> {
        let mut config = match &self.config {
            Some(path) => PeerConfig::from_file(path)?,
            None => PeerConfig::new(
                PeerId(self.peer_id.unwrap_or_default()),
                PeerId(self.first_successor.unwrap_or_default()),
                PeerId(self.second_successor.unwrap_or_default()),
                self.mss.unwrap_or_default(),
                self.drop_prob.unwrap_or_default(),
            ),
        };
        if let Some(id) = self.peer_id {
            config.peer_id = PeerId(id);
        }
        if let Some(id) = self.first_successor {
            config.first_successor = PeerId(id);
        }
        if let Some(id) = self.second_successor {
            config.second_successor = PeerId(id);
        }
        if let Some(mss) = self.mss {
            config.mss = mss;
        }
        if let Some(drop_prob) = self.drop_prob {
            config.drop_prob = drop_prob;
        }
        if let Some(base_port) = self.base_port {
            config.base_port = base_port;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

enum Command {
    Request(FileId),
    Quit,
    Debug,
}

fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    let command = match (words.next()?, words.next()) {
        ("request", Some(file)) if file.len() == 4 && file.chars().all(|c| c.is_ascii_digit()) => {
            Command::Request(FileId(file.parse().ok()?))
        }
        ("quit", None) => Command::Quit,
        ("debug", None) => Command::Debug,
        _ => return None,
    };
    words.next().is_none().then_some(command)
}

/// Read console commands until stdin closes or the peer stops
async fn run_console(peer: &RingPeer) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = peer.shutdown_token();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => return,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => {
                    info!("Console closed, peer keeps running");
                    return;
                }
                Err(e) => {
                    warn!("Console read failed: {}", e);
                    return;
                }
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Some(Command::Request(file)) => {
                if let Err(e) = peer.submit_file_request(file).await {
                    error!("File request for {} failed: {}", file, e);
                }
            }
            Some(Command::Quit) => {
                match peer.initiate_graceful_quit().await {
                    Ok(outcome) if outcome.complete => {
                        info!("Departure acknowledged by {:?}", outcome.acknowledged)
                    }
                    Ok(outcome) => warn!(
                        "Leaving with acknowledgements from {:?} only",
                        outcome.acknowledged
                    ),
                    Err(e) => {
                        error!("Graceful quit failed: {}", e);
                        peer.shutdown();
                    }
                }
                return;
            }
            Some(Command::Debug) => match peer.debug_dump_state().await {
                Ok(snapshot) => println!("{}", snapshot),
                Err(e) => error!("Cannot read ring state: {}", e),
            },
            None => warn!(
                "Unknown command `{}`; expected `request NNNN`, `quit` or `debug`",
                line.trim()
            ),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.peer_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };
    let Ok(level) = cli.log_level.parse::<LevelFilter>() else {
        eprintln!("Unknown log level `{}`", cli.log_level);
        return ExitCode::from(EXIT_STARTUP);
    };
    if let Err(e) = init_logging(level, &config.data_dir) {
        eprintln!("Failed to initialise logging: {}", e);
        return ExitCode::from(EXIT_STARTUP);
    }

    let peer = match RingPeer::start(config).await {
        Ok(peer) => peer,
        Err(e) => {
            error!("Failed to start peer: {}", e);
            return ExitCode::from(EXIT_STARTUP);
        }
    };

    let shutdown = peer.shutdown_token();
    tokio::select! {
        _ = run_console(&peer) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping peer {}", peer.id());
            peer.shutdown();
        }
    }
    // stdin may close long before the peer is asked to stop
    tokio::select! {
        _ = shutdown.cancelled() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping peer {}", peer.id());
            peer.shutdown();
        }
    }

    // an interrupt while transfers drain abandons them
    let abort = peer.abort_token();
    let stopped = peer.wait();
    tokio::pin!(stopped);
    let result = tokio::select! {
        result = &mut stopped => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted again, abandoning running transfers");
            abort.cancel();
            stopped.await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if e.is_invariant_violation() => {
            error!("Protocol invariant broken: {}", e);
            ExitCode::from(EXIT_INVARIANT)
        }
        Err(e) => {
            error!("Peer stopped with an error: {}", e);
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_commands() {
        assert!(matches!(
            parse_command("request 2012"),
            Some(Command::Request(FileId(2012)))
        ));
        assert!(matches!(parse_command("  quit "), Some(Command::Quit)));
        assert!(matches!(parse_command("debug"), Some(Command::Debug)));
        assert!(parse_command("request 12").is_none());
        assert!(parse_command("request abcd").is_none());
        assert!(parse_command("quit now").is_none());
    }

    #[test]
    fn positional_arguments() {
        let cli = Cli::parse_from(["cdht", "4", "5", "8", "400", "0.1", "--base-port", "41000"]);
        let config = cli.peer_config().unwrap();
        assert_eq!(config.peer_id, PeerId(4));
        assert_eq!(config.second_successor, PeerId(8));
        assert_eq!(config.base_port, 41000);
        assert!(Cli::try_parse_from(["cdht", "4", "5"]).is_err());
    }
}
