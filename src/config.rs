use crate::chord::types::PeerId;
use crate::error::ConfigError;
use crate::network::transfer::MAX_DATAGRAM;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_PORT: u16 = 50000;
pub const DEFAULT_KEY_SPACE: u32 = 256;
/// Width of the `FS` header; enough for a nine digit cursor and a five digit length
pub const DEFAULT_HEADER_LEN: usize = 20;
const MIN_HEADER_LEN: usize = "FS 0 0 0".len();
/// Largest cursor every header must be able to carry
const MAX_CURSOR: u64 = 999_999_999;

/// Static configuration a peer is started with
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerConfig {
    pub peer_id: PeerId,
    pub first_successor: PeerId,
    pub second_successor: PeerId,
    /// Maximum payload bytes per transfer segment
    pub mss: usize,
    /// Probability that the transfer sender drops a segment instead of sending it
    pub drop_prob: f64,
    #[serde(default = "default_base_port")]
    pub base_port: u16,
    #[serde(default = "default_key_space")]
    pub key_space: u32,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub timing: Timing,
}

/// Protocol timers and thresholds. All durations are in milliseconds on disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub ping_interval_ms: u64,
    pub ping_timeout_ms: u64,
    /// Consecutive unanswered pings before a successor is declared dead
    pub max_fails: u32,
    /// Pause before repairing a dead second successor, so the first successor can repair first
    pub repair_grace_ms: u64,
    pub ack_timeout_ms: u64,
    pub receive_idle_timeout_ms: u64,
    pub control_timeout_ms: u64,
    pub quit_ack_timeout_ms: u64,
    pub header_len: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            ping_interval_ms: 5_000,
            ping_timeout_ms: 2_000,
            max_fails: 4,
            repair_grace_ms: 1_000,
            ack_timeout_ms: 1_000,
            receive_idle_timeout_ms: 60_000,
            control_timeout_ms: 3_000,
            quit_ack_timeout_ms: 10_000,
            header_len: DEFAULT_HEADER_LEN,
        }
    }
}

impl Timing {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn repair_grace(&self) -> Duration {
        Duration::from_millis(self.repair_grace_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn receive_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_idle_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn quit_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.quit_ack_timeout_ms)
    }
}

fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

fn default_key_space() -> u32 {
    DEFAULT_KEY_SPACE
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

impl PeerConfig {
    pub fn new(
        peer_id: PeerId,
        first_successor: PeerId,
        second_successor: PeerId,
        mss: usize,
        drop_prob: f64,
    ) -> Self {
        Self {
            peer_id,
            first_successor,
            second_successor,
            mss,
            drop_prob,
            base_port: DEFAULT_BASE_PORT,
            key_space: DEFAULT_KEY_SPACE,
            host: default_host(),
            data_dir: default_data_dir(),
            timing: Timing::default(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// UDP and TCP both listen on `base_port + peer_id`
    pub fn port_of(&self, peer: PeerId) -> Result<u16, ConfigError> {
        u16::try_from(u32::from(self.base_port) + peer.0).map_err(|_| {
            ConfigError::Invalid(format!(
                "port for peer {} overflows (base port {})",
                peer, self.base_port
            ))
        })
    }

    pub fn addr_of(&self, peer: PeerId) -> Result<SocketAddr, ConfigError> {
        Ok(SocketAddr::new(self.host, self.port_of(peer)?))
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.addr_of(self.peer_id)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        if self.key_space == 0 {
            return invalid("key space must be positive".into());
        }
        for (name, id) in [
            ("peer id", self.peer_id),
            ("first successor", self.first_successor),
            ("second successor", self.second_successor),
        ] {
            if id.0 >= self.key_space {
                return invalid(format!(
                    "{} {} is outside the key space 0..{}",
                    name, id, self.key_space
                ));
            }
            self.port_of(id)?;
        }
        if self.first_successor == self.peer_id || self.second_successor == self.peer_id {
            return invalid("a peer cannot be its own successor".into());
        }
        if self.first_successor == self.second_successor {
            return invalid("first and second successor must differ".into());
        }
        if self.mss == 0 {
            return invalid("MSS must be positive".into());
        }
        if !(0.0..1.0).contains(&self.drop_prob) {
            return invalid(format!("drop probability {} is not in [0, 1)", self.drop_prob));
        }
        if self.timing.header_len < MIN_HEADER_LEN {
            return invalid(format!(
                "header length {} cannot hold a segment header",
                self.timing.header_len
            ));
        }
        let max_mss = MAX_DATAGRAM.saturating_sub(self.timing.header_len);
        if self.mss > max_mss {
            return invalid(format!(
                "MSS {} does not fit in one datagram with a {} byte header (at most {})",
                self.mss, self.timing.header_len, max_mss
            ));
        }
        let widest = format!("FS {} {} 1", MAX_CURSOR, self.mss);
        if widest.len() > self.timing.header_len {
            return invalid(format!(
                "header length {} cannot hold `{}`",
                self.timing.header_len, widest
            ));
        }
        if self.timing.max_fails == 0 {
            return invalid("failure threshold must be at least 1".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PeerConfig {
        PeerConfig::new(PeerId(4), PeerId(5), PeerId(8), 400, 0.1)
    }

    #[test]
    fn ports_follow_peer_ids() {
        let config = config();
        assert_eq!(config.port_of(PeerId(5)).unwrap(), 50005);
        assert_eq!(config.local_addr().unwrap().to_string(), "127.0.0.1:50004");
    }

    #[test]
    fn validation_catches_bad_rings() {
        assert!(config().validate().is_ok());

        let mut own = config();
        own.first_successor = PeerId(4);
        assert!(own.validate().is_err());

        let mut same = config();
        same.second_successor = PeerId(5);
        assert!(same.validate().is_err());

        let mut lossy = config();
        lossy.drop_prob = 1.0;
        assert!(lossy.validate().is_err());

        let mut outside = config();
        outside.second_successor = PeerId(300);
        assert!(outside.validate().is_err());

        let mut narrow = config();
        narrow.timing.header_len = 4;
        assert!(narrow.validate().is_err());
    }

    #[test]
    fn segments_must_fit_in_a_datagram() {
        let mut jumbo = config();
        jumbo.mss = 65_500;
        assert!(jumbo.validate().is_err());

        let mut largest = config();
        largest.mss = MAX_DATAGRAM - DEFAULT_HEADER_LEN;
        assert!(largest.validate().is_ok());

        // "FS 999999999 400 1" needs 18 bytes
        let mut short_header = config();
        short_header.timing.header_len = 12;
        assert!(short_header.validate().is_err());
        short_header.timing.header_len = 18;
        assert!(short_header.validate().is_ok());
    }

    #[test]
    fn json_fills_in_defaults() {
        let config: PeerConfig = serde_json::from_str(
            r#"{"peer_id": 1, "first_successor": 3, "second_successor": 4,
                "mss": 500, "drop_prob": 0.2, "timing": {"max_fails": 2}}"#,
        )
        .unwrap();
        assert_eq!(config.base_port, DEFAULT_BASE_PORT);
        assert_eq!(config.timing.max_fails, 2);
        assert_eq!(config.timing.header_len, DEFAULT_HEADER_LEN);
        assert_eq!(config.timing.ping_interval(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }
}
