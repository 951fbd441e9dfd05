//! Server Configuration
//!
//! Command line flags, each with a `DKJR_*` environment fallback. A `.env`
//! file is loaded by `main` before parsing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;

use crate::game::tick::MatchConfig;
use crate::network::server::NetworkConfig;
use crate::room::{BroadcastConfig, RoomConfig};
use crate::{DEFAULT_PORT, DEFAULT_TICK_RATE, VERSION};

/// Highest accepted tick rate (Hz).
pub const MAX_TICK_RATE: u32 = 1000;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "doncey-kong-server", version, about = "Authoritative DonCEyKongJr game server")]
pub struct ServerConfig {
    /// Address to bind to
    #[arg(long, env = "DKJR_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// TCP port (newline-delimited JSON)
    #[arg(short, long, env = "DKJR_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// WebSocket port; WebSocket is off when unset
    #[arg(long, env = "DKJR_WS_PORT")]
    pub ws_port: Option<u16>,

    /// Simulation ticks per second
    #[arg(long, env = "DKJR_TICK_RATE", default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: u32,

    /// Concurrent matches allowed
    #[arg(long, env = "DKJR_MAX_MATCHES", default_value_t = 8)]
    pub max_matches: usize,

    /// Player slots per match
    #[arg(long, env = "DKJR_MAX_PLAYERS", default_value_t = 2)]
    pub max_players: usize,

    /// Spectator slots per match
    #[arg(long, env = "DKJR_MAX_SPECTATORS", default_value_t = 4)]
    pub max_spectators: usize,

    /// Players needed before a match starts
    #[arg(long, env = "DKJR_MIN_PLAYERS", default_value_t = 1)]
    pub min_players: usize,

    /// Concurrent connections allowed
    #[arg(long, env = "DKJR_MAX_CONNECTIONS", default_value_t = 256)]
    pub max_connections: usize,

    /// Disconnect sessions silent this many seconds (0 disables)
    #[arg(long, env = "DKJR_IDLE_TIMEOUT_SECS", default_value_t = 120)]
    pub idle_timeout_secs: u64,

    /// Rescues needed to win (0 plays until everyone is out)
    #[arg(long, env = "DKJR_RESCUES_TO_WIN", default_value_t = 3)]
    pub rescues_to_win: u32,

    /// Do not read admin commands from stdin
    #[arg(long, env = "DKJR_NO_CONSOLE")]
    pub no_console: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            ws_port: None,
            tick_rate: DEFAULT_TICK_RATE,
            max_matches: 8,
            max_players: 2,
            max_spectators: 4,
            min_players: 1,
            max_connections: 256,
            idle_timeout_secs: 120,
            rescues_to_win: 3,
            no_console: false,
        }
    }
}

/// Rejected configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Tick rate outside 1..=MAX_TICK_RATE.
    #[error("tick rate must be between 1 and {max} Hz, got {got}")]
    TickRate {
        /// Configured value
        got: u32,
        /// Upper bound
        max: u32,
    },

    /// A limit that must be at least one is zero.
    #[error("{0} must be at least 1")]
    Zero(&'static str),

    /// More players required to start than a match can hold.
    #[error("min players ({min}) exceeds max players ({max})")]
    MinAboveMax {
        /// Players needed to start
        min: usize,
        /// Player slots
        max: usize,
    },

    /// TCP and WebSocket on the same port.
    #[error("tcp and websocket cannot share port {0}")]
    PortClash(u16),
}

impl ServerConfig {
    /// Check the configuration before anything is started.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > MAX_TICK_RATE {
            return Err(ConfigError::TickRate { got: self.tick_rate, max: MAX_TICK_RATE });
        }
        if self.max_matches == 0 {
            return Err(ConfigError::Zero("max matches"));
        }
        if self.max_players == 0 {
            return Err(ConfigError::Zero("max players"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Zero("max connections"));
        }
        if self.min_players > self.max_players {
            return Err(ConfigError::MinAboveMax { min: self.min_players, max: self.max_players });
        }
        if self.ws_port == Some(self.port) && self.port != 0 {
            return Err(ConfigError::PortClash(self.port));
        }
        Ok(())
    }

    /// TCP bind address.
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// WebSocket bind address, if enabled.
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.ws_port.map(|port| SocketAddr::new(self.host, port))
    }

    /// Simulation parameters.
    pub fn match_config(&self) -> MatchConfig {
        MatchConfig::for_tick_rate(self.tick_rate).with_rescues_to_win(self.rescues_to_win)
    }

    /// Match limits.
    pub fn room_config(&self) -> RoomConfig {
        RoomConfig {
            max_matches: self.max_matches,
            max_players_per_match: self.max_players,
            max_spectators_per_match: self.max_spectators,
            min_players_to_start: self.min_players.max(1),
            match_config: self.match_config(),
            broadcast: BroadcastConfig {
                // Five seconds between forced full snapshots
                full_snapshot_interval: u64::from(self.tick_rate) * 5,
                ..BroadcastConfig::default()
            },
        }
    }

    /// Listener settings.
    pub fn network_config(&self) -> NetworkConfig {
        NetworkConfig {
            tcp_addr: self.tcp_addr(),
            ws_addr: self.ws_addr(),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            tick_rate: self.tick_rate,
            version: VERSION.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 5555);
        assert_eq!(config.tick_rate, 20);
        assert!(config.ws_port.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_flags() {
        let config = ServerConfig::try_parse_from([
            "doncey-kong-server",
            "--port", "6000",
            "--ws-port", "6001",
            "--tick-rate", "30",
            "--max-players", "4",
            "--no-console",
        ])
        .unwrap();

        assert_eq!(config.port, 6000);
        assert_eq!(config.ws_addr().map(|a| a.port()), Some(6001));
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.max_players, 4);
        assert!(config.no_console);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects() {
        let bad_rate = ServerConfig { tick_rate: 0, ..ServerConfig::default() };
        assert_eq!(bad_rate.validate(), Err(ConfigError::TickRate { got: 0, max: MAX_TICK_RATE }));

        let no_matches = ServerConfig { max_matches: 0, ..ServerConfig::default() };
        assert_eq!(no_matches.validate(), Err(ConfigError::Zero("max matches")));

        let min_above = ServerConfig { min_players: 3, max_players: 2, ..ServerConfig::default() };
        assert_eq!(min_above.validate(), Err(ConfigError::MinAboveMax { min: 3, max: 2 }));

        let clash = ServerConfig { ws_port: Some(5555), ..ServerConfig::default() };
        assert_eq!(clash.validate(), Err(ConfigError::PortClash(5555)));
    }

    #[test]
    fn test_derived_configs() {
        let config = ServerConfig { tick_rate: 40, rescues_to_win: 5, ..ServerConfig::default() };

        let room = config.room_config();
        assert_eq!(room.max_players_per_match, 2);
        assert_eq!(room.match_config.tick_rate, 40);
        assert_eq!(room.match_config.rescues_to_win, 5);
        assert_eq!(room.broadcast.full_snapshot_interval, 200);

        let network = config.network_config();
        assert_eq!(network.tcp_addr.port(), 5555);
        assert_eq!(network.idle_timeout, Duration::from_secs(120));
    }
}
