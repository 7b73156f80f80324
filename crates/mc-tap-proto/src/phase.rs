//! Connection phases and message directions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtoError;

/// Named stage of a connection's protocol lifecycle.
///
/// Each direction of a connection is in exactly one phase at a time; the two
/// directions may disagree briefly while a transition is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Handshaking,
    Status,
    Login,
    Configuration,
    Play,
}

impl Phase {
    pub const ALL: [Phase; 5] = [
        Phase::Handshaking,
        Phase::Status,
        Phase::Login,
        Phase::Configuration,
        Phase::Play,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Handshaking => "handshaking",
            Phase::Status => "status",
            Phase::Login => "login",
            Phase::Configuration => "configuration",
            Phase::Play => "play",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "handshaking" | "handshake" => Ok(Phase::Handshaking),
            "status" => Ok(Phase::Status),
            "login" => Ok(Phase::Login),
            "configuration" | "config" => Ok(Phase::Configuration),
            "play" | "game" => Ok(Phase::Play),
            _ => Err(ProtoError::UnknownPhase(s.to_string())),
        }
    }
}

/// Which endpoint is sending a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sent by the client, received by the server (inbound on the server side).
    ToServer,
    /// Sent by the server, received by the client (outbound on the server side).
    ToClient,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::ToServer, Direction::ToClient];

    pub fn opposite(self) -> Self {
        match self {
            Direction::ToServer => Direction::ToClient,
            Direction::ToClient => Direction::ToServer,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::ToServer => "to_server",
            Direction::ToClient => "to_client",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "to_server" | "toserver" | "serverbound" | "client" => Ok(Direction::ToServer),
            "to_client" | "toclient" | "clientbound" | "server" => Ok(Direction::ToClient),
            _ => Err(ProtoError::UnknownDirection(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_parse_accepts_aliases() {
        assert_eq!("handshake".parse::<Phase>().unwrap(), Phase::Handshaking);
        assert_eq!("PLAY".parse::<Phase>().unwrap(), Phase::Play);
        assert_eq!("config".parse::<Phase>().unwrap(), Phase::Configuration);
        assert!("lobby".parse::<Phase>().is_err());
    }

    #[test]
    fn direction_sender_names() {
        // A sender name identifies who sends, so "client" means client-to-server.
        assert_eq!("client".parse::<Direction>().unwrap(), Direction::ToServer);
        assert_eq!("server".parse::<Direction>().unwrap(), Direction::ToClient);
        assert_eq!(Direction::ToServer.opposite(), Direction::ToClient);
    }

    #[test]
    fn display_matches_serde_names() {
        let json = serde_json::to_string(&Phase::Configuration).unwrap();
        assert_eq!(json, format!("\"{}\"", Phase::Configuration));
        let json = serde_json::to_string(&Direction::ToClient).unwrap();
        assert_eq!(json, format!("\"{}\"", Direction::ToClient));
    }
}
