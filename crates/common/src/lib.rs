// ================
// common/src/lib.rs
// ================
//! Common types and structures
//! used for communication between the `LiveCollab` client and server.
//! This module defines the WebSocket protocol messages and the domain
//! payloads cached per room.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The two kinds of room the server hosts. Room ids are scoped per kind:
/// a stock room and a football room may share the same id without ever
/// sharing a roster or payload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Stock,
    Football,
}

/// A resolved user record produced by the credential verifier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable user id (the token subject).
    pub id: String,
    /// Human-readable name, authoritative for roster display.
    pub display_name: String,
}

/// One weekly adjusted OHLCV data point.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OhlcvPoint {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub adjusted_close: f64,
    pub volume: u64,
    pub dividend: f64,
}

/// Outcome of a single match, serialized as the result initial.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    #[serde(rename = "W")]
    Win,
    #[serde(rename = "D")]
    Draw,
    #[serde(rename = "L")]
    Loss,
}

impl MatchOutcome {
    /// Parse a scraped result initial. Anything other than W/D/L is
    /// discarded by the caller.
    pub fn from_initial(c: char) -> Option<Self> {
        match c {
            'W' => Some(MatchOutcome::Win),
            'D' => Some(MatchOutcome::Draw),
            'L' => Some(MatchOutcome::Loss),
            _ => None,
        }
    }
}

/// Match results per team, in chronological order per team.
pub type MatchResults = BTreeMap<String, Vec<MatchOutcome>>;

/// Domain payload cached per room.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// OHLCV series, ascending by date.
    Stock(Vec<OhlcvPoint>),
    /// Scraped match results per team.
    Football(MatchResults),
}

/// Messages sent from client to server
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "msgType")]
pub enum ClientToServer {
    /// Join (or lazily create) a room of the given kind
    /// # Fields
    /// * `kind` - Room kind (stock or football)
    /// * `room_id` - Human-chosen room identifier
    JoinRoom { kind: RoomKind, room_id: String },
    /// Request the match results payload for a football room
    /// # Fields
    /// * `room_id` - ID of the football room
    RequestPayload { room_id: String },
    /// Change the tracked symbol of a stock room and re-fetch its data
    /// # Fields
    /// * `room_id` - ID of the stock room
    /// * `symbol` - New ticker symbol
    UpdateSymbol { room_id: String, symbol: String },
    /// Request a roster display-name change
    /// # Fields
    /// * `kind` - Room kind
    /// * `room_id` - ID of the room
    /// * `name` - Requested display name (ignored for authenticated users)
    SetDisplayName {
        kind: RoomKind,
        room_id: String,
        name: String,
    },
}

/// Messages sent from server to client
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "msgType")]
pub enum ServerToClient {
    /// Roster update for a room
    Roster {
        /// Room kind
        kind: RoomKind,
        /// Room the roster belongs to
        room_id: String,
        /// Display names of current members, in join order
        names: Vec<String>,
    },
    /// Payload update for a room
    Payload {
        /// Room the payload belongs to
        room_id: String,
        /// The room's domain data, tagged with its kind
        #[serde(flatten)]
        data: Payload,
    },
    /// Error report, delivered to the originating connection only
    Error {
        /// Human-readable reason
        message: String,
    },
}
