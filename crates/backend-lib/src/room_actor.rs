// ============================
// livecollab-backend-lib/src/room_actor.rs
// ============================
//! The room registry actor.
//!
//! One task owns both room tables (stock and football — independent id
//! namespaces), the single-flight scrape gate, and the fetcher handles.
//! Commands arrive on an unbounded channel and are processed one at a time,
//! run to completion, so room state needs no locking. Upstream fetches are
//! spawned as separate tasks whose completions re-enter the loop as
//! commands; the scrape gate's flag is therefore set before the fetch's
//! first suspension point and duplicate launches are impossible.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use livecollab_common::{
    Identity, MatchResults, OhlcvPoint, Payload, RoomKind, ServerToClient,
};

use crate::error::AppError;
use crate::fetch::{MatchSource, TimeSeries};
use crate::single_flight::ScrapeGate;

pub type ConnId = Uuid;

/// A connection as the registry sees it: id, resolved identity (None for
/// guests), and the outbound channel events are delivered on.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    pub id: ConnId,
    pub identity: Option<Identity>,
    pub tx: mpsc::Sender<ServerToClient>,
}

/// Compute the roster display name for a connection: the authenticated
/// identity's name always wins; guests get a deterministic label.
fn display_name(identity: Option<&Identity>, conn_id: ConnId) -> String {
    match identity {
        Some(identity) => identity.display_name.clone(),
        None => guest_label(conn_id),
    }
}

/// `Guest-` plus the first five characters of the connection id.
fn guest_label(conn_id: ConnId) -> String {
    let id = conn_id.to_string();
    format!("Guest-{}", &id[..5])
}

/// Insertion-ordered roster. A connection appears at most once.
#[derive(Default)]
struct Roster {
    entries: Vec<RosterEntry>,
}

struct RosterEntry {
    conn: ConnHandle,
    name: String,
}

impl Roster {
    /// Add a member; idempotent for an already-joined connection.
    fn insert(&mut self, conn: ConnHandle, name: String) {
        if self.entries.iter().any(|e| e.conn.id == conn.id) {
            return;
        }
        self.entries.push(RosterEntry { conn, name });
    }

    /// Apply the display-name rules to a member. Returns false when the
    /// connection is not in this roster (no-op per the contract).
    fn rename(&mut self, conn_id: ConnId, requested: &str) -> bool {
        let Some(entry) = self.entries.iter_mut().find(|e| e.conn.id == conn_id) else {
            return false;
        };
        entry.name = match &entry.conn.identity {
            Some(identity) => identity.display_name.clone(),
            None => {
                let trimmed = requested.trim();
                if trimmed.is_empty() {
                    guest_label(conn_id)
                } else {
                    trimmed.to_string()
                }
            },
        };
        true
    }

    fn remove(&mut self, conn_id: ConnId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.conn.id != conn_id);
        self.entries.len() != before
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    fn sender(&self, conn_id: ConnId) -> Option<mpsc::Sender<ServerToClient>> {
        self.entries
            .iter()
            .find(|e| e.conn.id == conn_id)
            .map(|e| e.conn.tx.clone())
    }

    /// Fan an event out to every member, in join order. Full or closed
    /// channels are dropped silently (at-most-once per connected session).
    fn broadcast(&self, msg: &ServerToClient) {
        for entry in &self.entries {
            let _ = entry.conn.tx.try_send(msg.clone());
        }
        counter!("room_broadcasts_total").increment(1);
    }
}

struct StockRoom {
    symbol: String,
    payload: Option<Vec<OhlcvPoint>>,
    roster: Roster,
    fetch_pending: bool,
    expiry: Option<JoinHandle<()>>,
}

impl StockRoom {
    fn new(symbol: String) -> Self {
        Self {
            symbol,
            payload: None,
            roster: Roster::default(),
            fetch_pending: false,
            expiry: None,
        }
    }
}

struct FootballRoom {
    payload: Option<MatchResults>,
    roster: Roster,
    expiry: Option<JoinHandle<()>>,
}

impl FootballRoom {
    fn new() -> Self {
        Self {
            payload: None,
            roster: Roster::default(),
            expiry: None,
        }
    }
}

/// Message sent *into* the actor
#[derive(Debug)]
pub enum RegistryMsg {
    Join {
        kind: RoomKind,
        room_id: String,
        conn: ConnHandle,
        resp_tx: mpsc::UnboundedSender<Result<Vec<String>, AppError>>,
    },
    SetDisplayName {
        kind: RoomKind,
        room_id: String,
        conn_id: ConnId,
        requested: String,
    },
    Disconnect {
        conn_id: ConnId,
    },
    RequestMatchResults {
        room_id: String,
        conn_id: ConnId,
    },
    UpdateSymbol {
        room_id: String,
        symbol: String,
        conn_id: ConnId,
    },
    RefreshTick,
    StockFetched {
        symbol: String,
        outcome: Result<Vec<OhlcvPoint>, AppError>,
        requester: Option<ConnId>,
    },
    ScrapeDone {
        room_id: String,
        outcome: Result<MatchResults, AppError>,
        requester: ConnId,
    },
    Expire {
        kind: RoomKind,
        room_id: String,
    },
}

/// Registry behavior knobs.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Grace period before an empty room is deleted.
    pub grace: Duration,
    /// Symbol newly created stock rooms start from.
    pub default_symbol: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(300),
            default_symbol: "IBM".to_string(),
        }
    }
}

/// Handle that other components keep: the actor's command channel.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    cmd_tx: mpsc::UnboundedSender<RegistryMsg>,
}

impl RegistryHandle {
    /// Spawn the registry actor and return its handle.
    pub fn spawn(
        cfg: RegistryConfig,
        series: Arc<dyn TimeSeries>,
        matches: Arc<dyn MatchSource>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let registry = RoomRegistry {
            stock: HashMap::new(),
            football: HashMap::new(),
            gate: ScrapeGate::default(),
            series,
            matches,
            cmd_tx: cmd_tx.clone(),
            cfg,
        };
        tokio::spawn(registry.run(cmd_rx));
        RegistryHandle { cmd_tx }
    }

    /// Join a room, creating it lazily. Returns the roster snapshot after
    /// the join; the same snapshot is broadcast to the room.
    pub async fn join(
        &self,
        kind: RoomKind,
        room_id: String,
        conn: ConnHandle,
    ) -> Result<Vec<String>, AppError> {
        let (resp_tx, mut resp_rx) = mpsc::unbounded_channel();
        self.cmd_tx.send(RegistryMsg::Join {
            kind,
            room_id,
            conn,
            resp_tx,
        })?;
        resp_rx
            .recv()
            .await
            .ok_or_else(|| AppError::Internal("Failed to receive response".to_string()))?
    }

    pub fn set_display_name(
        &self,
        kind: RoomKind,
        room_id: String,
        conn_id: ConnId,
        requested: String,
    ) {
        let _ = self.cmd_tx.send(RegistryMsg::SetDisplayName {
            kind,
            room_id,
            conn_id,
            requested,
        });
    }

    /// Remove the connection from every room of both kinds.
    pub fn disconnect(&self, conn_id: ConnId) {
        let _ = self.cmd_tx.send(RegistryMsg::Disconnect { conn_id });
    }

    pub fn request_match_results(&self, room_id: String, conn_id: ConnId) {
        let _ = self
            .cmd_tx
            .send(RegistryMsg::RequestMatchResults { room_id, conn_id });
    }

    pub fn update_symbol(&self, room_id: String, symbol: String, conn_id: ConnId) {
        let _ = self.cmd_tx.send(RegistryMsg::UpdateSymbol {
            room_id,
            symbol,
            conn_id,
        });
    }

    /// Trigger one refresh pass (normally driven by the scheduler).
    pub fn refresh_tick(&self) {
        let _ = self.cmd_tx.send(RegistryMsg::RefreshTick);
    }
}

struct RoomRegistry {
    stock: HashMap<String, StockRoom>,
    football: HashMap<String, FootballRoom>,
    gate: ScrapeGate,
    series: Arc<dyn TimeSeries>,
    matches: Arc<dyn MatchSource>,
    cmd_tx: mpsc::UnboundedSender<RegistryMsg>,
    cfg: RegistryConfig,
}

impl RoomRegistry {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<RegistryMsg>) {
        while let Some(msg) = rx.recv().await {
            match msg {
                RegistryMsg::Join {
                    kind,
                    room_id,
                    conn,
                    resp_tx,
                } => self.handle_join(kind, room_id, conn, &resp_tx),
                RegistryMsg::SetDisplayName {
                    kind,
                    room_id,
                    conn_id,
                    requested,
                } => self.handle_set_display_name(kind, room_id, conn_id, &requested),
                RegistryMsg::Disconnect { conn_id } => self.handle_disconnect(conn_id),
                RegistryMsg::RequestMatchResults { room_id, conn_id } => {
                    self.handle_request_match_results(room_id, conn_id);
                },
                RegistryMsg::UpdateSymbol {
                    room_id,
                    symbol,
                    conn_id,
                } => self.handle_update_symbol(room_id, symbol, conn_id),
                RegistryMsg::RefreshTick => self.handle_refresh_tick(),
                RegistryMsg::StockFetched {
                    symbol,
                    outcome,
                    requester,
                } => self.handle_stock_fetched(&symbol, outcome, requester),
                RegistryMsg::ScrapeDone {
                    room_id,
                    outcome,
                    requester,
                } => self.handle_scrape_done(&room_id, outcome, requester),
                RegistryMsg::Expire { kind, room_id } => self.handle_expire(kind, &room_id),
            }
        }
    }

    fn handle_join(
        &mut self,
        kind: RoomKind,
        room_id: String,
        conn: ConnHandle,
        resp_tx: &mpsc::UnboundedSender<Result<Vec<String>, AppError>>,
    ) {
        counter!("room_joins_total").increment(1);
        let names = match kind {
            RoomKind::Stock => self.join_stock(room_id, conn),
            RoomKind::Football => self.join_football(room_id, conn),
        };
        let _ = resp_tx.send(Ok(names));
    }

    fn join_stock(&mut self, room_id: String, conn: ConnHandle) -> Vec<String> {
        let default_symbol = self.cfg.default_symbol.clone();
        let joiner_id = conn.id;
        let joiner_tx = conn.tx.clone();
        let name = display_name(conn.identity.as_ref(), conn.id);

        let room = self
            .stock
            .entry(room_id.clone())
            .or_insert_with(|| StockRoom::new(default_symbol));
        if let Some(timer) = room.expiry.take() {
            timer.abort();
        }
        room.roster.insert(conn, name);
        let names = room.roster.names();
        debug!(%room_id, ?names, "stock roster after join");
        room.roster.broadcast(&ServerToClient::Roster {
            kind: RoomKind::Stock,
            room_id: room_id.clone(),
            names: names.clone(),
        });

        // Serve the cached series to the joiner, or start the lazy fetch
        // for the room's symbol if nothing is cached yet.
        let mut fetch = None;
        match &room.payload {
            Some(points) => {
                let _ = joiner_tx.try_send(ServerToClient::Payload {
                    room_id,
                    data: Payload::Stock(points.clone()),
                });
            },
            None if !room.fetch_pending => {
                room.fetch_pending = true;
                fetch = Some(room.symbol.clone());
            },
            None => {},
        }
        if let Some(symbol) = fetch {
            self.spawn_stock_fetch(symbol, Some(joiner_id));
        }
        names
    }

    fn join_football(&mut self, room_id: String, conn: ConnHandle) -> Vec<String> {
        let name = display_name(conn.identity.as_ref(), conn.id);
        let room = self
            .football
            .entry(room_id.clone())
            .or_insert_with(FootballRoom::new);
        if let Some(timer) = room.expiry.take() {
            timer.abort();
        }
        room.roster.insert(conn, name);
        let names = room.roster.names();
        debug!(%room_id, ?names, "football roster after join");
        room.roster.broadcast(&ServerToClient::Roster {
            kind: RoomKind::Football,
            room_id,
            names: names.clone(),
        });
        names
    }

    fn handle_set_display_name(
        &mut self,
        kind: RoomKind,
        room_id: String,
        conn_id: ConnId,
        requested: &str,
    ) {
        match kind {
            RoomKind::Stock => {
                if let Some(room) = self.stock.get_mut(&room_id) {
                    if room.roster.rename(conn_id, requested) {
                        let names = room.roster.names();
                        room.roster.broadcast(&ServerToClient::Roster {
                            kind,
                            room_id,
                            names,
                        });
                    }
                }
            },
            RoomKind::Football => {
                if let Some(room) = self.football.get_mut(&room_id) {
                    if room.roster.rename(conn_id, requested) {
                        let names = room.roster.names();
                        room.roster.broadcast(&ServerToClient::Roster {
                            kind,
                            room_id,
                            names,
                        });
                    }
                }
            },
        }
    }

    fn handle_disconnect(&mut self, conn_id: ConnId) {
        let grace = self.cfg.grace;
        let cmd_tx = self.cmd_tx.clone();

        for (room_id, room) in &mut self.stock {
            if room.roster.remove(conn_id) {
                room.roster.broadcast(&ServerToClient::Roster {
                    kind: RoomKind::Stock,
                    room_id: room_id.clone(),
                    names: room.roster.names(),
                });
                if room.roster.is_empty() {
                    room.expiry = Some(schedule_expiry(
                        cmd_tx.clone(),
                        grace,
                        RoomKind::Stock,
                        room_id.clone(),
                    ));
                }
            }
        }
        for (room_id, room) in &mut self.football {
            if room.roster.remove(conn_id) {
                room.roster.broadcast(&ServerToClient::Roster {
                    kind: RoomKind::Football,
                    room_id: room_id.clone(),
                    names: room.roster.names(),
                });
                if room.roster.is_empty() {
                    room.expiry = Some(schedule_expiry(
                        cmd_tx.clone(),
                        grace,
                        RoomKind::Football,
                        room_id.clone(),
                    ));
                }
            }
        }
    }

    fn handle_request_match_results(&mut self, room_id: String, conn_id: ConnId) {
        if !self.football.contains_key(&room_id) {
            let e = AppError::RoomNotFound(room_id);
            self.report_error(conn_id, &e.to_string());
            return;
        }

        if self.gate.try_begin() {
            counter!("scrape_launches_total").increment(1);
            self.spawn_scrape(room_id, conn_id);
        } else {
            // A scrape is already in flight: serve the previous result
            // rather than launching duplicate work.
            debug!(%room_id, "scrape in progress, serving cached results");
            counter!("scrape_dedup_total").increment(1);
            let cached = self.gate.cached();
            if let Some(room) = self.football.get_mut(&room_id) {
                room.payload = Some(cached.clone());
                room.roster.broadcast(&ServerToClient::Payload {
                    room_id,
                    data: Payload::Football(cached),
                });
            }
        }
    }

    fn handle_update_symbol(&mut self, room_id: String, symbol: String, conn_id: ConnId) {
        let Some(room) = self.stock.get_mut(&room_id) else {
            let e = AppError::RoomNotFound(room_id);
            self.report_error(conn_id, &e.to_string());
            return;
        };
        info!(%room_id, %symbol, "symbol update");
        room.symbol = symbol.clone();
        room.fetch_pending = true;
        self.spawn_stock_fetch(symbol, Some(conn_id));
    }

    /// One refresh pass: fetch each distinct symbol tracked by a non-empty
    /// stock room, then update those rooms from their own symbol. Empty
    /// rooms are skipped; deleting them is the expiry timer's job.
    fn handle_refresh_tick(&mut self) {
        let mut symbols: Vec<String> = self
            .stock
            .values()
            .filter(|room| !room.roster.is_empty())
            .map(|room| room.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();

        debug!(count = symbols.len(), "refresh tick");
        for symbol in symbols {
            self.spawn_stock_fetch(symbol, None);
        }
    }

    fn handle_stock_fetched(
        &mut self,
        symbol: &str,
        outcome: Result<Vec<OhlcvPoint>, AppError>,
        requester: Option<ConnId>,
    ) {
        let points = match outcome {
            Ok(mut points) => {
                // Order does not depend on the fetcher: sort here.
                points.sort_by_key(|p| p.date);
                points
            },
            Err(e) => {
                warn!(symbol, error = %e, "stock fetch failed, caching empty payload");
                if let Some(conn_id) = requester {
                    self.report_error(conn_id, &format!("Failed to fetch data for {symbol}"));
                }
                Vec::new()
            },
        };

        // Apply to every room tracking this symbol; the guard on `symbol`
        // keeps a stale fetch from clobbering a newer symbol change.
        for (room_id, room) in &mut self.stock {
            if room.symbol != symbol {
                continue;
            }
            room.fetch_pending = false;
            if room.roster.is_empty() {
                continue;
            }
            room.payload = Some(points.clone());
            room.roster.broadcast(&ServerToClient::Payload {
                room_id: room_id.clone(),
                data: Payload::Stock(points.clone()),
            });
        }
    }

    fn handle_scrape_done(
        &mut self,
        room_id: &str,
        outcome: Result<MatchResults, AppError>,
        requester: ConnId,
    ) {
        // Fail-soft: a failed scrape completes with an empty result set.
        let results = match &outcome {
            Ok(results) => results.clone(),
            Err(_) => MatchResults::new(),
        };
        self.gate.finish(results.clone());

        if let Some(room) = self.football.get_mut(room_id) {
            room.payload = Some(results.clone());
            if !room.roster.is_empty() {
                room.roster.broadcast(&ServerToClient::Payload {
                    room_id: room_id.to_string(),
                    data: Payload::Football(results),
                });
            }
        }

        if let Err(e) = outcome {
            warn!(room_id, error = %e, "scrape failed");
            self.report_error(requester, "Failed to fetch match results");
        }
    }

    fn handle_expire(&mut self, kind: RoomKind, room_id: &str) {
        // The roster may have been repopulated after the timer fired but
        // before this command was processed.
        let removed = match kind {
            RoomKind::Stock => {
                if self.stock.get(room_id).is_some_and(|r| r.roster.is_empty()) {
                    self.stock.remove(room_id).is_some()
                } else {
                    false
                }
            },
            RoomKind::Football => {
                if self
                    .football
                    .get(room_id)
                    .is_some_and(|r| r.roster.is_empty())
                {
                    self.football.remove(room_id).is_some()
                } else {
                    false
                }
            },
        };
        if removed {
            info!(?kind, room_id, "empty room expired");
            counter!("rooms_expired_total").increment(1);
        }
    }

    fn spawn_stock_fetch(&self, symbol: String, requester: Option<ConnId>) {
        counter!("stock_fetches_total").increment(1);
        let series = self.series.clone();
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let outcome = series.fetch(&symbol).await;
            let _ = cmd_tx.send(RegistryMsg::StockFetched {
                symbol,
                outcome,
                requester,
            });
        });
    }

    fn spawn_scrape(&self, room_id: String, requester: ConnId) {
        let matches = self.matches.clone();
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            let outcome = matches.fetch().await;
            let _ = cmd_tx.send(RegistryMsg::ScrapeDone {
                room_id,
                outcome,
                requester,
            });
        });
    }

    /// Deliver an error event to one connection, wherever it is joined.
    fn report_error(&self, conn_id: ConnId, message: &str) {
        let sender = self
            .stock
            .values()
            .find_map(|room| room.roster.sender(conn_id))
            .or_else(|| {
                self.football
                    .values()
                    .find_map(|room| room.roster.sender(conn_id))
            });
        if let Some(tx) = sender {
            let _ = tx.try_send(ServerToClient::Error {
                message: message.to_string(),
            });
        }
    }
}

fn schedule_expiry(
    cmd_tx: mpsc::UnboundedSender<RegistryMsg>,
    grace: Duration,
    kind: RoomKind,
    room_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        let _ = cmd_tx.send(RegistryMsg::Expire { kind, room_id });
    })
}
