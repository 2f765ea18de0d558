// ============================
// livecollab-backend-lib/src/lib.rs
// ============================
//! Collaborative session server library.
//!
//! Clients connect over a single WebSocket endpoint, join rooms keyed by
//! kind and id, and receive roster presence plus the room's data payload:
//! a stock time series per room symbol, or scraped football match results.
//! All room state lives in one registry actor; upstream fetches run as
//! spawned tasks that report back through the actor's command channel.

pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod room_actor;
pub mod scheduler;
pub mod single_flight;
pub mod validation;
pub mod ws_router;

use std::sync::Arc;
use std::time::Duration;

use crate::auth::verifier::CredentialVerifier;
use crate::config::Settings;
use crate::fetch::{MatchSource, TimeSeries};
use crate::room_actor::{RegistryConfig, RegistryHandle};

/// Shared application state handed to the router.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub rooms: RegistryHandle,
}

impl AppState {
    /// Wire up the registry actor and the refresh loop. Must be called
    /// from within a tokio runtime.
    pub fn new(
        settings: Arc<Settings>,
        verifier: Arc<dyn CredentialVerifier>,
        series: Arc<dyn TimeSeries>,
        matches: Arc<dyn MatchSource>,
    ) -> Self {
        let rooms = RegistryHandle::spawn(
            RegistryConfig {
                grace: Duration::from_secs(settings.room_grace_secs),
                default_symbol: settings.default_symbol.clone(),
            },
            series,
            matches,
        );
        let _refresh = scheduler::spawn_refresh(
            rooms.clone(),
            Duration::from_secs(settings.refresh_period_secs),
        );
        Self {
            settings,
            verifier,
            rooms,
        }
    }
}
