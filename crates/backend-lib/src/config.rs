// ============================
// livecollab-backend-lib/src/config.rs
// ============================
//! Configuration management.
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
    /// HMAC secret used to verify bearer tokens
    pub jwt_secret: String,
    /// Optional JSON file seeding the in-memory user directory
    pub users_file: Option<PathBuf>,
    /// Symbol newly created stock rooms start from
    pub default_symbol: String,
    /// Alpha Vantage API key
    pub alpha_vantage_key: String,
    /// Alpha Vantage query endpoint
    pub alpha_vantage_url: String,
    /// Grace period before an empty room is deleted, in seconds
    pub room_grace_secs: u64,
    /// Period of the stock refresh scheduler, in seconds
    pub refresh_period_secs: u64,
    /// TTL of cached per-symbol stock series, in seconds
    pub stock_cache_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 5001)),
            log_level: "info".to_string(),
            jwt_secret: String::new(),
            users_file: None,
            default_symbol: "IBM".to_string(),
            alpha_vantage_key: String::new(),
            alpha_vantage_url: "https://www.alphavantage.co/query".to_string(),
            room_grace_secs: 300,
            refresh_period_secs: 300,
            stock_cache_ttl_secs: 300,
        }
    }
}

impl Settings {
    /// Load settings: defaults, overlaid by `livecollab.toml`, overlaid by
    /// `LIVECOLLAB_`-prefixed environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from("livecollab.toml")
    }

    /// Load settings with an explicit config file path.
    pub fn load_from(path: &str) -> Result<Self> {
        let settings = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("LIVECOLLAB_"))
            .extract()?;
        Ok(settings)
    }
}
