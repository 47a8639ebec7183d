//! SpectralNotify - Real-Time Progress Notification Broker
//!
//! This crate provides a broker for reporting and observing the
//! lifecycle of long-running work. Back-end services report **tasks**
//! (single-step jobs) and **workflows** (multi-phase jobs) over a small
//! REST surface; human-facing clients subscribe to per-entity WebSocket
//! channels and receive ordered, incremental updates.
//!
//! # Architecture
//!
//! Each task or workflow is owned by a single logical **instance** that
//! serializes writes, persists state and history in an embedded SQLite
//! store, and fans events out to all live subscribers:
//!
//! - [`config`]: Configuration management and environment loading
//! - [`gateway`]: Routing, write authentication, idempotency, rate limiting
//! - [`instance`]: Per-entity single-writer coordinators and the directory
//! - [`database`]: SQLite-backed metadata, phase, history, registry,
//!   and idempotency stores
//! - [`fanout`]: Per-instance WebSocket fan-out with liveness and
//!   backpressure handling
//! - [`events`]: Broadcast event payloads
//! - [`domain`]: Entity kinds, statuses, records, and history rows
//!
//! # Example
//!
//! ```rust,ignore
//! use spectral_notify::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load()?;
//!     let app = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod events;
pub mod fanout;
pub mod gateway;
pub mod instance;
pub mod logging;
pub mod server;

use std::sync::Arc;

use config::AppConfig;
use database::IdempotencyStore;
use gateway::rate_limit::WriteRateLimiter;
use instance::InstanceDirectory;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Directory of per-entity instance handles.
    pub directory: Arc<InstanceDirectory>,
    /// Shared idempotency store.
    pub idempotency: IdempotencyStore,
    /// Optional global write rate limiter.
    pub write_limiter: Option<Arc<WriteRateLimiter>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &"AppConfig")
            .field("directory", &"InstanceDirectory")
            .field("idempotency", &"IdempotencyStore")
            .field("write_limiter", &self.write_limiter.is_some())
            .finish()
    }
}
