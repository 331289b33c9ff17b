//! rateshopper — competitor price extraction for lodging targets.
//!
//! The engine walks a date range against a competitor listing with a
//! stealth-configured headless Chrome, finds the cheapest valid per-night
//! price for each date, and records one observation per `(search, date)`.
//! Platforms that hide inventory behind minimum-stay rules are handled by
//! probing ascending stay lengths and fanning a package price out across
//! the nights it covers.
//!
//! A background supervisor polls for pending search jobs, runs at most one
//! extraction per target at a time, and exposes pause/resume/cancel/retry
//! controls over running jobs. Progress is checkpointed per date, so a
//! paused or interrupted job resumes where it left off.
//!
//! # Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use rateshopper::config::EngineConfig;
//! use rateshopper::store::SqliteStore;
//! use rateshopper::supervisor::{BrowserSourceFactory, ExtractionSupervisor};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Arc::new(EngineConfig::from_env());
//! let store = Arc::new(SqliteStore::open(config.database_path()).await?);
//! let factory = Arc::new(BrowserSourceFactory::new(config.clone()));
//! let supervisor = Arc::new(ExtractionSupervisor::new(
//!     config,
//!     store.clone(),
//!     store,
//!     factory,
//! ));
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! supervisor.run(shutdown_rx).await;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod config;
pub mod error;
pub mod model;
pub mod platform;
pub mod probe;
pub mod retry;
pub mod search;
pub mod sink;
pub mod store;
pub mod supervisor;

pub use config::EngineConfig;
pub use error::{ControlError, ExtractError, TransitionError};
pub use model::{Checkpoint, PlatformKind, PriceObservation, Search, SearchStatus, Target};
pub use search::CheckpointedSearch;
pub use store::{MemoryStore, PriceStore, SearchStore, SqliteStore};
pub use supervisor::ExtractionSupervisor;
