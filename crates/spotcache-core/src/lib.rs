//! Core library for spotcache.
//!
//! An in-memory query cache for a food-spot client, with the REST client,
//! session handling, models and configuration around it.

pub mod api;
pub mod auth;
pub mod config;
pub mod data;
pub mod models;
pub mod query;
pub mod utils;

pub use api::{ApiClient, ApiError, SpotApi};
pub use auth::{AuthProvider, Session, SessionData};
pub use config::Config;
pub use data::SpotData;
pub use query::{ActivationGate, ListMode, ModeSelector, QueryClient, QueryState, QueryStatus};
