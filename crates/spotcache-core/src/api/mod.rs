//! REST client for the food-spot service.
//!
//! The API uses bearer token authentication obtained from the login
//! endpoint.

pub mod client;
pub mod error;

pub use client::{ApiClient, SpotApi};
pub use error::ApiError;
