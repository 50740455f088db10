//! Authentication module for the current user's session.
//!
//! This module provides:
//! - `AuthProvider`: the live session value, with a change notification
//!   fired on login and logout
//! - `Session`: on-disk persistence of the last session
//!
//! The query cache reads tokens through `AuthProvider` and reacts to its
//! transitions; it never owns or mutates the session.

pub mod session;

pub use session::{AuthProvider, Session, SessionData};
