//! Data models for food-spot entities.
//!
//! - `Spot`: an entry in the popular or favourites list
//! - `Profile`: the logged-in user
//! - `Review`: a user's review of a spot

pub mod profile;
pub mod review;
pub mod spot;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use profile::Profile;
pub use review::Review;
pub use spot::Spot;

/// Server-side identifier. Older endpoints send numbers, newer ones strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum EntityId {
    Int(i64),
    Str(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Int(i) => write!(f, "{}", i),
            EntityId::Str(s) => f.write_str(s),
        }
    }
}

