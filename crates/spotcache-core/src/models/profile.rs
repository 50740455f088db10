use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EntityId;
use crate::query::KeyPart;

/// The logged-in user, as returned by the profile endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Profile {
    #[serde(alias = "_id")]
    pub id: EntityId,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub review_count: u32,
    #[serde(default, alias = "favoriteCount")]
    pub favourite_count: u32,
}

impl Profile {
    pub fn name(&self) -> &str {
        match self.display_name {
            Some(ref name) if !name.is_empty() => name,
            _ => &self.username,
        }
    }

    /// The user id inside a raw profile payload, read from `id` or `_id`.
    ///
    /// Works on the raw value so a profile that fails to decode as a whole
    /// still yields its id.
    pub fn id_from_json(profile: &Value) -> Option<KeyPart> {
        ["id", "_id"]
            .iter()
            .filter_map(|field| profile.get(field))
            .find_map(KeyPart::from_json)
            .filter(KeyPart::is_usable)
    }
}
