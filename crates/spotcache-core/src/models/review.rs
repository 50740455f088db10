use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::EntityId;

/// Highest star rating a review can carry.
const MAX_STARS: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Review {
    #[serde(alias = "_id")]
    pub id: EntityId,
    pub spot_id: Option<EntityId>,
    pub spot_name: Option<String>,
    pub rating: u8,
    #[serde(default, alias = "text")]
    pub comment: String,
    #[cfg_attr(feature = "ts", ts(type = "string | null"))]
    pub created_at: Option<DateTime<Utc>>,
}

impl Review {
    /// Star bar such as "★★★☆☆". Ratings above the maximum are clamped.
    pub fn stars(&self) -> String {
        let filled = self.rating.min(MAX_STARS) as usize;
        let empty = MAX_STARS as usize - filled;
        format!("{}{}", "★".repeat(filled), "☆".repeat(empty))
    }

    pub fn spot_label(&self) -> String {
        match (&self.spot_name, &self.spot_id) {
            (Some(name), _) if !name.is_empty() => name.clone(),
            (_, Some(id)) => format!("spot {}", id),
            _ => "unknown spot".to_string(),
        }
    }
}
