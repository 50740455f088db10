use serde::{Deserialize, Serialize};

use super::EntityId;
use crate::utils::truncate_string;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Spot {
    #[serde(alias = "_id")]
    pub id: EntityId,
    pub name: String,
    pub address: Option<String>,
    pub cuisine: Option<String>,
    pub rating: Option<f64>,
    #[serde(default)]
    pub review_count: u32,
    pub image_url: Option<String>,
    #[serde(default, alias = "isFavorite")]
    pub is_favourite: bool,
}

impl Spot {
    pub fn rating_display(&self) -> String {
        match self.rating {
            Some(r) => format!("{:.1}", r),
            None => "-".to_string(),
        }
    }

    /// One-line summary for list output.
    pub fn summary(&self, width: usize) -> String {
        let mut line = self.name.clone();
        if let Some(ref cuisine) = self.cuisine {
            if !cuisine.is_empty() {
                line.push_str(&format!(" ({})", cuisine));
            }
        }
        if let Some(ref address) = self.address {
            if !address.is_empty() {
                line.push_str(&format!(" - {}", address));
            }
        }
        truncate_string(&line, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spot() {
        let json = r#"{
            "_id": "64f0c1",
            "name": "Noodle Bar",
            "cuisine": "Ramen",
            "address": "12 Main St",
            "rating": 4.3,
            "reviewCount": 18,
            "isFavorite": true
        }"#;
        let spot: Spot = serde_json::from_str(json).unwrap();
        assert_eq!(spot.id, EntityId::Str("64f0c1".to_string()));
        assert_eq!(spot.review_count, 18);
        assert!(spot.is_favourite);
        assert_eq!(spot.rating_display(), "4.3");
        assert_eq!(spot.summary(80), "Noodle Bar (Ramen) - 12 Main St");
    }

    #[test]
    fn test_minimal_spot() {
        let spot: Spot = serde_json::from_str(r#"{"id": 3, "name": "Taco Truck"}"#).unwrap();
        assert_eq!(spot.id, EntityId::Int(3));
        assert_eq!(spot.rating_display(), "-");
        assert!(!spot.is_favourite);
        assert_eq!(spot.summary(80), "Taco Truck");
    }
}
