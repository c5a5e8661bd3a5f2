use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A point-of-interest record. `place_id` is the natural key across the whole
/// pipeline: deduplication and skip-if-exists checks both rely on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood_tags: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_visit_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_tip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub popularity_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ratings_total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maps_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vicinity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photos: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enrichment_status: Option<String>,
    /// Fields the pipeline does not interpret survive a round-trip unchanged.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Structured output of the text-generation enrichment service.
///
/// The update is field-by-field: only values the service actually returned
/// replace what the record already holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentFields {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub mood_tags: Option<Vec<String>>,
    #[serde(default)]
    pub suggested_visit_time: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub local_tip: Option<String>,
    #[serde(default)]
    pub popularity_score: Option<f64>,
    #[serde(default)]
    pub price_level: Option<String>,
}

impl Place {
    pub fn apply_enrichment(&mut self, fields: EnrichmentFields) {
        if let Some(name) = fields.name {
            self.name = name;
        }
        if fields.description.is_some() {
            self.description = fields.description;
        }
        if fields.category.is_some() {
            self.category = fields.category;
        }
        if fields.subcategory.is_some() {
            self.subcategory = fields.subcategory;
        }
        if fields.mood_tags.is_some() {
            self.mood_tags = fields.mood_tags;
        }
        if fields.suggested_visit_time.is_some() {
            self.suggested_visit_time = fields.suggested_visit_time;
        }
        if fields.duration.is_some() {
            self.duration = fields.duration;
        }
        if fields.local_tip.is_some() {
            self.local_tip = fields.local_tip;
        }
        if fields.popularity_score.is_some() {
            self.popularity_score = fields.popularity_score;
        }
        if fields.price_level.is_some() {
            self.price_level = fields.price_level;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_place() -> Place {
        serde_json::from_value(json!({
            "name": "Sagrada Família",
            "city": "Barcelona",
            "place_id": "ChIJk_s92NyipBIRUMnDG8Kq2Js",
            "coordinates": { "lat": 41.4036, "lng": 2.1744 },
            "rating": 4.7,
            "user_ratings_total": 190000,
            "custom_field": "kept"
        }))
        .unwrap()
    }

    #[test]
    fn unknown_fields_round_trip() {
        let place = sample_place();
        assert_eq!(place.extra.get("custom_field"), Some(&json!("kept")));

        let encoded = serde_json::to_value(&place).unwrap();
        assert_eq!(encoded.get("custom_field"), Some(&json!("kept")));
        assert_eq!(encoded.get("city"), Some(&json!("Barcelona")));
    }

    #[test]
    fn enrichment_overwrites_only_returned_fields() {
        let mut place = sample_place();
        place.description = Some("old description".into());
        place.local_tip = Some("go early".into());

        place.apply_enrichment(EnrichmentFields {
            name: None,
            description: Some("Gaudí's unfinished basilica".into()),
            category: Some("religious site".into()),
            subcategory: Some("cathedral".into()),
            mood_tags: Some(vec!["must-see".into(), "historic".into()]),
            suggested_visit_time: None,
            duration: None,
            local_tip: None,
            popularity_score: Some(0.98),
            price_level: Some("$$".into()),
        });

        assert_eq!(place.name, "Sagrada Família");
        assert_eq!(place.description.as_deref(), Some("Gaudí's unfinished basilica"));
        assert_eq!(place.local_tip.as_deref(), Some("go early"));
        assert_eq!(place.popularity_score, Some(0.98));
    }
}
