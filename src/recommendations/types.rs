use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Amenities arrive either as a list or as a single free-form string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amenities {
    List(Vec<String>),
    Text(String),
}

/// A recommended property as returned by the server
///
/// Every field is optional; unknown fields are kept in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub id: Option<Value>,
    pub link: Option<String>,
    pub building_name: Option<String>,
    pub address: Option<String>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub price: Option<Value>,
    pub size: Option<Value>,
    #[serde(rename = "type")]
    pub property_type: Option<String>,
    pub amenities: Option<Amenities>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Amenities shown on a card before collapsing into "+N more"
const CARD_AMENITIES: usize = 3;

impl Property {
    pub fn display_name(&self) -> &str {
        non_empty(&self.building_name)
            .or_else(|| non_empty(&self.address))
            .unwrap_or("Property")
    }

    pub fn display_location(&self) -> &str {
        non_empty(&self.location)
            .or_else(|| non_empty(&self.city))
            .unwrap_or("Location not specified")
    }

    pub fn display_price(&self) -> String {
        match &self.price {
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.fract() == 0.0 => format!("₹{}", group_thousands(v as i64)),
                Some(v) => format!("₹{:.2}", v),
                None => format!("₹{}", n),
            },
            Some(Value::String(s)) if !s.is_empty() => format!("₹{}", s),
            _ => "Price not specified".to_string(),
        }
    }

    pub fn display_size(&self) -> String {
        match &self.size {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "Size not specified".to_string(),
        }
    }

    pub fn kind(&self) -> &str {
        non_empty(&self.property_type).unwrap_or("apartment")
    }

    /// Amenity line for a card: at most three names, then a "+N more" badge
    pub fn display_amenities(&self) -> Option<String> {
        match &self.amenities {
            Some(Amenities::List(list)) if !list.is_empty() => {
                let mut line = list
                    .iter()
                    .take(CARD_AMENITIES)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ");
                if list.len() > CARD_AMENITIES {
                    line.push_str(&format!(" +{} more", list.len() - CARD_AMENITIES));
                }
                Some(line)
            }
            Some(Amenities::Text(text)) if !text.is_empty() => Some(text.clone()),
            _ => None,
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}) | {} | {} | Available",
            self.kind(),
            self.display_name(),
            self.display_location(),
            self.display_price(),
            self.display_size()
        )?;
        if let Some(amenities) = self.display_amenities() {
            write!(f, "\n    {}", amenities)?;
        }
        if let Some(link) = non_empty(&self.link) {
            write!(f, "\n    {}", link)?;
        }
        Ok(())
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if value < 0 {
        grouped.insert(0, '-');
    }
    grouped
}

/// Body of `GET /recommendations/{session_id}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    #[serde(default)]
    pub requirements: Value,
    #[serde(default)]
    pub properties: Option<Vec<Property>>,
}

/// The most recent non-empty set of recommendations
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationSnapshot {
    /// Filter criteria the server derived from the conversation
    pub requirements: Value,
    pub properties: Vec<Property>,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_card_fallbacks() {
        let property = Property::default();
        assert_eq!(property.display_name(), "Property");
        assert_eq!(property.display_location(), "Location not specified");
        assert_eq!(property.display_price(), "Price not specified");
        assert_eq!(property.display_size(), "Size not specified");
        assert_eq!(property.kind(), "apartment");
        assert!(property.display_amenities().is_none());
    }

    #[test]
    fn test_card_prefers_building_then_address() {
        let property: Property = serde_json::from_value(json!({
            "address": "12 MG Road",
            "city": "Pune",
            "price": 8500000
        }))
        .unwrap();

        assert_eq!(property.display_name(), "12 MG Road");
        assert_eq!(property.display_location(), "Pune");
        assert_eq!(property.display_price(), "₹8,500,000");
    }

    #[test]
    fn test_amenities_collapse_after_three() {
        let property: Property = serde_json::from_value(json!({
            "amenities": ["Gym", "Pool", "Parking", "Clubhouse", "Garden"]
        }))
        .unwrap();

        assert_eq!(
            property.display_amenities().unwrap(),
            "Gym, Pool, Parking +2 more"
        );
    }

    #[test]
    fn test_amenities_as_text() {
        let property: Property =
            serde_json::from_value(json!({ "amenities": "Lift, power backup" })).unwrap();
        assert_eq!(property.display_amenities().unwrap(), "Lift, power backup");
    }

    #[test]
    fn test_unknown_fields_are_kept() {
        let property: Property = serde_json::from_value(json!({
            "building_name": "Sea View",
            "bhk": 3
        }))
        .unwrap();

        assert_eq!(property.extra.get("bhk"), Some(&json!(3)));
        let card = property.to_string();
        assert!(card.starts_with("[apartment] Sea View (Location not specified)"));
    }

    #[test]
    fn test_response_with_null_properties() {
        let response: RecommendationResponse =
            serde_json::from_value(json!({ "requirements": null, "properties": null })).unwrap();
        assert!(response.properties.is_none());
    }

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(-1234567), "-1,234,567");
    }
}
