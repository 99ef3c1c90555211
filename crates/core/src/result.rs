//! Display-ready lookup results.
//!
//! A [`ResultRecord`] is a pure function of a [`CatalogRecord`] and an item
//! directory snapshot: rendering the same inputs twice gives equal records, which
//! is what makes redelivered jobs harmless.

use core::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::catalog::CatalogRecord;
use crate::id::HouseholdKey;
use crate::items::ItemMap;

/// Rendered value for a profile field the catalog left empty.
pub const MISSING_VALUE: &str = "Unknown";

/// Ordered display-name → value pairs.
///
/// Serialized as a JSON object whose key order is the display order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedProfile(Vec<(String, String)>);

impl RenderedProfile {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self(fields)
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for RenderedProfile {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RenderedProfile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = RenderedProfile;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of profile field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, String>()? {
                    fields.push((k, v));
                }
                Ok(RenderedProfile(fields))
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

/// Result of one household lookup, as stored and served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub household_key: HouseholdKey,
    pub profile: RenderedProfile,
    pub recommendations: Vec<String>,
}

impl ResultRecord {
    /// Apply the rendering rule to a catalog row.
    pub fn render(record: &CatalogRecord, items: &ItemMap) -> Self {
        let profile = record
            .profile
            .named_fields()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value.unwrap_or(MISSING_VALUE).to_string()))
            .collect();

        let recommendations = record
            .recommendations
            .iter()
            .map(|pid| items.render(*pid))
            .collect();

        Self {
            household_key: record.household_key,
            profile: RenderedProfile(profile),
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::HouseholdProfile;
    use crate::items::ItemInfo;

    fn record() -> CatalogRecord {
        CatalogRecord::new(
            HouseholdKey::new(42).unwrap(),
            HouseholdProfile {
                age_desc: Some("45-54".into()),
                income_desc: Some("50-74K".into()),
                kid_category_desc: None,
                ..Default::default()
            },
            vec![10, 20, 30],
        )
    }

    fn items() -> ItemMap {
        [
            (10, ItemInfo::new("GROCERY", "🛒")),
            (20, ItemInfo::new("DRUG GM", "💊")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn renders_profile_in_display_order() {
        let result = ResultRecord::render(&record(), &items());
        let names: Vec<_> = result.profile.fields().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            names,
            [
                "Age",
                "Income",
                "Marital status",
                "Homeowner",
                "Household composition",
                "Household size",
                "Kids"
            ]
        );
        assert_eq!(result.profile.get("Age"), Some("45-54"));
        assert_eq!(result.profile.get("Kids"), Some(MISSING_VALUE));
    }

    #[test]
    fn renders_recommendations_in_catalog_order() {
        let result = ResultRecord::render(&record(), &items());
        assert_eq!(
            result.recommendations,
            vec!["🛒 10 (GROCERY)", "💊 20 (DRUG GM)", "❓ 30 (Unknown)"]
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        assert_eq!(
            ResultRecord::render(&record(), &items()),
            ResultRecord::render(&record(), &items())
        );
    }

    #[test]
    fn profile_json_keeps_field_order() {
        let result = ResultRecord::render(&record(), &items());
        let json = serde_json::to_string(&result.profile).unwrap();
        assert!(json.starts_with("{\"Age\":\"45-54\",\"Income\":\"50-74K\""));

        let back: RenderedProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result.profile);
    }

    #[test]
    fn empty_recommendations_render_empty() {
        let mut r = record();
        r.recommendations.clear();
        assert!(ResultRecord::render(&r, &items()).recommendations.is_empty());
    }
}
