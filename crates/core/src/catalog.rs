//! Precomputed catalog rows (read-only to the pipeline).

use serde::{Deserialize, Serialize};

use crate::id::HouseholdKey;

/// Demographic profile of a household, as stored in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseholdProfile {
    pub age_desc: Option<String>,
    pub income_desc: Option<String>,
    pub marital_status_code: Option<String>,
    pub homeowner_desc: Option<String>,
    pub hh_comp_desc: Option<String>,
    pub household_size_desc: Option<String>,
    pub kid_category_desc: Option<String>,
}

impl HouseholdProfile {
    /// Fields paired with their display names, in display order.
    pub fn named_fields(&self) -> [(&'static str, Option<&str>); 7] {
        [
            ("Age", self.age_desc.as_deref()),
            ("Income", self.income_desc.as_deref()),
            ("Marital status", self.marital_status_code.as_deref()),
            ("Homeowner", self.homeowner_desc.as_deref()),
            ("Household composition", self.hh_comp_desc.as_deref()),
            ("Household size", self.household_size_desc.as_deref()),
            ("Kids", self.kid_category_desc.as_deref()),
        ]
    }
}

/// One catalog row: profile plus the ordered recommended product ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub household_key: HouseholdKey,
    pub profile: HouseholdProfile,
    pub recommendations: Vec<i64>,
}

impl CatalogRecord {
    pub fn new(household_key: HouseholdKey, profile: HouseholdProfile, recommendations: Vec<i64>) -> Self {
        Self {
            household_key,
            profile,
            recommendations,
        }
    }
}
