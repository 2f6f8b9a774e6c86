//! # Feature Expansion
//!
//! Translates a `ProxyVector` into the full feature row a trained model
//! expects. The schema is chosen by `(use_social, target)`, the target column
//! is dropped from a private copy of it, every column starts at zero, and the
//! rows of `FILL_RULES` overwrite the columns they name with a linear formula
//! of the proxy indices.
//!
//! The zero-fill for columns no rule touches is a coarse placeholder, not an
//! imputation. Predictions are only comparable with historical ones if it is
//! reproduced exactly.

use crate::proxy::ProxyVector;
use crate::schema::working_schema;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Named groups of derived columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureGroup {
    Population,
    HealthIndicators,
    PreventiveCare,
    RiskBehaviour,
    SocialIsolation,
    EconomicHardship,
}

/// One row of the fill table: every listed column present in the schema is
/// set to `formula(proxy)`.
#[derive(Debug, Clone, Copy)]
pub struct FillRule {
    pub group: FeatureGroup,
    pub columns: &'static [&'static str],
    pub formula: fn(&ProxyVector) -> f64,
}

impl FillRule {
    /// Writes this rule's value into the matching columns of `features`.
    /// Columns absent from the schema are skipped.
    pub fn apply(&self, proxy: &ProxyVector, features: &mut ExpandedFeatures) {
        let value = (self.formula)(proxy);
        for (name, slot) in features.names.iter().zip(features.values.iter_mut()) {
            if self.columns.contains(name) {
                *slot = value;
            }
        }
    }
}

fn total_population(p: &ProxyVector) -> f64 {
    p.population
}

fn adult_population(p: &ProxyVector) -> f64 {
    p.population * 0.8
}

fn health_burden(p: &ProxyVector) -> f64 {
    10.0 + 10.0 * p.health_index
}

fn preventive_uptake(p: &ProxyVector) -> f64 {
    50.0 + p.education_index * 30.0
}

fn risk_exposure(p: &ProxyVector) -> f64 {
    (1.0 - p.environment_index) * 20.0
}

fn isolation_burden(p: &ProxyVector) -> f64 {
    (1.0 - p.social_index) * 30.0
}

fn economic_hardship(p: &ProxyVector) -> f64 {
    (1.0 - p.economy_index) * 20.0
}

/// The complete fill table, applied in order.
pub const FILL_RULES: &[FillRule] = &[
    FillRule {
        group: FeatureGroup::Population,
        columns: &["totalpopulation"],
        formula: total_population,
    },
    FillRule {
        group: FeatureGroup::Population,
        columns: &["totalpop18plus"],
        formula: adult_population,
    },
    FillRule {
        group: FeatureGroup::HealthIndicators,
        columns: &[
            "mhlth_crudeprev",
            "phlth_crudeprev",
            "ghlth_crudeprev",
            "sleep_crudeprev",
            "obesity_crudeprev",
            "diabetes_crudeprev",
        ],
        formula: health_burden,
    },
    FillRule {
        group: FeatureGroup::PreventiveCare,
        columns: &[
            "checkup_crudeprev",
            "cholscreen_crudeprev",
            "colon_screen_crudeprev",
        ],
        formula: preventive_uptake,
    },
    FillRule {
        group: FeatureGroup::RiskBehaviour,
        columns: &["csmoking_crudeprev", "binge_crudeprev", "copd_crudeprev"],
        formula: risk_exposure,
    },
    FillRule {
        group: FeatureGroup::SocialIsolation,
        columns: &[
            "isolation_crudeprev",
            "disability_crudeprev",
            "emotionspt_crudeprev",
        ],
        formula: isolation_burden,
    },
    FillRule {
        group: FeatureGroup::EconomicHardship,
        columns: &[
            "foodinsecu_crudeprev",
            "housinsecu_crudeprev",
            "lacktrpt_crudeprev",
            "shututility_crudeprev",
        ],
        formula: economic_hardship,
    },
];

/// A fully populated feature row in schema order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedFeatures {
    names: Vec<&'static str>,
    values: Vec<f64>,
}

impl ExpandedFeatures {
    fn zeroed(names: Vec<&'static str>) -> Self {
        let values = vec![0.0; names.len()];
        Self { names, values }
    }

    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|&n| n == name)
            .map(|i| self.values[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.names.iter().copied().zip(self.values.iter().copied())
    }
}

// Serialized as a JSON object whose keys keep schema order.
impl Serialize for ExpandedFeatures {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}

/// Expands a proxy vector into the feature row of the model it selects.
pub fn expand(proxy: &ProxyVector) -> ExpandedFeatures {
    let schema = working_schema(proxy.use_social, &proxy.target);
    let mut features = ExpandedFeatures::zeroed(schema);
    for rule in FILL_RULES {
        rule.apply(proxy, &mut features);
    }
    log::debug!(
        "Expanded proxy vector into {} features (target={}, use_social={})",
        features.len(),
        proxy.target,
        proxy.use_social
    );
    features
}
