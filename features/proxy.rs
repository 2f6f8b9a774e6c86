//! # Proxy Vector Parsing
//!
//! A proxy vector is the small, user-facing summary a client submits instead
//! of a full feature row: five semantic indices, a population, an
//! urbanization share, the outcome to predict and whether social predictors
//! are wanted. Every key is optional and has a fixed default.
//!
//! Values are never range-checked. A negative population or an index of 3.5
//! flows straight into the derived features. The only failures are values
//! that cannot be read as the expected kind (number, string, flag).

use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_HEALTH_INDEX: f64 = 0.3;
pub const DEFAULT_ECONOMY_INDEX: f64 = 0.5;
pub const DEFAULT_ENVIRONMENT_INDEX: f64 = 0.4;
pub const DEFAULT_EDUCATION_INDEX: f64 = 0.4;
pub const DEFAULT_SOCIAL_INDEX: f64 = 0.2;
pub const DEFAULT_POPULATION: f64 = 100_000.0;
pub const DEFAULT_URBANIZATION: f64 = 0.7;

/// The health outcome a model predicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    /// Frequent mental distress prevalence.
    Mhlth,
    /// Diagnosed depression prevalence.
    Depression,
}

impl Target {
    pub const ALL: [Target; 2] = [Target::Depression, Target::Mhlth];

    /// Column label used in the survey data and in request payloads.
    pub fn column(self) -> &'static str {
        match self {
            Target::Mhlth => "mhlth_crudeprev",
            Target::Depression => "depression_crudeprev",
        }
    }

    /// Label with the prevalence suffix stripped, used in file names.
    pub fn short_name(self) -> &'static str {
        match self {
            Target::Mhlth => "mhlth",
            Target::Depression => "depression",
        }
    }

    pub fn parse(label: &str) -> Option<Target> {
        Target::ALL.into_iter().find(|t| t.column() == label)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Which predictor family a dataset or model was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scenario {
    NoSocial,
    FullSocial,
}

impl Scenario {
    pub const ALL: [Scenario; 2] = [Scenario::NoSocial, Scenario::FullSocial];

    pub fn as_str(self) -> &'static str {
        match self {
            Scenario::NoSocial => "no_social",
            Scenario::FullSocial => "full_social",
        }
    }

    pub fn from_use_social(use_social: bool) -> Scenario {
        if use_social {
            Scenario::FullSocial
        } else {
            Scenario::NoSocial
        }
    }

    pub fn parse(label: &str) -> Option<Scenario> {
        Scenario::ALL.into_iter().find(|s| s.as_str() == label)
    }

    /// Human label for reports.
    pub fn title(self) -> &'static str {
        match self {
            Scenario::NoSocial => "No Social",
            Scenario::FullSocial => "Full Social",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("The proxy vector must be a JSON object, found {0}.")]
    NotAnObject(String),
    #[error("Field '{field}' must be a number, found {found}.")]
    NotNumeric { field: &'static str, found: String },
    #[error("Field '{field}' must be a boolean flag, found {found}.")]
    NotBoolean { field: &'static str, found: String },
    #[error("Field '{field}' must be a string, found {found}.")]
    NotString { field: &'static str, found: String },
}

/// A parsed proxy vector with every default applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyVector {
    pub health_index: f64,
    pub economy_index: f64,
    pub environment_index: f64,
    pub education_index: f64,
    pub social_index: f64,
    pub population: f64,
    /// Accepted and carried, but no schema column is derived from it.
    pub urbanization: f64,
    /// Raw target label. Deliberately not narrowed to `Target` here: the
    /// expander accepts any label and callers decide whether to reject it.
    pub target: String,
    pub use_social: bool,
}

impl Default for ProxyVector {
    fn default() -> Self {
        Self {
            health_index: DEFAULT_HEALTH_INDEX,
            economy_index: DEFAULT_ECONOMY_INDEX,
            environment_index: DEFAULT_ENVIRONMENT_INDEX,
            education_index: DEFAULT_EDUCATION_INDEX,
            social_index: DEFAULT_SOCIAL_INDEX,
            population: DEFAULT_POPULATION,
            urbanization: DEFAULT_URBANIZATION,
            target: Target::Mhlth.column().to_string(),
            use_social: true,
        }
    }
}

impl ProxyVector {
    /// Reads a proxy vector from a JSON object. Unknown keys are ignored.
    pub fn from_json(value: &Value) -> Result<Self, ProxyError> {
        let map = value
            .as_object()
            .ok_or_else(|| ProxyError::NotAnObject(describe(value)))?;
        let defaults = ProxyVector::default();

        Ok(Self {
            health_index: read_number(map, "health_index", defaults.health_index)?,
            economy_index: read_number(map, "economy_index", defaults.economy_index)?,
            environment_index: read_number(map, "environment_index", defaults.environment_index)?,
            education_index: read_number(map, "education_index", defaults.education_index)?,
            social_index: read_number(map, "social_index", defaults.social_index)?,
            population: read_number(map, "population", defaults.population)?,
            urbanization: read_number(map, "urbanization", defaults.urbanization)?,
            target: read_string(map, "target", defaults.target)?,
            use_social: read_flag(map, "use_social", defaults.use_social)?,
        })
    }

    /// The target as a supported label, if it is one.
    pub fn known_target(&self) -> Option<Target> {
        Target::parse(&self.target)
    }

    pub fn scenario(&self) -> Scenario {
        Scenario::from_use_social(self.use_social)
    }
}

fn read_number(map: &Map<String, Value>, field: &'static str, default: f64) -> Result<f64, ProxyError> {
    match map.get(field) {
        None => Ok(default),
        Some(Value::Number(n)) => n.as_f64().ok_or_else(|| ProxyError::NotNumeric {
            field,
            found: n.to_string(),
        }),
        // "NaN" and "inf" parse as f64 but are not usable measurements.
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(ProxyError::NotNumeric {
                field,
                found: format!("\"{s}\""),
            }),
        },
        Some(other) => Err(ProxyError::NotNumeric {
            field,
            found: describe(other),
        }),
    }
}

fn read_flag(map: &Map<String, Value>, field: &'static str, default: bool) -> Result<bool, ProxyError> {
    match map.get(field) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(v) => Ok(v != 0.0),
            None => Err(ProxyError::NotBoolean {
                field,
                found: n.to_string(),
            }),
        },
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ProxyError::NotBoolean {
                field,
                found: format!("\"{s}\""),
            }),
        },
        Some(other) => Err(ProxyError::NotBoolean {
            field,
            found: describe(other),
        }),
    }
}

fn read_string(
    map: &Map<String, Value>,
    field: &'static str,
    default: String,
) -> Result<String, ProxyError> {
    match map.get(field) {
        None => Ok(default),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ProxyError::NotString {
            field,
            found: describe(other),
        }),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string \"{s}\""),
        Value::Array(_) => "an array".to_string(),
        Value::Object(_) => "an object".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_yields_documented_defaults() {
        let proxy = ProxyVector::from_json(&json!({})).unwrap();
        assert_eq!(proxy, ProxyVector::default());
        assert_eq!(proxy.population, 100_000.0);
        assert_eq!(proxy.target, "mhlth_crudeprev");
        assert!(proxy.use_social);
    }

    #[test]
    fn numeric_strings_are_accepted() {
        let proxy = ProxyVector::from_json(&json!({"health_index": "0.75", "population": " 2500 "}))
            .unwrap();
        assert_eq!(proxy.health_index, 0.75);
        assert_eq!(proxy.population, 2500.0);
    }

    #[test]
    fn out_of_range_values_pass_through() {
        let proxy =
            ProxyVector::from_json(&json!({"economy_index": 4.0, "population": -10})).unwrap();
        assert_eq!(proxy.economy_index, 4.0);
        assert_eq!(proxy.population, -10.0);
    }

    #[test]
    fn non_numeric_index_is_rejected_with_field_name() {
        let err = ProxyVector::from_json(&json!({"social_index": "high"})).unwrap_err();
        match err {
            ProxyError::NotNumeric { field, .. } => assert_eq!(field, "social_index"),
            other => panic!("Expected NotNumeric, got {other:?}"),
        }
        assert!(matches!(
            ProxyVector::from_json(&json!({"population": null})),
            Err(ProxyError::NotNumeric { field: "population", .. })
        ));
    }

    #[test]
    fn non_finite_numeric_strings_are_rejected() {
        for (field, text) in [
            ("health_index", "NaN"),
            ("population", "inf"),
            ("urbanization", "-infinity"),
        ] {
            let mut payload = serde_json::Map::new();
            payload.insert(field.to_string(), json!(text));
            match ProxyVector::from_json(&Value::Object(payload)) {
                Err(ProxyError::NotNumeric { field: found, .. }) => assert_eq!(found, field),
                other => panic!("Expected NotNumeric for {text}, got {other:?}"),
            }
        }
    }

    #[test]
    fn use_social_accepts_flags_numbers_and_words() {
        let parse = |v: Value| ProxyVector::from_json(&json!({ "use_social": v })).map(|p| p.use_social);
        assert!(!parse(json!(false)).unwrap());
        assert!(!parse(json!(0)).unwrap());
        assert!(parse(json!(2)).unwrap());
        assert!(!parse(json!("No")).unwrap());
        assert!(parse(json!("TRUE")).unwrap());
        assert!(matches!(parse(json!("maybe")), Err(ProxyError::NotBoolean { .. })));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(matches!(
            ProxyVector::from_json(&json!([1, 2, 3])),
            Err(ProxyError::NotAnObject(_))
        ));
        assert!(matches!(
            ProxyVector::from_json(&json!({"target": 3})),
            Err(ProxyError::NotString { field: "target", .. })
        ));
    }

    #[test]
    fn target_labels_round_trip_through_parse() {
        for target in Target::ALL {
            assert_eq!(Target::parse(target.column()), Some(target));
        }
        assert_eq!(Target::parse("mhlth"), None);
        assert_eq!(Scenario::parse("full_social"), Some(Scenario::FullSocial));
        assert_eq!(Scenario::from_use_social(false), Scenario::NoSocial);
    }
}
