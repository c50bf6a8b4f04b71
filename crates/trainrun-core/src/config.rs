//! Client-supplied run configuration.
//!
//! A [`RunConfig`] is an opaque JSON object. The core only inspects a fixed
//! subset of keys: the label, one of the data source keys, and a handful of
//! optional training options. Everything else is carried through untouched
//! (it is stored in the historic registry as the original configuration).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Inline data source keys, in lookup order.
pub const INLINE_DATA_KEYS: [&str; 2] = ["train_df", "train_data"];

/// File data source key.
pub const PATH_DATA_KEY: &str = "train_path";

/// Opaque configuration bag for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunConfig(Map<String, Value>);

/// Where the training data comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Data embedded in the configuration itself.
    Inline(Value),
    /// Data to be loaded from a file by the training operation.
    Path(PathBuf),
}

/// Kind of dataset the training operation should expect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    #[default]
    Tabular,
    #[serde(alias = "mm")]
    Multimodal,
    #[serde(alias = "series")]
    Timeseries,
}

impl RunConfig {
    /// Wrap an already-parsed JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a config from an arbitrary JSON value; only objects are accepted.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(CoreError::InvalidInput(format!(
                "cfg must be a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }

    /// Builder method to set a key (useful for tests and tooling).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Raw access to a key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// The underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Check the required-field subset. Pure; never mutates anything.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.label().is_none() {
            return Err(CoreError::Validation("cfg.label is required".to_string()));
        }
        if self.data_source().is_none() {
            return Err(CoreError::Validation(
                "no training data source: provide cfg.train_df, cfg.train_data or cfg.train_path"
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Target column / label identifier.
    pub fn label(&self) -> Option<&str> {
        self.get("label")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Resolve the data source. A file path wins over inline data.
    pub fn data_source(&self) -> Option<DataSource> {
        if let Some(path) = self
            .get(PATH_DATA_KEY)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
        {
            return Some(DataSource::Path(PathBuf::from(path)));
        }
        INLINE_DATA_KEYS
            .iter()
            .find_map(|key| self.get(key))
            .map(|v| DataSource::Inline(v.clone()))
    }

    /// Optional output directory.
    pub fn output_path(&self) -> Result<Option<PathBuf>, CoreError> {
        self.opt_str("path").map(|p| p.map(PathBuf::from))
    }

    /// Optional preset name.
    pub fn presets(&self) -> Result<Option<String>, CoreError> {
        self.opt_str("presets").map(|p| p.map(str::to_string))
    }

    /// Optional problem type (e.g. "binary", "regression").
    pub fn problem_type(&self) -> Result<Option<String>, CoreError> {
        self.opt_str("problem_type").map(|p| p.map(str::to_string))
    }

    /// Optional time budget in seconds.
    pub fn time_limit_secs(&self) -> Result<Option<f64>, CoreError> {
        match self.get("time_limit") {
            None => Ok(None),
            Some(v) => match v.as_f64() {
                Some(secs) if secs.is_finite() && secs > 0.0 => Ok(Some(secs)),
                _ => Err(CoreError::InvalidInput(format!(
                    "cfg.time_limit must be a positive number of seconds, got {}",
                    v
                ))),
            },
        }
    }

    /// Optional hyperparameter overrides; must be an object when present.
    pub fn hyperparameters(&self) -> Result<Option<Map<String, Value>>, CoreError> {
        match self.get("hyperparameters") {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map.clone())),
            Some(other) => Err(CoreError::InvalidInput(format!(
                "cfg.hyperparameters must be an object, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Data-kind discriminator; defaults to tabular.
    pub fn data_kind(&self) -> Result<DataKind, CoreError> {
        match self.get("data_type") {
            None => Ok(DataKind::default()),
            Some(v) => serde_json::from_value(v.clone()).map_err(|_| {
                CoreError::InvalidInput(format!("unsupported cfg.data_type: {}", v))
            }),
        }
    }

    /// Optional inline tuning data.
    pub fn tuning_data(&self) -> Option<&Value> {
        self.get("tuning_data")
    }

    fn opt_str(&self, key: &str) -> Result<Option<&str>, CoreError> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(CoreError::InvalidInput(format!(
                "cfg.{} must be a string, got {}",
                key,
                json_kind(other)
            ))),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg(value: Value) -> RunConfig {
        RunConfig::from_value(value).unwrap()
    }

    #[test]
    fn test_validate_requires_label() {
        let err = cfg(json!({"train_path": "/data/t.csv"}))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("label"));

        let err = cfg(json!({"label": "  ", "train_df": [1]}))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("label"));
    }

    #[test]
    fn test_validate_requires_data_source() {
        let err = cfg(json!({"label": "y"})).validate().unwrap_err();
        assert!(err.to_string().contains("data source"));

        let err = cfg(json!({"label": "y", "train_df": null}))
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("data source"));
    }

    #[test]
    fn test_validate_accepts_each_source() {
        assert!(cfg(json!({"label": "y", "train_df": {"a": [1, 2]}}))
            .validate()
            .is_ok());
        assert!(cfg(json!({"label": "y", "train_data": [[1, 2]]}))
            .validate()
            .is_ok());
        assert!(cfg(json!({"label": "y", "train_path": "/data/t.csv"}))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_path_wins_over_inline() {
        let c = cfg(json!({"label": "y", "train_df": [1], "train_path": "/d.csv"}));
        assert_eq!(
            c.data_source(),
            Some(DataSource::Path(PathBuf::from("/d.csv")))
        );
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(RunConfig::from_value(json!([1, 2])).is_err());
        assert!(RunConfig::from_value(json!("cfg")).is_err());
    }

    #[test]
    fn test_optional_fields() {
        let c = cfg(json!({
            "label": "y",
            "train_df": [],
            "time_limit": 60,
            "presets": "best_quality",
            "data_type": "mm",
            "hyperparameters": {"GBM": {}}
        }));
        assert_eq!(c.time_limit_secs().unwrap(), Some(60.0));
        assert_eq!(c.presets().unwrap().as_deref(), Some("best_quality"));
        assert_eq!(c.data_kind().unwrap(), DataKind::Multimodal);
        assert!(c.hyperparameters().unwrap().unwrap().contains_key("GBM"));
        assert_eq!(c.output_path().unwrap(), None);
    }

    #[test]
    fn test_malformed_optional_fields() {
        let c = cfg(json!({"label": "y", "train_df": [], "time_limit": "soon"}));
        assert!(c.validate().is_ok());
        assert!(c.time_limit_secs().is_err());

        let c = cfg(json!({"label": "y", "train_df": [], "data_type": "graph"}));
        assert!(c.data_kind().is_err());

        let c = cfg(json!({"label": "y", "train_df": [], "hyperparameters": 3}));
        assert!(c.hyperparameters().is_err());
    }
}
