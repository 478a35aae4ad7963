//! Turns a sparse JSON feature mapping into a model's ordered input vector.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};

/// What to do when a prediction request lacks an expected feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingFeaturePolicy {
    #[default]
    Reject,
    ZeroFill,
}

impl MissingFeaturePolicy {
    pub fn from_zero_fill(zero_fill: bool) -> Self {
        if zero_fill {
            MissingFeaturePolicy::ZeroFill
        } else {
            MissingFeaturePolicy::Reject
        }
    }
}

pub struct FeatureVectorizer<'a> {
    expected: &'a [String],
}

impl<'a> FeatureVectorizer<'a> {
    pub fn new(expected: &'a [String]) -> Self {
        Self { expected }
    }

    pub fn len(&self) -> usize {
        self.expected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }

    /// Never fails: absent, null or non-numeric features become `0.0`, each
    /// with a warning.
    pub fn vectorize(&self, mapping: &Map<String, Value>) -> Vec<f64> {
        self.expected
            .iter()
            .map(|name| match mapping.get(name) {
                Some(value) => numeric(value).unwrap_or_else(|| {
                    warn!(feature = %name, value = %value, "Non-numeric feature, using 0");
                    0.0
                }),
                None => {
                    warn!(feature = %name, "Missing feature, using 0");
                    0.0
                }
            })
            .collect()
    }

    /// Fails with `InvalidInput` naming every absent or non-numeric feature.
    pub fn vectorize_strict(&self, mapping: &Map<String, Value>) -> Result<Vec<f64>> {
        let mut out = Vec::with_capacity(self.expected.len());
        let mut missing = Vec::new();
        let mut invalid = Vec::new();
        for name in self.expected {
            match mapping.get(name) {
                None | Some(Value::Null) => missing.push(name.as_str()),
                Some(value) => match numeric(value) {
                    Some(v) => out.push(v),
                    None => invalid.push(name.as_str()),
                },
            }
        }
        if missing.is_empty() && invalid.is_empty() {
            return Ok(out);
        }
        let mut problems = Vec::new();
        if !missing.is_empty() {
            problems.push(format!("missing features: {}", missing.join(", ")));
        }
        if !invalid.is_empty() {
            problems.push(format!("non-numeric features: {}", invalid.join(", ")));
        }
        Err(Error::invalid(problems.join("; ")))
    }

    pub fn vectorize_with(
        &self,
        mapping: &Map<String, Value>,
        policy: MissingFeaturePolicy,
    ) -> Result<Vec<f64>> {
        match policy {
            MissingFeaturePolicy::Reject => self.vectorize_strict(mapping),
            MissingFeaturePolicy::ZeroFill => Ok(self.vectorize(mapping)),
        }
    }
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn mapping(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_vectorize_orders_by_expected_names() {
        let expected = names(&["hr", "temp", "holiday"]);
        let v = FeatureVectorizer::new(&expected);
        let out = v.vectorize(&mapping(json!({"temp": 0.5, "holiday": true, "hr": 8})));
        assert_eq!(out, vec![8.0, 0.5, 1.0]);
    }

    #[test]
    fn test_vectorize_is_total() {
        let expected = names(&["a", "b", "c", "d"]);
        let v = FeatureVectorizer::new(&expected);
        for input in [
            json!({}),
            json!({"a": "text", "z": 1}),
            json!({"a": null, "b": [1, 2], "c": {"x": 1}, "d": 2.5}),
        ] {
            assert_eq!(v.vectorize(&mapping(input)).len(), v.len());
        }
    }

    #[test]
    fn test_strict_names_every_problem() {
        let expected = names(&["hr", "temp", "hum"]);
        let v = FeatureVectorizer::new(&expected);
        let err = v
            .vectorize_strict(&mapping(json!({"temp": "warm"})))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("hr") && msg.contains("hum"));
        assert!(msg.contains("non-numeric features: temp"));
    }

    #[test]
    fn test_policy_dispatch() {
        let expected = names(&["hr", "temp"]);
        let v = FeatureVectorizer::new(&expected);
        let input = mapping(json!({"hr": 3}));
        assert!(v
            .vectorize_with(&input, MissingFeaturePolicy::Reject)
            .is_err());
        assert_eq!(
            v.vectorize_with(&input, MissingFeaturePolicy::ZeroFill).unwrap(),
            vec![3.0, 0.0]
        );
        assert_eq!(MissingFeaturePolicy::default(), MissingFeaturePolicy::Reject);
    }
}
