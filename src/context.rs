//! Evolving key-value context passed between pipeline stages.

use anyhow::{bail, Context as _, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Named-field context that grows as stages run.
///
/// Fields are only ever added: inserting an existing key is an error, so a
/// stage cannot clobber what an earlier stage produced. Values are stored
/// as JSON so the whole context can be persisted inside a run record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    fields: BTreeMap<String, Value>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. Fails if the key is already present.
    pub fn insert<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        if self.fields.contains_key(key) {
            bail!("context field '{}' already set", key);
        }
        let value = serde_json::to_value(value)
            .with_context(|| format!("serialize context field '{}'", key))?;
        self.fields.insert(key.to_string(), value);
        Ok(())
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with<T: Serialize>(mut self, key: &str, value: &T) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }

    /// Read a field, deserializing into the requested type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .fields
            .get(key)
            .with_context(|| format!("context field '{}' missing", key))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("deserialize context field '{}'", key))
    }

    /// Raw JSON value of a field, if present.
    pub fn value(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// True if every field of `earlier` is also present here.
    pub fn extends(&self, earlier: &Context) -> bool {
        earlier.keys().all(|k| self.contains(k))
    }
}

#[cfg(test)]
mod tests {
    use super::Context;

    #[test]
    fn test_insert_and_get() {
        let ctx = Context::new()
            .with("handle", &"experilearning".to_string())
            .unwrap()
            .with("cutoff", &0.6_f64)
            .unwrap();

        let handle: String = ctx.get("handle").unwrap();
        assert_eq!(handle, "experilearning");
        let cutoff: f64 = ctx.get("cutoff").unwrap();
        assert!((cutoff - 0.6).abs() < f64::EPSILON);
    }

    #[test]
    fn test_duplicate_insert_is_error() {
        let mut ctx = Context::new();
        ctx.insert("posts", &vec!["a"]).unwrap();
        let err = ctx.insert("posts", &vec!["b"]).unwrap_err();
        assert!(err.to_string().contains("already set"));
        // The original value is untouched.
        let posts: Vec<String> = ctx.get("posts").unwrap();
        assert_eq!(posts, vec!["a"]);
    }

    #[test]
    fn test_missing_field_is_error() {
        let ctx = Context::new();
        assert!(ctx.get::<String>("absent").is_err());
    }

    #[test]
    fn test_extends() {
        let base = Context::new().with("a", &1).unwrap();
        let grown = base.clone().with("b", &2).unwrap();
        assert!(grown.extends(&base));
        assert!(!base.extends(&grown));
    }

    #[test]
    fn test_serde_round_trip() {
        let ctx = Context::new()
            .with("handle", &"user".to_string())
            .unwrap()
            .with("count", &3)
            .unwrap();
        let json = serde_json::to_string(&ctx).unwrap();
        let back: Context = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
    }
}
