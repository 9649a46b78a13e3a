//! Deterministic cache key construction.
//!
//! Query-shaped keys are built from a namespace and a parameter set:
//!
//! ```text
//! {app-prefix}:{namespace}:{sha256(canonical params)[..16]}
//! ```
//!
//! Parameters are sorted by name and nested objects are re-emitted with sorted keys
//! before hashing, so insertion order never changes the key.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::CacheError;
use crate::namespace::{Namespace, validate_segment};

/// Width of the hashed key suffix in hex characters.
pub const HASH_WIDTH: usize = 16;

/// Query parameters identifying one cached read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheParams(BTreeMap<String, Value>);

impl CacheParams {
    /// Creates an empty parameter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, replacing any previous value for the same name.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Inserts a parameter in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(name.into(), value.into());
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no parameters are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn canonical_bytes(&self) -> Result<Vec<u8>, CacheError> {
        let pairs: Vec<Value> = self
            .0
            .iter()
            .map(|(k, v)| Value::Array(vec![Value::String(k.clone()), canonicalize(v)]))
            .collect();
        serde_json::to_vec(&Value::Array(pairs))
            .map_err(|e| CacheError::malformed(format!("unserializable parameters: {e}")))
    }
}

impl<K, V> FromIterator<(K, V)> for CacheParams
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::with_capacity(sorted.len());
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// A fully built cache key together with the namespace it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    namespace: Namespace,
}

impl CacheKey {
    /// The key as stored in the backing store.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The namespace this key belongs to.
    #[must_use]
    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Builds keys under a fixed application prefix.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    prefix: String,
}

impl CacheKeyBuilder {
    /// Creates a builder for the given application prefix.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MalformedKey`] if the prefix is empty or contains
    /// separators, glob metacharacters or whitespace.
    pub fn new(prefix: impl Into<String>) -> Result<Self, CacheError> {
        let prefix = prefix.into();
        validate_segment("app prefix", &prefix)?;
        Ok(Self { prefix })
    }

    /// The application prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Builds a query key from a parameter set.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MalformedKey`] for an empty parameter name.
    pub fn build(&self, namespace: &Namespace, params: &CacheParams) -> Result<CacheKey, CacheError> {
        if params.0.keys().any(String::is_empty) {
            return Err(CacheError::malformed("parameter name must not be empty"));
        }

        let digest = Sha256::digest(params.canonical_bytes()?);
        let hash = hex::encode(digest);

        Ok(CacheKey {
            key: format!("{}:{}:{}", self.prefix, namespace, &hash[..HASH_WIDTH]),
            namespace: namespace.clone(),
        })
    }

    /// Builds a direct per-entity key, `{prefix}:{namespace}:{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MalformedKey`] if the id is empty or contains glob
    /// metacharacters or whitespace.
    pub fn entity_key(&self, namespace: &Namespace, id: &str) -> Result<CacheKey, CacheError> {
        validate_segment("entity id", id)?;
        Ok(CacheKey {
            key: format!("{}:{}:{}", self.prefix, namespace, id),
            namespace: namespace.clone(),
        })
    }

    /// Glob pattern matching every key in a namespace.
    #[must_use]
    pub fn namespace_pattern(&self, namespace: &Namespace) -> String {
        format!("{}:{}:*", self.prefix, namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn builder() -> CacheKeyBuilder {
        CacheKeyBuilder::new("jobquest").unwrap()
    }

    #[test]
    fn test_key_layout() {
        let key = builder()
            .build(&Namespace::JOBS, &CacheParams::new().with("limit", 20))
            .unwrap();
        let parts: Vec<&str> = key.as_str().split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "jobquest");
        assert_eq!(parts[1], "jobs");
        assert_eq!(parts[2].len(), HASH_WIDTH);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.namespace(), &Namespace::JOBS);
    }

    #[test]
    fn test_insertion_order_independent() {
        let a = CacheParams::new()
            .with("limit", 20)
            .with("offset", 0)
            .with("search", "rust")
            .with("remote_type", Value::Null);
        let reversed = CacheParams::new()
            .with("remote_type", Value::Null)
            .with("search", "rust")
            .with("offset", 0)
            .with("limit", 20);

        let b = builder();
        let key_a = b.build(&Namespace::SEARCH, &a).unwrap();
        assert_eq!(key_a, b.build(&Namespace::SEARCH, &reversed).unwrap());

        let key_b = b
            .build(
                &Namespace::SEARCH,
                &[
                    ("search", json!("rust")),
                    ("remote_type", Value::Null),
                    ("limit", json!(20)),
                    ("offset", json!(0)),
                ]
                .into_iter()
                .collect(),
            )
            .unwrap();
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let b = builder();
        let first: Value = serde_json::from_str(r#"{"salary":{"min":1,"max":2},"tags":["a"]}"#).unwrap();
        let second: Value = serde_json::from_str(r#"{"tags":["a"],"salary":{"max":2,"min":1}}"#).unwrap();
        let k1 = b.build(&Namespace::SEARCH, &CacheParams::new().with("filter", first)).unwrap();
        let k2 = b.build(&Namespace::SEARCH, &CacheParams::new().with("filter", second)).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_different_params_differ() {
        let b = builder();
        let k1 = b.build(&Namespace::JOBS, &CacheParams::new().with("offset", 0)).unwrap();
        let k2 = b.build(&Namespace::JOBS, &CacheParams::new().with("offset", 20)).unwrap();
        let k3 = b.build(&Namespace::SEARCH, &CacheParams::new().with("offset", 0)).unwrap();
        assert_ne!(k1, k2);
        assert_ne!(k1, k3);
    }

    #[test]
    fn test_malformed_keys() {
        let b = builder();
        assert!(matches!(
            b.build(&Namespace::JOBS, &CacheParams::new().with("", 1)),
            Err(CacheError::MalformedKey { .. })
        ));
        assert!(b.entity_key(&Namespace::COMPANY, "").is_err());
        assert!(b.entity_key(&Namespace::COMPANY, "a*").is_err());
        assert!(CacheKeyBuilder::new("").is_err());
        assert!(CacheKeyBuilder::new("job:quest").is_err());
    }

    #[test]
    fn test_entity_key_and_pattern() {
        let b = builder();
        let key = b.entity_key(&Namespace::COMPANY, "42").unwrap();
        assert_eq!(key.as_str(), "jobquest:company:42");
        assert_eq!(b.namespace_pattern(&Namespace::COMPANY), "jobquest:company:*");
    }
}
