//! Cache namespaces and their default TTLs.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// A logical grouping of cache keys that can be invalidated in bulk.
///
/// Namespace names become one segment of a `prefix:namespace:suffix` key and of the
/// `prefix:namespace:*` invalidation pattern, so they may not contain separators,
/// glob metacharacters or whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(Cow<'static, str>);

impl Namespace {
    pub const DEFAULT: Self = Self(Cow::Borrowed("default"));
    pub const SEARCH: Self = Self(Cow::Borrowed("search"));
    pub const COMPANY: Self = Self(Cow::Borrowed("company"));
    pub const USER: Self = Self(Cow::Borrowed("user"));
    pub const JOB_DETAIL: Self = Self(Cow::Borrowed("job_detail"));
    pub const GRAPHQL_QUERY: Self = Self(Cow::Borrowed("graphql_query"));
    pub const APPLICATION: Self = Self(Cow::Borrowed("application"));
    pub const SESSION: Self = Self(Cow::Borrowed("session"));

    // Collection namespaces used by list/search read paths.
    pub const JOBS: Self = Self(Cow::Borrowed("jobs"));
    pub const COMPANIES: Self = Self(Cow::Borrowed("companies"));
    pub const USERS: Self = Self(Cow::Borrowed("users"));
    pub const APPLICATIONS: Self = Self(Cow::Borrowed("applications"));
    pub const GRAPHQL: Self = Self(Cow::Borrowed("graphql"));

    /// Creates a validated namespace.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::MalformedKey`] if the name is empty or contains `:`,
    /// glob metacharacters or whitespace.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Result<Self, CacheError> {
        let name = name.into();
        validate_segment("namespace", &name)?;
        Ok(Self(name))
    }

    /// Returns the namespace name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Every namespace the data layer itself reads or writes.
    #[must_use]
    pub fn well_known() -> [Self; 13] {
        [
            Self::DEFAULT,
            Self::SEARCH,
            Self::COMPANY,
            Self::USER,
            Self::JOB_DETAIL,
            Self::GRAPHQL_QUERY,
            Self::APPLICATION,
            Self::SESSION,
            Self::JOBS,
            Self::COMPANIES,
            Self::USERS,
            Self::APPLICATIONS,
            Self::GRAPHQL,
        ]
    }
}

/// Rejects key segments that would break key layout or glob matching.
pub(crate) fn validate_segment(what: &str, value: &str) -> Result<(), CacheError> {
    if value.is_empty() {
        return Err(CacheError::malformed(format!("{what} must not be empty")));
    }
    if let Some(c) = value
        .chars()
        .find(|c| matches!(c, ':' | '*' | '?' | '[' | ']') || c.is_whitespace())
    {
        return Err(CacheError::malformed(format!(
            "{what} '{value}' contains forbidden character {c:?}"
        )));
    }
    Ok(())
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for Namespace {
    type Error = CacheError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0.into_owned()
    }
}

/// Default TTL per namespace, with configured overrides applied.
#[derive(Debug, Clone)]
pub struct NamespaceTtls {
    ttls: HashMap<String, Duration>,
}

impl Default for NamespaceTtls {
    fn default() -> Self {
        let ttls = [
            ("default", 300),
            ("search", 180),
            ("company", 3600),
            ("user", 1800),
            ("job_detail", 600),
            ("graphql_query", 300),
            ("application", 900),
            ("session", 86400),
        ]
        .into_iter()
        .map(|(ns, secs)| (ns.to_string(), Duration::from_secs(secs)))
        .collect();

        Self { ttls }
    }
}

impl NamespaceTtls {
    /// Applies per-namespace overrides given in seconds.
    #[must_use]
    pub fn with_overrides<'a>(mut self, overrides: impl IntoIterator<Item = (&'a String, &'a u64)>) -> Self {
        for (ns, secs) in overrides {
            self.ttls.insert(ns.clone(), Duration::from_secs(*secs));
        }
        self
    }

    /// TTL for a namespace, falling back to the `default` entry.
    #[must_use]
    pub fn ttl_for(&self, namespace: &Namespace) -> Duration {
        self.ttls
            .get(namespace.as_str())
            .or_else(|| self.ttls.get(Namespace::DEFAULT.as_str()))
            .copied()
            .unwrap_or(Duration::from_secs(300))
    }
}
