//! Entity kinds and load keys.

use std::fmt;

use jobquest_cache::Namespace;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of entity kinds the data layer batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Company,
    User,
    Job,
    JobApplication,
}

impl EntityKind {
    /// Every kind, in registry slot order.
    pub const ALL: [Self; 4] = [Self::Company, Self::User, Self::Job, Self::JobApplication];

    /// Stable name used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Company => "company",
            Self::User => "user",
            Self::Job => "job",
            Self::JobApplication => "job_application",
        }
    }

    pub(crate) fn slot(self) -> usize {
        match self {
            Self::Company => 0,
            Self::User => 1,
            Self::Job => 2,
            Self::JobApplication => 3,
        }
    }

    /// Namespace single entities of this kind are cached under.
    #[must_use]
    pub fn entity_namespace(self) -> Namespace {
        match self {
            Self::Company => Namespace::COMPANY,
            Self::User => Namespace::USER,
            Self::Job => Namespace::JOB_DETAIL,
            Self::JobApplication => Namespace::APPLICATION,
        }
    }

    /// Namespaces a write to this kind makes stale.
    #[must_use]
    pub fn invalidated_namespaces(self) -> &'static [Namespace] {
        const JOB: &[Namespace] = &[
            Namespace::JOBS,
            Namespace::SEARCH,
            Namespace::JOB_DETAIL,
            Namespace::GRAPHQL_QUERY,
        ];
        const COMPANY: &[Namespace] = &[
            Namespace::COMPANIES,
            Namespace::COMPANY,
            Namespace::JOBS,
            Namespace::SEARCH,
        ];
        const USER: &[Namespace] = &[Namespace::USERS, Namespace::USER, Namespace::SESSION];
        const APPLICATION: &[Namespace] = &[Namespace::APPLICATIONS, Namespace::APPLICATION];

        match self {
            Self::Job => JOB,
            Self::Company => COMPANY,
            Self::User => USER,
            Self::JobApplication => APPLICATION,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Key for loading one entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadKey {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl LoadKey {
    /// Creates a new load key.
    #[must_use]
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl fmt::Display for LoadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}
