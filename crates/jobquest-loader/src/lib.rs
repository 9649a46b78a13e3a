//! # jobquest-loader
//!
//! Request-scoped batched entity loading for the JobQuest data layer.
//!
//! Resolvers call `ctx.loader(kind).load(key)`; every load issued before the
//! dispatch task runs is coalesced into a single [`BatchFetcher`] call per entity
//! kind, results are memoized for the rest of the request, and concurrent loads of
//! one key share a single fetch.
//!
//! ## Modules
//!
//! - [`kind`] - Entity kinds and load keys
//! - [`fetcher`] - The [`BatchFetcher`] seam and the per-kind [`Fetchers`] set
//! - [`loader`] - The batching, memoizing [`Loader`]
//! - [`registry`] - Per-request [`LoaderRegistry`]
//! - [`context`] - Explicit [`RequestContext`] passed to resolvers
//! - [`layer`] - Process-level [`DataLayer`] wiring
//! - [`settings`] - Configuration loading
//! - [`observability`] - Tracing setup

pub mod config;
pub mod context;
pub mod error;
pub mod fetcher;
pub mod kind;
pub mod layer;
pub mod loader;
pub mod observability;
pub mod registry;
pub mod settings;

pub use config::{LoaderConfig, LoggingConfig};
pub use context::{ContextBuilderError, RequestContext, RequestContextBuilder};
pub use error::{FetchError, LoadError, SettingsError, StartError};
pub use fetcher::{BatchFetcher, DynBatchFetcher, FetchResult, Fetchers, FetchersBuilder, fetcher_fn};
pub use kind::{EntityId, EntityKind, LoadKey};
pub use layer::DataLayer;
pub use loader::{LoadedValue, Loader};
pub use registry::LoaderRegistry;
pub use settings::{Settings, load_dotenv};
