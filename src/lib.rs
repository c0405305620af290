// certsearch - Build custom search tools over X.509 certificate streams

//! certsearch is a library for building custom search tools over X.509
//! certificates drawn from one or more concurrent data sources.
//!
//! A [`Search`] multiplexes DER-encoded certificate bytes from every
//! configured [`Sourcer`] onto a single bounded channel, runs them through a
//! two-stage filter (raw bytes first, parsed certificate second),
//! de-duplicates matches through a pluggable [`Cacher`], and hands each
//! surviving match to a callback. Filters, cacher, and callback all run
//! serially on the task that called [`Search::execute`], so user-supplied
//! logic does not need to be concurrency-safe.
//!
//! The [`static_ct`] module provides a built-in data source for tiled,
//! content-addressed certificate logs implementing the Static CT API:
//! checkpoint parsing, tile fetch with retry and backoff, a time-to-tile
//! binary search, and bounded parallel tile download.

pub mod error;
pub mod search;
pub mod static_ct;

// Re-export commonly used types
pub use crate::error::SearchError;
pub use crate::search::{
    BloomCacher, Cacher, ErrorBehavior, NopCacher, Search, Sha256MapCacher, Sourcer,
};
pub use crate::static_ct::{Retry, StaticCtLog, StaticCtSource};

/// Result type for certsearch operations
///
/// This is the standard Result type used throughout certsearch, wrapping the
/// structured SearchError enum for better error handling and exhaustive
/// matching.
pub type Result<T> = std::result::Result<T, SearchError>;
