// X.509 Certificate Search Engine
//
// This module provides the concurrent fan-in search pipeline: pluggable data
// sources feed DER-encoded certificates onto a shared channel, and a single
// consumer filters, parses, de-duplicates, and dispatches matches.

pub mod cacher;
pub mod engine;
pub mod source;

pub use cacher::{BloomCacher, Cacher, NopCacher, Sha256MapCacher};
pub use engine::{CertFilter, DerFilter, ErrorBehavior, MatchCallback, Search};
pub use source::Sourcer;

use crate::error::SearchError;

/// Result type for search operations
pub type Result<T> = std::result::Result<T, SearchError>;
