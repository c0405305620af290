// Static CT API Tiled Log Module
//
// This module provides a client and data source for tile-structured
// append-only certificate logs implementing the Static CT API.

pub mod client;
pub mod parser;
pub mod retry;
pub mod source;

pub use client::{tree_size_from_checkpoint, StaticCtLog};
pub use parser::{
    decode_tile, read_tile_leaf, tile_index_from_path, tile_path_from_index, TileEntry,
    TILE_ENTRY_COUNT,
};
pub use retry::Retry;
pub use source::StaticCtSource;

use crate::error::SearchError;

/// Result type for tiled log operations
pub type Result<T> = std::result::Result<T, SearchError>;
