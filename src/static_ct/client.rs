// Static CT API Log Client
//
// HTTP fetch of checkpoint and data tile artifacts, plus the time-to-tile
// binary search used to bound searches over an ordered log.

use super::parser::{decode_tile, tile_path_from_index, TileEntry, TILE_ENTRY_COUNT};
use super::retry::Retry;
use super::Result;
use crate::error::SearchError;
use base64::Engine;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use reqwest::header;
use std::io::Read;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Checkpoints larger than this are rejected outright.
const MAX_CHECKPOINT_SIZE: usize = 1_000_000;

/// Per-request timeout for checkpoint and tile fetches.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Verifies the given checkpoint is parseable, then returns the parsed tree
/// size.
///
/// A checkpoint must contain at least three newlines and at most
/// [`MAX_CHECKPOINT_SIZE`] bytes. The first line is arbitrary; the second is
/// the tree size as a canonical decimal (no sign, no leading zeros); the
/// third is the base64 encoding of the 32-byte root hash.
pub fn tree_size_from_checkpoint(text: &str) -> Result<u64> {
    if text.bytes().filter(|&b| b == b'\n').count() < 3 || text.len() > MAX_CHECKPOINT_SIZE {
        return Err(SearchError::Checkpoint {
            message: "incorrect size".to_string(),
        });
    }

    let mut lines = text.splitn(4, '\n');
    lines.next(); // origin line
    let size_line = lines.next().unwrap_or_default();
    let hash_line = lines.next().unwrap_or_default();

    let tree_size: u64 = size_line.parse().map_err(|_| SearchError::Checkpoint {
        message: "invalid tree size".to_string(),
    })?;

    // Reject non-canonical encodings such as leading zeros or a plus sign
    if size_line != tree_size.to_string() {
        return Err(SearchError::Checkpoint {
            message: "invalid tree size".to_string(),
        });
    }

    let hash = base64::engine::general_purpose::STANDARD
        .decode(hash_line)
        .map_err(|_| SearchError::Checkpoint {
            message: "invalid root hash".to_string(),
        })?;
    if hash.len() != 32 {
        return Err(SearchError::Checkpoint {
            message: "invalid root hash".to_string(),
        });
    }

    Ok(tree_size)
}

/// A tiled CT log implementing the Static CT API spec.
pub struct StaticCtLog {
    http: reqwest::Client,
    endpoint: Url,

    /// Retry behavior used by
    /// [`tile_entries_with_backoff`](StaticCtLog::tile_entries_with_backoff).
    /// `None` or an invalid value falls back to [`Retry::default`].
    pub tile_retry: Option<Retry>,
}

impl StaticCtLog {
    /// Creates a client for the log served at `endpoint`.
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| SearchError::Http {
                operation: "building http client",
                source,
            })?;

        Ok(Self {
            http,
            endpoint,
            tile_retry: None,
        })
    }

    /// Appends `path` segments to the endpoint, preserving any base path.
    fn endpoint_url(&self, path: &str) -> Result<Url> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SearchError::config("endpoint URL cannot be a base"))?;
            segments.pop_if_empty();
            for segment in path.split('/') {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    /// Fetches the data tile at the given index and parses the entries from
    /// it.
    ///
    /// The request advertises `Accept-Encoding: gzip, identity`; the body is
    /// decompressed if and only if the response announces gzip encoding.
    pub async fn tile_entries(
        &self,
        cancel: &CancellationToken,
        tile_index: u64,
    ) -> Result<Vec<TileEntry>> {
        let url = self.endpoint_url(&format!("tile/data/{}", tile_path_from_index(tile_index)))?;

        let response = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            result = self
                .http
                .get(url.clone())
                .header(header::ACCEPT_ENCODING, "gzip, identity")
                .send() => result.map_err(|source| SearchError::Http {
                    operation: "requesting tile",
                    source,
                })?,
        };

        if response.status().as_u16() != 200 {
            return Err(SearchError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let gzipped = response
            .headers()
            .get(header::CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("gzip"));

        let body = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            result = response.bytes() => result.map_err(|source| SearchError::Http {
                operation: "reading response body",
                source,
            })?,
        };

        let tile_data = if gzipped {
            let mut decompressed = Vec::new();
            GzDecoder::new(body.as_ref())
                .read_to_end(&mut decompressed)
                .map_err(|source| SearchError::Gzip { source })?;
            decompressed
        } else {
            body.to_vec()
        };

        decode_tile(&tile_data)
    }

    /// Fetches the data tile at the given index and parses the entries from
    /// it, retrying the request upon failure according to the settings in
    /// `tile_retry`.
    pub async fn tile_entries_with_backoff(
        &self,
        cancel: &CancellationToken,
        tile_index: u64,
    ) -> Result<Vec<TileEntry>> {
        let retry = match self.tile_retry {
            Some(retry) if retry.validate().is_ok() => retry,
            _ => Retry::default(),
        };

        retry
            .run(cancel, || self.tile_entries(cancel, tile_index))
            .await
    }

    /// Returns the index of the last full tile currently available in the
    /// log, derived from the published checkpoint's tree size.
    pub async fn last_full_tile_index(&self, cancel: &CancellationToken) -> Result<u64> {
        let url = self.endpoint_url("checkpoint")?;

        let response = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            result = self.http.get(url.clone()).send() => {
                result.map_err(|source| SearchError::Http {
                    operation: "requesting checkpoint",
                    source,
                })?
            }
        };

        if response.status().as_u16() != 200 {
            return Err(SearchError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let checkpoint = tokio::select! {
            biased;

            _ = cancel.cancelled() => return Err(SearchError::Cancelled),
            result = response.text() => result.map_err(|source| SearchError::Http {
                operation: "reading response body",
                source,
            })?,
        };

        let tree_size = tree_size_from_checkpoint(&checkpoint)
            .map_err(|err| err.context("parsing tree size from checkpoint"))?;

        // Integer division excludes any partial trailing tile
        Ok(tree_size / TILE_ENTRY_COUNT as u64)
    }

    /// Performs a binary search against the log to find the index of the
    /// data tile containing the given timestamp, bounded between
    /// `start_tile` and `end_tile`.
    ///
    /// This takes advantage of the fact that in practice, logs implementing
    /// the Static CT API store their entries in non-decreasing timestamp
    /// order.
    pub async fn tile_index_from_time(
        &self,
        cancel: &CancellationToken,
        t: DateTime<Utc>,
        start_tile: u64,
        end_tile: u64,
    ) -> Result<u64> {
        let target = t.timestamp_millis();

        let mut low = start_tile;
        let mut high = end_tile;
        while low <= high {
            let pivot = low + (high - low) / 2;
            let entries = self
                .tile_entries(cancel, pivot)
                .await
                .map_err(|err| err.context("getting entries for tile"))?;

            if target < entries[0].timestamp {
                if pivot == 0 {
                    break;
                }
                high = pivot - 1;
                continue;
            }

            if target > entries[TILE_ENTRY_COUNT - 1].timestamp {
                low = pivot + 1;
                continue;
            }

            return Ok(pivot);
        }

        Err(SearchError::TimeOutOfRange)
    }

    /// Finds the indexes of the data tiles bounding the timespan described
    /// by `start_time` and `end_time`.
    pub async fn bounding_tiles_from_times(
        &self,
        cancel: &CancellationToken,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<(u64, u64)> {
        if start_time >= end_time {
            return Err(SearchError::config("start time is not before end time"));
        }

        let last_tile = self
            .last_full_tile_index(cancel)
            .await
            .map_err(|err| err.context("getting index of current final tile"))?;

        let start_index = self
            .tile_index_from_time(cancel, start_time, 0, last_tile)
            .await
            .map_err(|err| err.context("getting index of start tile"))?;

        // Use the index that was already found to bound the next search
        let end_index = self
            .tile_index_from_time(cancel, end_time, start_index, last_tile)
            .await
            .map_err(|err| err.context("getting index of end tile"))?;

        Ok((start_index, end_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(size_line: &str, hash_line: &str) -> String {
        format!("log.example/origin\n{size_line}\n{hash_line}\n")
    }

    fn valid_hash() -> String {
        base64::engine::general_purpose::STANDARD.encode([0u8; 32])
    }

    #[test]
    fn test_checkpoint_parses_tree_size() {
        let text = checkpoint("12345", &valid_hash());
        assert_eq!(tree_size_from_checkpoint(&text).unwrap(), 12345);
    }

    #[test]
    fn test_checkpoint_accepts_zero_tree_size() {
        let text = checkpoint("0", &valid_hash());
        assert_eq!(tree_size_from_checkpoint(&text).unwrap(), 0);
    }

    #[test]
    fn test_checkpoint_rejects_too_few_newlines() {
        let text = format!("log.example/origin\n12345\n{}", valid_hash());
        assert!(tree_size_from_checkpoint(&text).is_err());
    }

    #[test]
    fn test_checkpoint_rejects_oversized_text() {
        let mut text = checkpoint("12345", &valid_hash());
        text.push_str(&" ".repeat(MAX_CHECKPOINT_SIZE));
        assert!(tree_size_from_checkpoint(&text).is_err());
    }

    #[test]
    fn test_checkpoint_rejects_non_canonical_tree_sizes() {
        for size_line in ["007", "-1", "+5", "12a", "", " 12", "12 "] {
            let text = checkpoint(size_line, &valid_hash());
            assert!(
                tree_size_from_checkpoint(&text).is_err(),
                "size line {size_line:?}"
            );
        }
    }

    #[test]
    fn test_checkpoint_rejects_bad_root_hashes() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 31]);
        let long = base64::engine::general_purpose::STANDARD.encode([0u8; 33]);

        for hash_line in ["", "not base64!!", short.as_str(), long.as_str()] {
            let text = checkpoint("12345", hash_line);
            assert!(
                tree_size_from_checkpoint(&text).is_err(),
                "hash line {hash_line:?}"
            );
        }
    }

    #[test]
    fn test_endpoint_url_preserves_base_path() {
        let log = StaticCtLog::new("https://log.example/prefix").unwrap();
        let url = log.endpoint_url("tile/data/x001/000").unwrap();
        assert_eq!(
            url.as_str(),
            "https://log.example/prefix/tile/data/x001/000"
        );

        let log = StaticCtLog::new("https://log.example/prefix/").unwrap();
        let url = log.endpoint_url("checkpoint").unwrap();
        assert_eq!(url.as_str(), "https://log.example/prefix/checkpoint");
    }

    #[test]
    fn test_new_rejects_invalid_endpoint() {
        assert!(StaticCtLog::new("not a url").is_err());
    }
}
