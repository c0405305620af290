// Tiled Log Data Source
//
// Resolves a time window to a tile index range and downloads the tiles with
// a bounded worker pool, emitting certificate bytes for the search engine.

use super::client::StaticCtLog;
use super::Result;
use crate::error::SearchError;
use crate::search::Sourcer;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A [`Sourcer`] that streams certificates from a tiled log.
///
/// The time window is resolved to a tile index range with the log client's
/// bounding search, then the tiles are downloaded by up to
/// `max_connections` concurrent workers. Tiles that still fail after the
/// client's retry budget is spent are logged and skipped rather than
/// failing the source.
pub struct StaticCtSource {
    /// The tiled log that should be searched.
    pub log: Arc<StaticCtLog>,

    /// Causes precertificates to be included in the output of this data
    /// source.
    pub include_precertificates: bool,

    /// Causes final certificates to be included in the output of this data
    /// source.
    pub include_certificates: bool,

    /// The timestamp used to determine the starting data tile for the
    /// search. It must fall within the timespan that the log was accepting
    /// entries.
    pub start_time_inclusive: DateTime<Utc>,

    /// The timestamp used to determine the ending data tile for the search.
    /// It must fall within the timespan that the log was accepting entries.
    pub end_time_inclusive: DateTime<Utc>,

    /// The number of concurrent requests that should be used to download
    /// data tiles from the log. Values below 2 make the requests
    /// sequentially.
    pub max_connections: usize,
}

#[async_trait]
impl Sourcer for StaticCtSource {
    async fn source(&self, cancel: CancellationToken, certs: mpsc::Sender<Vec<u8>>) -> Result<()> {
        if !(self.include_certificates || self.include_precertificates) {
            return Err(SearchError::config(
                "neither precertificates nor certificates are selected",
            ));
        }

        let concurrency = self.max_connections.max(1);

        let (start_index, end_index) = self
            .log
            .bounding_tiles_from_times(&cancel, self.start_time_inclusive, self.end_time_inclusive)
            .await
            .map_err(|err| err.context("determining search bounds"))?;

        info!(
            start_tile = start_index,
            end_tile = end_index,
            "determined search bounds"
        );

        let (work_tx, work_rx) = mpsc::channel::<u64>(concurrency);
        let work_rx = Arc::new(Mutex::new(work_rx));

        // Enumerator: push every tile index in the range, then close the
        // work channel by dropping the sender
        let enumerator_cancel = cancel.clone();
        tokio::spawn(async move {
            for tile_index in start_index..=end_index {
                tokio::select! {
                    biased;

                    _ = enumerator_cancel.cancelled() => return,
                    result = work_tx.send(tile_index) => {
                        if result.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let log = Arc::clone(&self.log);
            let work_rx = Arc::clone(&work_rx);
            let certs = certs.clone();
            let cancel = cancel.clone();
            let include_precertificates = self.include_precertificates;
            let include_certificates = self.include_certificates;

            workers.spawn(async move {
                loop {
                    let next = {
                        let mut work_rx = work_rx.lock().await;
                        tokio::select! {
                            biased;

                            _ = cancel.cancelled() => None,
                            tile_index = work_rx.recv() => tile_index,
                        }
                    };
                    let Some(tile_index) = next else {
                        return;
                    };

                    let entries = match log.tile_entries_with_backoff(&cancel, tile_index).await {
                        Ok(entries) => entries,
                        Err(SearchError::Cancelled) => return,
                        Err(err) => {
                            // Per-tile failures are not fatal to the source
                            warn!(tile = tile_index, error = %err, "getting entries for tile");
                            continue;
                        }
                    };

                    for entry in entries {
                        let bytes = if entry.is_precert {
                            if !include_precertificates {
                                continue;
                            }
                            entry.pre_certificate
                        } else {
                            if !include_certificates {
                                continue;
                            }
                            entry.certificate
                        };

                        tokio::select! {
                            biased;

                            _ = cancel.cancelled() => return,
                            result = certs.send(bytes) => {
                                if result.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            });
        }

        while let Some(result) = workers.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "tile worker failed");
            }
        }

        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_source_requires_an_inclusion_flag() {
        let source = StaticCtSource {
            log: Arc::new(StaticCtLog::new("https://log.example").unwrap()),
            include_precertificates: false,
            include_certificates: false,
            start_time_inclusive: Utc.timestamp_millis_opt(0).unwrap(),
            end_time_inclusive: Utc.timestamp_millis_opt(1).unwrap(),
            max_connections: 1,
        };

        let (tx, _rx) = mpsc::channel(1);
        let err = source
            .source(CancellationToken::new(), tx)
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::Config { .. }));
    }
}
