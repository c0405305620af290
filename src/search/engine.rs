// Search Engine - Concurrent fan-in over certificate data sources
//
// One task per data source feeds a shared bounded channel; a single consumer
// applies the filter pipeline and dispatches match callbacks.

use super::cacher::{Cacher, NopCacher};
use super::source::Sourcer;
use super::Result;
use crate::error::SearchError;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use x509_parser::prelude::*;

/// What happens when one of the data sources encounters an unrecoverable
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorBehavior {
    /// Cancel the search and return the error that caused the cancellation.
    #[default]
    Cancel,

    /// Continue the search without the data source that errored.
    Continue,
}

/// Pre-parse filter over the raw DER bytes of a candidate certificate.
pub type DerFilter = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Post-parse filter over a structured certificate.
pub type CertFilter = Box<dyn FnMut(&X509Certificate<'_>) -> bool + Send>;

/// Callback invoked for each de-duplicated match.
pub type MatchCallback = Box<dyn FnMut(&X509Certificate<'_>) + Send>;

/// An X.509 certificate search supporting multiple concurrent data sources
/// and match de-duplication.
#[derive(Default)]
pub struct Search {
    /// `der_filter` should return true if the raw DER bytes that were passed
    /// in match the desired search parameters, and false otherwise. It is
    /// called for each certificate discovered by one of the configured data
    /// sources, and may be called more than once for any given certificate.
    /// If `der_filter` returns false, the certificate in question will not
    /// be parsed or passed to `filter`.
    ///
    /// Rejecting early here is the main performance lever when processing
    /// very large candidate volumes, since it short-circuits DER parsing.
    ///
    /// A single task is responsible for invoking `der_filter`, so it is safe
    /// to access memory outside of the closure if desired. If `None`, every
    /// certificate is accepted.
    pub der_filter: Option<DerFilter>,

    /// `filter` should return true if the certificate that was passed in
    /// matches the desired search parameters, and false otherwise. It is
    /// only called for certificates that `der_filter` accepted and that
    /// parsed successfully.
    ///
    /// A single task is responsible for invoking `filter`, so it is safe to
    /// access memory outside of the closure if desired. If `None`, every
    /// certificate is accepted.
    pub filter: Option<CertFilter>,

    /// `match_callback` is called for each certificate matching the search
    /// filters that hasn't already been cached by `match_cacher`.
    ///
    /// A single task is responsible for invoking `match_callback`, so it is
    /// safe to access memory outside of the closure if desired.
    pub match_callback: Option<MatchCallback>,

    /// All the data sources to be used in the search. For each data source,
    /// a dedicated task will be created where its
    /// [`Sourcer::source`] method is invoked.
    pub data_sources: Vec<Box<dyn Sourcer>>,

    /// Handles de-duplication of matches. Performance and behavioral
    /// characteristics are determined by the chosen implementation.
    ///
    /// If `None`, a [`NopCacher`] is used, which disables de-duplication.
    pub match_cacher: Option<Box<dyn Cacher>>,

    /// Determines what happens when one of the data sources encounters an
    /// unrecoverable error.
    pub error_behavior: ErrorBehavior,
}

impl Search {
    /// Runs the search, blocking until all data sources have been exhausted.
    ///
    /// If `error_behavior` is [`ErrorBehavior::Continue`], the search will
    /// continue even if one or more data sources encounter an unrecoverable
    /// error. If it is [`ErrorBehavior::Cancel`] and a data source
    /// encounters an unrecoverable error, `execute` cancels the remaining
    /// sources and returns the encountered error.
    ///
    /// Cancelling `cancel` tears the search down promptly; `execute` then
    /// returns [`SearchError::Cancelled`].
    pub async fn execute(self, cancel: CancellationToken) -> Result<()> {
        if self.der_filter.is_none() && self.filter.is_none() {
            return Err(SearchError::config("no filter functions"));
        }
        let Some(mut match_callback) = self.match_callback else {
            return Err(SearchError::config("no match callback function"));
        };
        if self.data_sources.is_empty() {
            return Err(SearchError::config("no data sources"));
        }
        if cancel.is_cancelled() {
            return Err(SearchError::Cancelled);
        }

        // For both filter functions, default to matching everything
        let mut der_filter = self.der_filter.unwrap_or_else(|| Box::new(|_| true));
        let mut filter = self.filter.unwrap_or_else(|| Box::new(|_| true));
        let mut cacher: Box<dyn Cacher> = self
            .match_cacher
            .unwrap_or_else(|| Box::new(NopCacher));

        // Cancel-with-cause: the cause cell is written at most once, by the
        // first source failure under the Cancel policy. External
        // cancellation leaves it empty.
        let token = cancel.child_token();
        let cause: Arc<Mutex<Option<SearchError>>> = Arc::new(Mutex::new(None));

        // Allow each data source to send certificates concurrently
        let (certs_tx, mut certs_rx) = mpsc::channel::<Vec<u8>>(self.data_sources.len());

        let mut sources = JoinSet::new();
        for data_source in self.data_sources {
            let certs = certs_tx.clone();
            let token = token.clone();
            let cause = Arc::clone(&cause);
            let error_behavior = self.error_behavior;

            sources.spawn(async move {
                if let Err(err) = data_source.source(token.clone(), certs).await {
                    match error_behavior {
                        ErrorBehavior::Cancel => {
                            error!(error = %err, "data source encountered error, cancelling search");
                            let mut slot =
                                cause.lock().unwrap_or_else(PoisonError::into_inner);
                            if slot.is_none() {
                                *slot = Some(err);
                                token.cancel();
                            }
                        }
                        ErrorBehavior::Continue => {
                            error!(error = %err, "data source encountered error, continuing without it");
                        }
                    }
                }
            });
        }

        // Every source task holds a sender clone that drops when the task
        // returns, so the receiver observes end-of-stream exactly once,
        // after all sources have finished. Sources never close the channel
        // themselves.
        drop(certs_tx);

        loop {
            tokio::select! {
                // Cancellation takes priority over buffered certificates
                biased;

                _ = token.cancelled() => {
                    let mut slot = cause.lock().unwrap_or_else(PoisonError::into_inner);
                    return Err(slot.take().unwrap_or(SearchError::Cancelled));
                }
                received = certs_rx.recv() => {
                    // End-of-stream means the search has finished
                    let Some(cert_bytes) = received else {
                        return Ok(());
                    };

                    // If the certificate doesn't match the pre-parse filter
                    // function, ignore it
                    if !der_filter(&cert_bytes) {
                        continue;
                    }

                    // Certificates must be parseable ASN.1 DER data
                    let cert = match X509Certificate::from_der(&cert_bytes) {
                        Ok((_, cert)) => cert,
                        Err(err) => {
                            warn!(error = %err, "parsing certificate");
                            continue;
                        }
                    };

                    // If the certificate doesn't match the filter function,
                    // ignore it
                    if !filter(&cert) {
                        continue;
                    }

                    // Add this match to the cache. If it has been seen
                    // before, skip running the callback
                    if cacher.cache(&cert_bytes) {
                        continue;
                    }

                    match_callback(&cert);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EmptySource;

    #[async_trait]
    impl Sourcer for EmptySource {
        async fn source(
            &self,
            _cancel: CancellationToken,
            _certs: mpsc::Sender<Vec<u8>>,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn accept_all_search() -> Search {
        Search {
            der_filter: Some(Box::new(|_| true)),
            match_callback: Some(Box::new(|_| {})),
            data_sources: vec![Box::new(EmptySource)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_execute_requires_a_filter() {
        let search = Search {
            match_callback: Some(Box::new(|_| {})),
            data_sources: vec![Box::new(EmptySource)],
            ..Default::default()
        };

        let err = search.execute(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, SearchError::Config { .. }));
        assert!(err.to_string().contains("filter"));
    }

    #[tokio::test]
    async fn test_execute_requires_a_callback() {
        let search = Search {
            der_filter: Some(Box::new(|_| true)),
            data_sources: vec![Box::new(EmptySource)],
            ..Default::default()
        };

        let err = search.execute(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("callback"));
    }

    #[tokio::test]
    async fn test_execute_requires_data_sources() {
        let search = Search {
            der_filter: Some(Box::new(|_| true)),
            match_callback: Some(Box::new(|_| {})),
            ..Default::default()
        };

        let err = search.execute(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("data sources"));
    }

    #[tokio::test]
    async fn test_execute_rejects_pre_cancelled_token() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = accept_all_search().execute(cancel).await.unwrap_err();
        assert!(matches!(err, SearchError::Cancelled));
    }

    #[tokio::test]
    async fn test_execute_with_exhausted_source_returns_ok() {
        accept_all_search()
            .execute(CancellationToken::new())
            .await
            .unwrap();
    }

    #[test]
    fn test_error_behavior_defaults_to_cancel() {
        assert_eq!(ErrorBehavior::default(), ErrorBehavior::Cancel);
    }
}
