// Data Source Interface
//
// The contract between the search engine and anything that can produce
// DER-encoded certificates.

use super::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// A data source for X.509 certificates.
#[async_trait]
pub trait Sourcer: Send + Sync {
    /// Sends all potentially-relevant X.509 certificates over the `certs`
    /// channel in their DER-encoded form. If an unrecoverable error is
    /// encountered, it is returned; otherwise `Ok(())` is returned once all
    /// available certificates have been exhausted.
    ///
    /// The channel's lifetime is owned by the search engine: a source must
    /// never close the channel beyond dropping its own sender when it
    /// returns. The engine observes end-of-stream only after every source
    /// has done so.
    ///
    /// If `cancel` fires before the data source is exhausted, the source
    /// returns [`SearchError::Cancelled`](crate::SearchError::Cancelled)
    /// promptly.
    async fn source(&self, cancel: CancellationToken, certs: mpsc::Sender<Vec<u8>>) -> Result<()>;
}
