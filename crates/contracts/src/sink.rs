//! Sink traits
//!
//! `OutputSink` is what the aligner thread talks to; `DataSink` is what the
//! dispatcher's async workers drive.

use crate::{AlignedPair, ContractError};

/// Receiver of aligned pairs on the aligner thread
///
/// Called exactly once per emitted pair, in increasing trigger index order.
/// Implementations must return within a short bounded time and push any slow
/// work (disk, rendering) onto their own threads.
pub trait OutputSink: Send {
    fn accept(&mut self, pair: AlignedPair);
}

impl<F> OutputSink for F
where
    F: FnMut(AlignedPair) + Send,
{
    fn accept(&mut self, pair: AlignedPair) {
        self(pair)
    }
}

/// Data output trait
///
/// All dispatcher sink implementations must implement this trait.
#[trait_variant::make(DataSink: Send)]
pub trait LocalDataSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one aligned pair
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, pair: &AlignedPair) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
