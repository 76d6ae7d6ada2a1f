mod clickhouse;

pub use self::clickhouse::{ClickHouseBatch, ClickHouseStore, PowerReadingRow};

use crate::error::WriteError;
use crate::readings::Reading;
use async_trait::async_trait;

/// A store that accepts one batch of readings per poll cycle.
#[async_trait]
pub trait ReadingStore: Send + Sync {
    type Batch: ReadingBatch;

    async fn open_batch(&self) -> Result<Self::Batch, WriteError>;
}

/// A scoped batch write. Rows become visible only after [`ReadingBatch::commit`].
#[async_trait]
pub trait ReadingBatch: Send {
    async fn append(&mut self, reading: &Reading) -> Result<(), WriteError>;

    /// Commits the batch and returns the number of rows sent.
    async fn commit(&mut self) -> Result<u64, WriteError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchAck {
    pub written: u64,
    pub dropped: u64,
}

/// Appends every reading to a fresh batch and commits it.
///
/// A reading that fails to append is dropped with a warning and the rest are
/// still committed. Open and commit failures lose the whole batch.
pub async fn write_batch<S: ReadingStore>(
    store: &S,
    readings: &[Reading],
) -> Result<BatchAck, WriteError> {
    if readings.is_empty() {
        tracing::debug!("no UPS readings this cycle; skipping insert");
        return Ok(BatchAck {
            written: 0,
            dropped: 0,
        });
    }

    let mut batch = store.open_batch().await?;
    let mut dropped = 0u64;
    for reading in readings {
        if let Err(err) = batch.append(reading).await {
            dropped += 1;
            tracing::warn!(
                device_id = reading.device_id,
                name = %reading.display_name,
                error = %err,
                "error appending reading to batch"
            );
        }
    }

    let written = batch.commit().await?;
    tracing::debug!(written, dropped, "committed power readings batch");
    Ok(BatchAck { written, dropped })
}
