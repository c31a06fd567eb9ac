use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::Utc;

use super::domain::{
    BatchId, BatchStatus, ImportBatch, ImportedTripRecord, PartitionKey, TripKey,
};
use super::formats::FormatKind;

/// Storage for batches and trips so the service can be exercised in isolation.
///
/// Implementations must make `begin_batch` and `insert_trip` atomic check-then-insert
/// operations; the pipeline relies on the store, not on prior reads, to settle races
/// between concurrent commits.
pub trait IntakeRepository: Send + Sync {
    /// Record a new pending batch. Refused with `Conflict` while another batch with
    /// the same fingerprint and partition is pending, processing, or completed,
    /// unless the new batch is forced.
    fn begin_batch(&self, batch: ImportBatch) -> Result<ImportBatch, RepositoryError>;
    fn mark_processing(
        &self,
        id: &BatchId,
        format: FormatKind,
        total_rows: usize,
    ) -> Result<ImportBatch, RepositoryError>;
    fn complete_batch(&self, id: &BatchId) -> Result<ImportBatch, RepositoryError>;
    fn fail_batch(&self, id: &BatchId, reason: &str) -> Result<ImportBatch, RepositoryError>;
    fn find_completed_batch(
        &self,
        partition: &PartitionKey,
        fingerprint: &str,
    ) -> Result<Option<ImportBatch>, RepositoryError>;
    fn batch(&self, id: &BatchId) -> Result<Option<ImportBatch>, RepositoryError>;
    fn batches_in_partition(
        &self,
        partition: &PartitionKey,
    ) -> Result<Vec<ImportBatch>, RepositoryError>;
    /// Persist one trip. Actual-trip records colliding on (partition, vendor,
    /// external id) with an existing record are refused with `Conflict`.
    fn insert_trip(&self, record: ImportedTripRecord) -> Result<(), RepositoryError>;
    fn trips_for_batch(&self, id: &BatchId) -> Result<Vec<ImportedTripRecord>, RepositoryError>;
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Default)]
struct StoreState {
    batches: HashMap<BatchId, ImportBatch>,
    trips: Vec<ImportedTripRecord>,
    trip_keys: HashSet<TripKey>,
}

impl StoreState {
    fn open_batch(&mut self, id: &BatchId) -> Result<&mut ImportBatch, RepositoryError> {
        let batch = self.batches.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if batch.status.is_terminal() {
            return Err(RepositoryError::Conflict);
        }
        Ok(batch)
    }
}

/// Process-local store. One mutex guards batches, trips, and the uniqueness index.
#[derive(Default)]
pub struct InMemoryIntakeStore {
    state: Mutex<StoreState>,
}

impl InMemoryIntakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trip_count(&self) -> usize {
        self.state.lock().expect("store mutex poisoned").trips.len()
    }
}

impl IntakeRepository for InMemoryIntakeStore {
    fn begin_batch(&self, batch: ImportBatch) -> Result<ImportBatch, RepositoryError> {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        if guard.batches.contains_key(&batch.id) {
            return Err(RepositoryError::Conflict);
        }
        if !batch.forced {
            let clash = guard.batches.values().any(|existing| {
                existing.partition == batch.partition
                    && existing.fingerprint == batch.fingerprint
                    && existing.status != BatchStatus::Failed
            });
            if clash {
                return Err(RepositoryError::Conflict);
            }
        }
        guard.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    fn mark_processing(
        &self,
        id: &BatchId,
        format: FormatKind,
        total_rows: usize,
    ) -> Result<ImportBatch, RepositoryError> {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        let batch = guard.open_batch(id)?;
        batch.format = Some(format);
        batch.total_rows = total_rows;
        batch.transition(BatchStatus::Processing);
        Ok(batch.clone())
    }

    fn complete_batch(&self, id: &BatchId) -> Result<ImportBatch, RepositoryError> {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        let batch = guard.open_batch(id)?;
        batch.transition(BatchStatus::Completed);
        Ok(batch.clone())
    }

    fn fail_batch(&self, id: &BatchId, reason: &str) -> Result<ImportBatch, RepositoryError> {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        let batch = guard.open_batch(id)?;
        batch.fail(reason);
        Ok(batch.clone())
    }

    fn find_completed_batch(
        &self,
        partition: &PartitionKey,
        fingerprint: &str,
    ) -> Result<Option<ImportBatch>, RepositoryError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        Ok(guard
            .batches
            .values()
            .filter(|batch| {
                batch.status == BatchStatus::Completed
                    && batch.partition == *partition
                    && batch.fingerprint == fingerprint
            })
            .min_by_key(|batch| batch.completed_at.unwrap_or_else(Utc::now))
            .cloned())
    }

    fn batch(&self, id: &BatchId) -> Result<Option<ImportBatch>, RepositoryError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        Ok(guard.batches.get(id).cloned())
    }

    fn batches_in_partition(
        &self,
        partition: &PartitionKey,
    ) -> Result<Vec<ImportBatch>, RepositoryError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        let mut batches: Vec<ImportBatch> = guard
            .batches
            .values()
            .filter(|batch| batch.partition == *partition)
            .cloned()
            .collect();
        batches.sort_by_key(|batch| batch.created_at);
        Ok(batches)
    }

    fn insert_trip(&self, record: ImportedTripRecord) -> Result<(), RepositoryError> {
        let mut guard = self.state.lock().expect("store mutex poisoned");
        match guard.batches.get(&record.batch_id) {
            Some(batch) if batch.status == BatchStatus::Processing => {}
            Some(_) => return Err(RepositoryError::Conflict),
            None => return Err(RepositoryError::NotFound),
        }
        if let Some(key) = record.unique_key() {
            if !guard.trip_keys.insert(key) {
                return Err(RepositoryError::Conflict);
            }
        }
        guard.trips.push(record);
        Ok(())
    }

    fn trips_for_batch(&self, id: &BatchId) -> Result<Vec<ImportedTripRecord>, RepositoryError> {
        let guard = self.state.lock().expect("store mutex poisoned");
        Ok(guard
            .trips
            .iter()
            .filter(|record| record.batch_id == *id)
            .cloned()
            .collect())
    }
}
