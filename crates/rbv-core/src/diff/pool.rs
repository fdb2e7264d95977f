//! Bounded worker pool for per-slice diffing.
//!
//! Slices are independent, so each matched pair is diffed on the blocking
//! pool with at most `max_concurrent` in flight. Results land in their
//! planned slot, so output order never depends on completion order.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument};

use crate::diff::{
    diff_trees, ensure_comparable, plan, DiffEngine, DiffResult, PlannedSlice,
};
use crate::domain::{Result, SliceSet, VerifyError};

impl DiffEngine {
    /// Compare two sets, diffing matched slices concurrently.
    ///
    /// Produces exactly what [`DiffEngine::compare`] produces for the same
    /// input.
    #[instrument(skip_all, fields(official = official.len(), built = built.len()))]
    pub async fn compare_parallel(
        &self,
        official: &SliceSet,
        built: &SliceSet,
    ) -> Result<Vec<DiffResult>> {
        ensure_comparable(official, built)?;

        let planned = plan(official, built);
        let mut slots: Vec<Option<DiffResult>> = vec![None; planned.len()];
        let sem = Arc::new(Semaphore::new(self.max_concurrent()));
        let mut join_set = JoinSet::new();

        for (idx, item) in planned.into_iter().enumerate() {
            match item {
                PlannedSlice::Absent { id, direction } => {
                    slots[idx] = Some(DiffResult::absent(id, direction));
                }
                PlannedSlice::Pair {
                    id,
                    official,
                    built,
                } => {
                    let permit = Arc::clone(&sem)
                        .acquire_owned()
                        .await
                        .map_err(|e| VerifyError::Worker(e.to_string()))?;
                    let classifier = self.classifier().clone();
                    join_set.spawn_blocking(move || {
                        let _permit = permit;
                        let paths = diff_trees(&official, &built, &classifier);
                        (idx, DiffResult::from_paths(id, paths))
                    });
                }
            }
        }

        while let Some(joined) = join_set.join_next().await {
            let (idx, result) =
                joined.map_err(|e| VerifyError::Worker(format!("slice diff task failed: {e}")))?;
            debug!(slice = %result.slice, differing = result.differing_paths().len(), "slice diffed");
            slots[idx] = Some(result);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.ok_or_else(|| VerifyError::Worker(format!("missing diff result for slot {idx}")))
            })
            .collect()
    }
}
