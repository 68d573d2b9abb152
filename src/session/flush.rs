use super::reconciler::{Promotion, apply_resolved, payload_for};
use super::{Notification, SessionInner};
use crate::core::{CanvasError, Result, RowId};
use crate::validation::{self, IncompleteRow};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    AutoSave,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveFailure {
    pub row: RowId,
    pub message: String,
    pub retryable: bool,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// (temporary id, server id) per promoted row.
    pub promoted: Vec<(RowId, RowId)>,
    /// Persisted rows whose pending edits were saved.
    pub updated: Vec<RowId>,
    /// (merged row, surviving row).
    pub merged: Vec<(RowId, RowId)>,
    pub failures: Vec<SaveFailure>,
}

impl FlushReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn saved(&self) -> usize {
        self.promoted.len() + self.updated.len() + self.merged.len()
    }

    fn fail(&mut self, row: &RowId, err: &CanvasError) {
        self.failures.push(SaveFailure {
            row: row.clone(),
            message: err.to_string(),
            retryable: err.is_retryable(),
        });
    }
}

enum DirtySave {
    Updated(RowId),
    Merged { into: RowId },
    Skipped,
}

impl SessionInner {
    /// Save every complete temporary row (one at a time, in display order)
    /// and every dirty persisted row.
    ///
    /// Rows that fail keep their temporary id or dirty flag for the next
    /// attempt; nothing is retried here.
    pub(crate) async fn flush(self: &Arc<Self>, trigger: FlushTrigger) -> FlushReport {
        let _flushing = self.flush_lock.lock().await;

        let (temporary, dirty) = {
            let state = self.state.lock().await;
            let temporary: Vec<RowId> = state
                .table
                .ordered_ids()
                .into_iter()
                .filter(|id| {
                    id.is_temporary() && state.table.get(id).is_some_and(validation::is_complete)
                })
                .collect();
            (temporary, state.table.dirty_ids())
        };

        let mut report = FlushReport::default();

        for temp in &temporary {
            match self.promote(temp).await {
                Ok(Promotion::Created { server }) => report.promoted.push((temp.clone(), server)),
                Ok(Promotion::Merged { into }) => report.merged.push((temp.clone(), into)),
                Ok(Promotion::Skipped) => {}
                Err(err) => {
                    warn!(row = %temp, error = %err, "promotion failed");
                    report.fail(temp, &err);
                }
            }
        }

        for id in &dirty {
            match self.save_dirty(id).await {
                Ok(DirtySave::Updated(saved)) => report.updated.push(saved),
                Ok(DirtySave::Merged { into }) => report.merged.push((id.clone(), into)),
                Ok(DirtySave::Skipped) => {}
                Err(err) => {
                    warn!(row = %id, error = %err, "update failed");
                    report.fail(id, &err);
                }
            }
        }

        for failure in &report.failures {
            self.notify(
                Notification::failure(format!("Save failed: {}", failure.message))
                    .for_row(&failure.row),
            );
        }
        if report.is_clean() && report.saved() > 0 {
            self.notify(Notification::success(format!("Saved {} row(s)", report.saved())));
        }
        info!(
            ?trigger,
            promoted = report.promoted.len(),
            updated = report.updated.len(),
            merged = report.merged.len(),
            failures = report.failures.len(),
            "flush complete"
        );
        report
    }

    /// Push one dirty row. The flag is cleared only if the row still holds
    /// what was sent; an edit that arrived meanwhile keeps it dirty.
    ///
    /// The duplicate check runs again on the resolved ids, since a subject
    /// that could not be resolved at edit time skipped it.
    async fn save_dirty(self: &Arc<Self>, id: &RowId) -> Result<DirtySave> {
        let row = {
            let state = self.state.lock().await;
            let Some(target) = state.table.resolve(id) else {
                return Ok(DirtySave::Skipped);
            };
            if !state.table.is_dirty(&target) {
                return Ok(DirtySave::Skipped);
            }
            match state.table.get(&target) {
                Some(row) if validation::is_complete(row) => row.clone(),
                _ => return Ok(DirtySave::Skipped),
            }
        };

        let resolved = self
            .entities
            .resolve(&row.primary_subject, &row.secondary_subject, &row.tag_names())
            .await?;

        let duplicate = {
            let mut state = self.state.lock().await;
            if let Some(current) = state.table.get_mut(&row.id) {
                apply_resolved(current, &resolved);
            }
            state.table.find_persisted_by_key(
                &resolved.primary_subject.id,
                &resolved.secondary_subject.id,
                &row.id,
            )
        };
        if let Some(survivor) = duplicate {
            let into = self.merge_rows(&row.id, &survivor).await?;
            return Ok(DirtySave::Merged { into });
        }

        let Some(saved) = self.save_persisted(&row.id, &payload_for(&resolved)).await? else {
            return Ok(DirtySave::Skipped);
        };

        let mut state = self.state.lock().await;
        if let Some(current) = state.table.get_mut(&saved) {
            let unchanged = current.same_names(&row);
            apply_resolved(current, &resolved);
            if unchanged {
                state.table.clear_dirty(&saved);
            }
        }
        Ok(DirtySave::Updated(saved))
    }

    pub(crate) async fn manual_save_all(self: &Arc<Self>) -> Result<FlushReport> {
        let rejected: Vec<IncompleteRow> = {
            let mut state = self.state.lock().await;
            let rows = state.table.rows();
            let rejected: Vec<IncompleteRow> = validation::invalid_rows(
                rows.iter()
                    .map(|ordered| &ordered.row)
                    .filter(|row| !(row.is_temporary() && validation::is_blank(row))),
                true,
            );
            if !rejected.is_empty() {
                state.show_all_errors = true;
            }
            rejected
        };

        if !rejected.is_empty() {
            warn!(rows = rejected.len(), "manual save rejected, rows incomplete");
            self.notify(Notification::failure(format!(
                "{} row(s) are missing required fields",
                rejected.len()
            )));
            return Err(CanvasError::Validation(rejected));
        }

        // a pending auto-save stays armed when the save is rejected
        self.scheduler.cancel();
        let report = self.flush(FlushTrigger::Manual).await;
        if report.is_clean() {
            self.state.lock().await.show_all_errors = false;
        }
        Ok(report)
    }
}
