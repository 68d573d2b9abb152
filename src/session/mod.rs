//! The editing session: one owned state container behind a cloneable handle.
//!
//! Edits, deletes and saves all go through [`CanvasSession`]. The reconciler
//! and the auto-save flush read and write the same `SessionState`, always
//! through the lock, never through a copy captured earlier.

mod flush;
mod notification;
mod reconciler;

pub use flush::{FlushReport, FlushTrigger, SaveFailure};
pub use notification::{Notification, NotificationLevel};
pub use reconciler::EditOutcome;

use crate::config::CanvasConfig;
use crate::core::{
    CanvasError, Entity, EntityKind, LinkageRow, OrderedRow, Result, RowEdit, RowId, TagRef,
};
use crate::entity_store::EntityStore;
use crate::remote::{EntityRef, HttpRemote, LinkageFilter, LinkageRecord, RemoteCollaborator};
use crate::scheduler::{AutoSaveScheduler, AutoSaveState};
use crate::table::RecordTable;
use crate::validation::{self, IncompleteRow, RequiredField};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, watch};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub(crate) struct SessionState {
    pub(crate) table: RecordTable,
    pub(crate) staged_delete: Option<RowId>,
    pub(crate) show_all_errors: bool,
}

pub(crate) struct SessionInner {
    pub(crate) remote: Arc<dyn RemoteCollaborator>,
    pub(crate) entities: EntityStore,
    pub(crate) state: Mutex<SessionState>,
    /// Serializes flushes so promotions never overlap.
    pub(crate) flush_lock: Mutex<()>,
    pub(crate) scheduler: AutoSaveScheduler,
    notifications: broadcast::Sender<Notification>,
}

impl SessionInner {
    pub(crate) fn notify(&self, notification: Notification) {
        // no subscribers is fine
        let _ = self.notifications.send(notification);
    }

    pub(crate) fn arm_auto_save(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.scheduler.arm(move || async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let report = inner.flush(FlushTrigger::AutoSave).await;
            debug!(
                promoted = report.promoted.len(),
                updated = report.updated.len(),
                failures = report.failures.len(),
                "auto-save flush finished"
            );
        });
    }

    async fn entity_name(&self, kind: EntityKind, reference: &EntityRef) -> String {
        if let Some(name) = reference.name() {
            return name.to_string();
        }
        match self.entities.find_by_id(kind, reference.id()).await {
            Some(entity) => entity.name,
            None => {
                warn!(%kind, id = reference.id(), "linkage references an entity missing from the cache");
                reference.id().to_string()
            }
        }
    }

    async fn row_from_record(&self, record: &LinkageRecord) -> LinkageRow {
        let mut row = LinkageRow::blank(RowId::persisted(record.id.clone()));
        row.primary_subject = self
            .entity_name(EntityKind::PrimarySubject, &record.primary_subject)
            .await;
        row.primary_subject_id = Some(record.primary_subject.id().to_string());
        row.secondary_subject = self
            .entity_name(EntityKind::SecondarySubject, &record.secondary_subject)
            .await;
        row.secondary_subject_id = Some(record.secondary_subject.id().to_string());
        for tag in &record.tags {
            row.tags.push(TagRef {
                name: self.entity_name(EntityKind::Tag, tag).await,
                id: Some(tag.id().to_string()),
            });
        }
        row
    }
}

/// What the presentation layer needs before letting the user navigate away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveCheck {
    pub incomplete: Vec<IncompleteRow>,
    pub dirty: usize,
    pub auto_save_pending: bool,
}

impl LeaveCheck {
    /// Leaving now would drop something; ask the user first.
    pub fn needs_confirmation(&self) -> bool {
        !self.incomplete.is_empty() || self.dirty > 0 || self.auto_save_pending
    }
}

/// Handle to an editing session. Cloning shares the same state.
#[derive(Clone)]
pub struct CanvasSession {
    inner: Arc<SessionInner>,
}

impl CanvasSession {
    pub fn new(remote: Arc<dyn RemoteCollaborator>, config: CanvasConfig) -> Self {
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        let inner = SessionInner {
            entities: EntityStore::new(Arc::clone(&remote)),
            remote,
            state: Mutex::new(SessionState::default()),
            flush_lock: Mutex::new(()),
            scheduler: AutoSaveScheduler::new(&config),
            notifications,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Session over the REST backend described by `config`.
    pub fn connect(config: CanvasConfig) -> Result<Self> {
        let remote = HttpRemote::new(&config)?;
        Ok(Self::new(Arc::new(remote), config))
    }

    /// Fetch the lookup lists and every linkage.
    pub async fn load(&self) -> Result<usize> {
        self.inner.entities.load().await?;
        self.reload(&LinkageFilter::all()).await
    }

    /// Re-fetch linkages. Known rows keep their position; rows with unsaved
    /// local edits keep their local values. Rows promoted or deleted while the
    /// listing was in flight stay as they are locally.
    pub async fn reload(&self, filter: &LinkageFilter) -> Result<usize> {
        let since = self.inner.state.lock().await.table.label_mark();
        let mut records = self.inner.remote.list_linkages(filter).await?;
        records.sort_by_key(|record| record.created_at);

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            rows.push(self.inner.row_from_record(record).await);
        }

        let mut state = self.inner.state.lock().await;
        state.table.replace_persisted(rows, since);
        info!(count = records.len(), "linkages loaded");
        Ok(records.len())
    }

    /// Add a blank temporary row at the end. Cancels a pending auto-save.
    pub async fn add_temporary_row(&self) -> RowId {
        self.inner.scheduler.cancel();
        let row = LinkageRow::temporary();
        let id = row.id.clone();
        let order = self.inner.state.lock().await.table.insert(row);
        debug!(row = %id, order, "temporary row added");
        id
    }

    pub async fn edit_field(&self, id: &RowId, edit: RowEdit) -> Result<EditOutcome> {
        self.inner.edit_field(id, edit).await
    }

    /// First step of a delete: remember the row until the user confirms.
    pub async fn stage_delete(&self, id: &RowId) -> Result<RowId> {
        let mut state = self.inner.state.lock().await;
        let target = state
            .table
            .resolve(id)
            .ok_or_else(|| CanvasError::RowNotFound(id.clone()))?;
        state.staged_delete = Some(target.clone());
        Ok(target)
    }

    pub async fn staged_delete(&self) -> Option<RowId> {
        self.inner.state.lock().await.staged_delete.clone()
    }

    pub async fn cancel_delete(&self) -> Option<RowId> {
        self.inner.state.lock().await.staged_delete.take()
    }

    /// Second step of a delete: remove the staged row remotely (if persisted)
    /// and locally. A row already gone on the server counts as deleted.
    pub async fn confirm_delete(&self) -> Result<RowId> {
        let target = {
            let mut state = self.inner.state.lock().await;
            let staged = state
                .staged_delete
                .take()
                .ok_or_else(|| CanvasError::invalid("no delete is awaiting confirmation"))?;
            state
                .table
                .resolve(&staged)
                .ok_or(CanvasError::RowNotFound(staged))?
        };

        if let Some(server_id) = target.server_id() {
            match self.inner.remote.delete_linkage(server_id).await {
                Ok(()) => {}
                Err(err) if err.is_not_found() => {
                    debug!(row = %target, "row was already deleted remotely");
                }
                Err(err) => {
                    warn!(row = %target, error = %err, "delete failed");
                    self.inner.notify(
                        Notification::failure(format!("Delete failed: {err}")).for_row(&target),
                    );
                    let mut state = self.inner.state.lock().await;
                    state.staged_delete = Some(target);
                    return Err(err);
                }
            }
        }

        let removed = self.inner.state.lock().await.table.remove(&target);
        if removed.is_some() {
            info!(row = %target, "row deleted");
            self.inner
                .notify(Notification::success("Row deleted").for_row(&target));
        }
        Ok(target)
    }

    /// Stage and confirm in one call, for callers that confirmed up front.
    pub async fn delete_row(&self, id: &RowId) -> Result<RowId> {
        self.stage_delete(id).await?;
        self.confirm_delete().await
    }

    /// Save everything now, bypassing the debounce window.
    ///
    /// Rejected without touching the network when any non-blank row is
    /// incomplete; from then on blank rows are flagged too.
    pub async fn manual_save_all(&self) -> Result<FlushReport> {
        self.inner.manual_save_all().await
    }

    /// Cancel a pending auto-save without flushing.
    pub fn discard_pending(&self) -> bool {
        self.inner.scheduler.cancel()
    }

    pub async fn rows(&self) -> Vec<OrderedRow> {
        self.inner.state.lock().await.table.rows()
    }

    pub async fn row(&self, id: &RowId) -> Option<OrderedRow> {
        let state = self.inner.state.lock().await;
        let target = state.table.resolve(id)?;
        Some(OrderedRow {
            display_order: state.table.display_order(&target)?,
            row: state.table.get(&target)?.clone(),
        })
    }

    /// Rows currently flagged invalid, in display order.
    pub async fn incomplete_rows(&self) -> Vec<IncompleteRow> {
        let state = self.inner.state.lock().await;
        let rows = state.table.rows();
        validation::invalid_rows(rows.iter().map(|ordered| &ordered.row), state.show_all_errors)
    }

    pub async fn incomplete_row_ids(&self) -> Vec<RowId> {
        self.incomplete_rows()
            .await
            .into_iter()
            .map(|row| row.id)
            .collect()
    }

    pub async fn missing_fields(&self, id: &RowId) -> Option<BTreeSet<RequiredField>> {
        let state = self.inner.state.lock().await;
        let target = state.table.resolve(id)?;
        state.table.get(&target).map(validation::incomplete_fields)
    }

    pub async fn dirty_count(&self) -> usize {
        self.inner.state.lock().await.table.dirty_count()
    }

    pub async fn is_dirty(&self, id: &RowId) -> bool {
        let state = self.inner.state.lock().await;
        state
            .table
            .resolve(id)
            .is_some_and(|target| state.table.is_dirty(&target))
    }

    pub fn auto_save_countdown(&self) -> Option<u32> {
        self.inner.scheduler.countdown()
    }

    pub fn auto_save_state(&self) -> AutoSaveState {
        self.inner.scheduler.state()
    }

    pub fn subscribe_countdown(&self) -> watch::Receiver<Option<u32>> {
        self.inner.scheduler.subscribe_countdown()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    pub async fn show_all_errors(&self) -> bool {
        self.inner.state.lock().await.show_all_errors
    }

    pub async fn leave_check(&self) -> LeaveCheck {
        let incomplete = self.incomplete_rows().await;
        LeaveCheck {
            incomplete,
            dirty: self.dirty_count().await,
            auto_save_pending: matches!(
                self.auto_save_state(),
                AutoSaveState::Armed { .. } | AutoSaveState::Flushing
            ),
        }
    }

    pub async fn entities(&self, kind: EntityKind) -> Vec<Entity> {
        self.inner.entities.entities(kind).await
    }
}
