/// Auto-save tests
///
/// Debounce, countdown, promotion and identity changes driven by the timer.
/// Time is paused, so every quiet period elapses instantly and in order.
/// Run with: cargo test --test autosave_tests

use async_trait::async_trait;
use pipeline_canvas::{
    AutoSaveState, CanvasConfig, CanvasSession, EditOutcome, Entity, EntityKind, InMemoryRemote,
    LinkageFilter, LinkagePayload, LinkageRecord, NotificationLevel, RemoteCollaborator, RemoteOp,
    Result, RowEdit, RowId,
};
use std::sync::Arc;
use std::time::Duration;

struct Seeded {
    acme: Entity,
    billing: Entity,
    api: Entity,
}

async fn seed(remote: &InMemoryRemote) -> Seeded {
    Seeded {
        acme: remote.seed_entity(EntityKind::PrimarySubject, "Acme").await,
        billing: remote.seed_entity(EntityKind::SecondarySubject, "Billing").await,
        api: remote.seed_entity(EntityKind::Tag, "API").await,
    }
}

async fn session_over(remote: Arc<dyn RemoteCollaborator>) -> CanvasSession {
    let session = CanvasSession::new(remote, CanvasConfig::default());
    session.load().await.unwrap();
    session
}

async fn fill(session: &CanvasSession, row: &RowId, primary: &str, secondary: &str, tag: &str) {
    session
        .edit_field(row, RowEdit::PrimarySubject(primary.into()))
        .await
        .unwrap();
    session
        .edit_field(row, RowEdit::SecondarySubject(secondary.into()))
        .await
        .unwrap();
    session
        .edit_field(row, RowEdit::AddTag(tag.into()))
        .await
        .unwrap();
}

async fn idle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_complete_row_persists_after_quiet_period() {
    let remote = Arc::new(InMemoryRemote::new());
    let seeded = seed(&remote).await;
    let session = session_over(remote.clone()).await;

    let temp = session.add_temporary_row().await;
    fill(&session, &temp, "Acme", "Billing", "API").await;
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 0);

    idle(11).await;

    let rows = session.rows().await;
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].row.id.is_temporary());

    let records = remote
        .list_linkages(
            &LinkageFilter::all()
                .primary_subject(&seeded.acme.id)
                .secondary_subject(&seeded.billing.id),
        )
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, rows[0].row.id.to_string());
    assert_eq!(records[0].tags.len(), 1);
    assert_eq!(records[0].tags[0].id(), seeded.api.id);
}

#[tokio::test(start_paused = true)]
async fn test_completing_edit_is_debounced_not_saved() {
    let remote = Arc::new(InMemoryRemote::new());
    seed(&remote).await;
    let session = session_over(remote.clone()).await;

    let temp = session.add_temporary_row().await;
    fill(&session, &temp, "Acme", "Billing", "API").await;

    tokio::time::sleep(Duration::from_millis(8_500)).await;
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 0);
    assert_eq!(session.auto_save_countdown(), Some(2));

    idle(3).await;
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 1);
    assert_eq!(session.auto_save_state(), AutoSaveState::Idle);
    assert_eq!(session.auto_save_countdown(), None);
}

#[tokio::test(start_paused = true)]
async fn test_every_edit_rearms_even_when_incomplete() {
    let remote = Arc::new(InMemoryRemote::new());
    seed(&remote).await;
    let session = session_over(remote.clone()).await;
    let temp = session.add_temporary_row().await;

    let outcome = session
        .edit_field(&temp, RowEdit::PrimarySubject("Acme".into()))
        .await
        .unwrap();
    assert_eq!(outcome, EditOutcome::Incomplete);
    assert_eq!(session.auto_save_countdown(), Some(10));

    tokio::time::sleep(Duration::from_millis(4_500)).await;
    assert_eq!(session.auto_save_countdown(), Some(6));
    session
        .edit_field(&temp, RowEdit::SecondarySubject("Billing".into()))
        .await
        .unwrap();
    assert_eq!(session.auto_save_countdown(), Some(10));

    // incomplete temporary rows are never sent
    idle(30).await;
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 0);
    assert!(session.rows().await[0].row.id.is_temporary());
}

#[tokio::test(start_paused = true)]
async fn test_steady_typing_fires_once() {
    let remote = Arc::new(InMemoryRemote::new());
    seed(&remote).await;
    let session = session_over(remote.clone()).await;
    let temp = session.add_temporary_row().await;
    fill(&session, &temp, "Acme", "Billing", "API").await;

    for tag in ["W", "We", "Web"] {
        idle(5).await;
        session
            .edit_field(&temp, RowEdit::Tags(vec!["API".into(), tag.into()]))
            .await
            .unwrap();
    }
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 0);

    idle(60).await;
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 1);
    assert_eq!(remote.calls(RemoteOp::UpdateLinkage).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_promotion_keeps_display_order() {
    let remote = Arc::new(InMemoryRemote::new());
    seed(&remote).await;
    let session = session_over(remote.clone()).await;

    let first = session.add_temporary_row().await;
    let second = session.add_temporary_row().await;
    let third = session.add_temporary_row().await;
    fill(&session, &second, "Acme", "Billing", "API").await;

    let before = session.row(&second).await.unwrap().display_order;
    idle(11).await;
    let after = session.row(&second).await.unwrap();

    assert!(!after.row.id.is_temporary());
    assert_eq!(after.display_order, before);
    let order: Vec<RowId> = session.rows().await.into_iter().map(|r| r.row.id).collect();
    assert_eq!(order, vec![first, after.row.id, third]);
}

#[tokio::test(start_paused = true)]
async fn test_adding_row_cancels_pending_save() {
    let remote = Arc::new(InMemoryRemote::new());
    seed(&remote).await;
    let session = session_over(remote.clone()).await;

    let temp = session.add_temporary_row().await;
    fill(&session, &temp, "Acme", "Billing", "API").await;
    idle(3).await;

    session.add_temporary_row().await;
    assert_eq!(session.auto_save_countdown(), None);

    idle(30).await;
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 0);
    assert!(session.row(&temp).await.unwrap().row.id.is_temporary());
}

#[tokio::test(start_paused = true)]
async fn test_discard_pending_cancels_without_flush() {
    let remote = Arc::new(InMemoryRemote::new());
    seed(&remote).await;
    let session = session_over(remote.clone()).await;

    let temp = session.add_temporary_row().await;
    fill(&session, &temp, "Acme", "Billing", "API").await;
    assert!(session.leave_check().await.needs_confirmation());

    assert!(session.discard_pending());
    idle(30).await;
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_promotion_stays_temporary() {
    let remote = Arc::new(InMemoryRemote::new());
    seed(&remote).await;
    let session = session_over(remote.clone()).await;
    let mut notifications = session.subscribe();

    let temp = session.add_temporary_row().await;
    fill(&session, &temp, "Acme", "Billing", "API").await;
    remote.fail_next(RemoteOp::CreateLinkage, 503).await;

    idle(11).await;
    assert!(session.row(&temp).await.unwrap().row.id.is_temporary());
    let notification = notifications.recv().await.unwrap();
    assert_eq!(notification.level, NotificationLevel::Failure);
    assert_eq!(notification.row, Some(temp.clone()));

    // no automatic retry
    idle(30).await;
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 1);

    // the next edit opens another window
    session
        .edit_field(&temp, RowEdit::AddTag("Web".into()))
        .await
        .unwrap();
    idle(11).await;
    assert!(!session.row(&temp).await.unwrap().row.id.is_temporary());
    assert_eq!(remote.linkage_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_dirty_persisted_row_is_updated_and_cleared() {
    let remote = Arc::new(InMemoryRemote::new());
    let seeded = seed(&remote).await;
    let record = remote
        .seed_linkage(LinkagePayload {
            primary_subject_id: seeded.acme.id.clone(),
            secondary_subject_id: seeded.billing.id.clone(),
            tag_ids: vec![seeded.api.id.clone()],
        })
        .await;
    let session = session_over(remote.clone()).await;
    let id = RowId::persisted(record.id.clone());

    let outcome = session
        .edit_field(&id, RowEdit::AddTag("Web".into()))
        .await
        .unwrap();
    assert_eq!(outcome, EditOutcome::Scheduled);
    assert_eq!(session.dirty_count().await, 1);

    idle(11).await;
    assert_eq!(session.dirty_count().await, 0);
    assert_eq!(remote.calls(RemoteOp::UpdateLinkage).await, 1);
    let records = remote.list_linkages(&LinkageFilter::all()).await.unwrap();
    assert_eq!(records[0].tags.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_update_of_vanished_record_falls_back_to_create() {
    let remote = Arc::new(InMemoryRemote::new());
    let seeded = seed(&remote).await;
    remote
        .seed_linkage(LinkagePayload {
            primary_subject_id: seeded.acme.id.clone(),
            secondary_subject_id: seeded.billing.id.clone(),
            tag_ids: vec![seeded.api.id.clone()],
        })
        .await;
    let record = remote
        .seed_linkage(LinkagePayload {
            primary_subject_id: seeded.acme.id.clone(),
            secondary_subject_id: remote
                .seed_entity(EntityKind::SecondarySubject, "Ledger")
                .await
                .id,
            tag_ids: vec![seeded.api.id.clone()],
        })
        .await;
    let session = session_over(remote.clone()).await;
    let old = RowId::persisted(record.id.clone());
    let order_before = session.row(&old).await.unwrap().display_order;

    // another actor removes the record
    remote.delete_linkage(&record.id).await.unwrap();

    session
        .edit_field(&old, RowEdit::AddTag("Web".into()))
        .await
        .unwrap();
    idle(11).await;

    let current = session.row(&old).await.unwrap();
    assert_ne!(current.row.id, old);
    assert!(!current.row.id.is_temporary());
    assert_eq!(current.display_order, order_before);
    assert_eq!(session.dirty_count().await, 0);
    assert_eq!(remote.linkage_count().await, 2);
}

/// Delegates to the in-memory remote with per-operation latency. Listings
/// are taken when the request arrives and answered after the delay.
#[derive(Default)]
struct Delayed {
    inner: InMemoryRemote,
    create: Duration,
    update: Duration,
    list: Duration,
}

async fn latency(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl RemoteCollaborator for Delayed {
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        self.inner.list_entities(kind).await
    }

    async fn create_entity(&self, kind: EntityKind, name: &str) -> Result<Entity> {
        self.inner.create_entity(kind, name).await
    }

    async fn list_linkages(&self, filter: &LinkageFilter) -> Result<Vec<LinkageRecord>> {
        let records = self.inner.list_linkages(filter).await?;
        latency(self.list).await;
        Ok(records)
    }

    async fn create_linkage(&self, payload: &LinkagePayload) -> Result<LinkageRecord> {
        latency(self.create).await;
        self.inner.create_linkage(payload).await
    }

    async fn update_linkage(&self, id: &str, payload: &LinkagePayload) -> Result<LinkageRecord> {
        latency(self.update).await;
        self.inner.update_linkage(id, payload).await
    }

    async fn delete_linkage(&self, id: &str) -> Result<()> {
        self.inner.delete_linkage(id).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_edit_during_promotion_follows_the_new_id() {
    let slow = Arc::new(Delayed {
        create: Duration::from_secs(2),
        ..Delayed::default()
    });
    seed(&slow.inner).await;
    let session = session_over(slow.clone()).await;

    let temp = session.add_temporary_row().await;
    fill(&session, &temp, "Acme", "Billing", "API").await;

    // timer fires at 10s, create is in flight until 12s
    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(session.auto_save_state(), AutoSaveState::Flushing);
    session
        .edit_field(&temp, RowEdit::AddTag("Web".into()))
        .await
        .unwrap();

    idle(2).await;
    let promoted = session.row(&temp).await.unwrap();
    assert!(!promoted.row.id.is_temporary());
    assert!(session.is_dirty(&temp).await);

    idle(15).await;
    assert_eq!(session.dirty_count().await, 0);
    let records = slow.inner.list_linkages(&LinkageFilter::all()).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, promoted.row.id.to_string());
    assert_eq!(records[0].tags.len(), 2);

    // the stale temporary id keeps resolving to the promoted row
    let edited = session
        .edit_field(&temp, RowEdit::RemoveTag("API".into()))
        .await
        .unwrap();
    assert_eq!(edited, EditOutcome::Scheduled);
    assert_eq!(session.row(&temp).await.unwrap().row.tag_names(), vec!["Web"]);
}

#[tokio::test(start_paused = true)]
async fn test_delete_during_update_does_not_resurrect_record() {
    let slow = Arc::new(Delayed {
        update: Duration::from_secs(3),
        ..Delayed::default()
    });
    let seeded = seed(&slow.inner).await;
    let record = slow
        .inner
        .seed_linkage(LinkagePayload {
            primary_subject_id: seeded.acme.id.clone(),
            secondary_subject_id: seeded.billing.id.clone(),
            tag_ids: vec![seeded.api.id.clone()],
        })
        .await;
    let session = session_over(slow.clone()).await;
    let id = RowId::persisted(record.id.clone());

    session
        .edit_field(&id, RowEdit::AddTag("Web".into()))
        .await
        .unwrap();

    // flush starts at 10s, its update answers at 13s
    idle(11).await;
    session.delete_row(&id).await.unwrap();

    idle(30).await;
    assert!(session.rows().await.is_empty());
    assert_eq!(slow.inner.linkage_count().await, 0);
    assert_eq!(slow.inner.calls(RemoteOp::CreateLinkage).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_promotion_during_reload_keeps_the_row() {
    let slow = Arc::new(Delayed {
        list: Duration::from_secs(5),
        ..Delayed::default()
    });
    let seeded = seed(&slow.inner).await;
    let existing = slow
        .inner
        .seed_linkage(LinkagePayload {
            primary_subject_id: seeded.acme.id.clone(),
            secondary_subject_id: slow
                .inner
                .seed_entity(EntityKind::SecondarySubject, "Ledger")
                .await
                .id,
            tag_ids: vec![seeded.api.id.clone()],
        })
        .await;
    let session = session_over(slow.clone()).await;

    let temp = session.add_temporary_row().await;
    fill(&session, &temp, "Acme", "Billing", "API").await;

    // listing taken at 7s and answered at 12s, promotion lands at 10s
    idle(7).await;
    let reloader = session.clone();
    let reload = tokio::spawn(async move { reloader.reload(&LinkageFilter::all()).await });
    idle(4).await;
    let promoted = session.row(&temp).await.unwrap().row.id;
    assert!(!promoted.is_temporary());

    assert_eq!(reload.await.unwrap().unwrap(), 1);
    let ids: Vec<RowId> = session.rows().await.into_iter().map(|r| r.row.id).collect();
    assert_eq!(ids, vec![RowId::persisted(existing.id), promoted]);
    assert_eq!(slow.inner.linkage_count().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_manual_save_keeps_pending_auto_save() {
    let remote = Arc::new(InMemoryRemote::new());
    let seeded = seed(&remote).await;
    let record = remote
        .seed_linkage(LinkagePayload {
            primary_subject_id: seeded.acme.id.clone(),
            secondary_subject_id: seeded.billing.id.clone(),
            tag_ids: vec![seeded.api.id.clone()],
        })
        .await;
    let session = session_over(remote.clone()).await;
    let id = RowId::persisted(record.id.clone());

    let partial = session.add_temporary_row().await;
    session
        .edit_field(&partial, RowEdit::PrimarySubject("Acme".into()))
        .await
        .unwrap();
    session
        .edit_field(&id, RowEdit::AddTag("Web".into()))
        .await
        .unwrap();
    assert_eq!(session.auto_save_countdown(), Some(10));

    assert!(session.manual_save_all().await.is_err());
    assert_eq!(session.auto_save_countdown(), Some(10));

    idle(11).await;
    assert_eq!(remote.calls(RemoteOp::UpdateLinkage).await, 1);
    assert_eq!(remote.calls(RemoteOp::CreateLinkage).await, 0);
    assert_eq!(session.dirty_count().await, 0);
}
