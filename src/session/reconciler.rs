use super::{Notification, SessionInner};
use crate::core::{CanvasError, EntityKind, LinkageRow, Result, RowEdit, RowId, TagRef};
use crate::entity_store::ResolvedRefs;
use crate::remote::LinkagePayload;
use crate::validation;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What an edit did to the row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// Row is still missing required fields; nothing will be saved.
    Incomplete,
    /// Row is complete and waits for the next flush.
    Scheduled,
    /// Row landed on an existing record's key and was folded into it.
    Merged { into: RowId },
}

/// Result of flushing one temporary row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Promotion {
    Created { server: RowId },
    Merged { into: RowId },
    Skipped,
}

fn apply_edit(
    row: &mut LinkageRow,
    edit: RowEdit,
    subject_id: Option<String>,
    tag_ids: &HashMap<String, String>,
) {
    let tag = |name: String| TagRef {
        id: tag_ids.get(&name).cloned(),
        name,
    };
    match edit {
        RowEdit::PrimarySubject(name) => {
            row.primary_subject = name;
            row.primary_subject_id = subject_id;
        }
        RowEdit::SecondarySubject(name) => {
            row.secondary_subject = name;
            row.secondary_subject_id = subject_id;
        }
        RowEdit::Tags(names) => {
            row.tags.clear();
            for name in names {
                if !name.trim().is_empty() && !row.has_tag(&name) {
                    row.tags.push(tag(name));
                }
            }
        }
        RowEdit::AddTag(name) => {
            if !name.trim().is_empty() && !row.has_tag(&name) {
                row.tags.push(tag(name));
            }
        }
        RowEdit::RemoveTag(name) => row.tags.retain(|existing| existing.name != name),
    }
}

/// Copy resolved ids onto the row wherever the names still match.
pub(crate) fn apply_resolved(row: &mut LinkageRow, resolved: &ResolvedRefs) {
    if row.primary_subject == resolved.primary_subject.name {
        row.primary_subject_id = Some(resolved.primary_subject.id.clone());
    }
    if row.secondary_subject == resolved.secondary_subject.name {
        row.secondary_subject_id = Some(resolved.secondary_subject.id.clone());
    }
    for tag in &mut row.tags {
        if let Some(entity) = resolved.tags.iter().find(|entity| entity.name == tag.name) {
            tag.id = Some(entity.id.clone());
        }
    }
}

pub(crate) fn payload_for(resolved: &ResolvedRefs) -> LinkagePayload {
    LinkagePayload {
        primary_subject_id: resolved.primary_subject.id.clone(),
        secondary_subject_id: resolved.secondary_subject.id.clone(),
        tag_ids: resolved.tag_ids(),
    }
}

/// Survivor's tags first, then the other row's tags it does not have yet.
fn union_tags(survivor: &LinkageRow, other: &LinkageRow) -> Vec<String> {
    let mut names = survivor.tag_names();
    for tag in &other.tags {
        if !names.contains(&tag.name) {
            names.push(tag.name.clone());
        }
    }
    names
}

impl SessionInner {
    pub(crate) async fn edit_field(self: &Arc<Self>, id: &RowId, edit: RowEdit) -> Result<EditOutcome> {
        // cache lookups only; nothing here waits on the network
        let subject = match &edit {
            RowEdit::PrimarySubject(name) => Some((EntityKind::PrimarySubject, name.clone())),
            RowEdit::SecondarySubject(name) => Some((EntityKind::SecondarySubject, name.clone())),
            _ => None,
        };
        let subject_id = match &subject {
            Some((kind, name)) => self
                .entities
                .find_by_name(*kind, name)
                .await
                .map(|entity| entity.id),
            None => None,
        };
        let mut tag_ids = HashMap::new();
        let edited_tags: Vec<&String> = match &edit {
            RowEdit::Tags(names) => names.iter().collect(),
            RowEdit::AddTag(name) => vec![name],
            _ => Vec::new(),
        };
        for name in edited_tags {
            if let Some(entity) = self.entities.find_by_name(EntityKind::Tag, name).await {
                tag_ids.insert(name.clone(), entity.id);
            }
        }

        let touches_key = edit.touches_subject_key();
        let (target, key_before, mut complete) = {
            let mut state = self.state.lock().await;
            let target = state
                .table
                .resolve(id)
                .ok_or_else(|| CanvasError::RowNotFound(id.clone()))?;
            let row = state
                .table
                .get_mut(&target)
                .ok_or_else(|| CanvasError::RowNotFound(target.clone()))?;
            let key_before = (row.primary_subject_id.clone(), row.secondary_subject_id.clone());
            apply_edit(row, edit, subject_id, &tag_ids);
            let complete = validation::is_complete(row);
            Self::track_dirty(&mut state, &target, complete);
            (target, key_before, complete)
        };
        debug!(row = %target, complete, "field edited");

        // every edit restarts the quiet period
        self.arm_auto_save();

        if !touches_key {
            return Ok(Self::outcome(complete));
        }

        // persisted rows need real ids to take part in the duplicate check
        if !target.is_temporary()
            && let Some((kind, name)) = subject
            && !name.trim().is_empty()
        {
            let lookup = {
                let state = self.state.lock().await;
                state.table.get(&target).map(|row| match kind {
                    EntityKind::PrimarySubject => row.primary_subject_id.is_none(),
                    _ => row.secondary_subject_id.is_none(),
                })
            };
            if lookup == Some(true) {
                match self.entities.create_if_missing(kind, &name).await {
                    Ok(entity) => {
                        let mut state = self.state.lock().await;
                        if let Some(row) = state.table.get_mut(&target) {
                            match kind {
                                EntityKind::PrimarySubject if row.primary_subject == name => {
                                    row.primary_subject_id = Some(entity.id);
                                }
                                EntityKind::SecondarySubject if row.secondary_subject == name => {
                                    row.secondary_subject_id = Some(entity.id);
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(err) => {
                        warn!(row = %target, %kind, error = %err, "entity creation failed");
                        self.notify(
                            Notification::failure(format!("Could not create {kind} '{name}': {err}"))
                                .for_row(&target),
                        );
                    }
                }
            }
        }

        let survivor = {
            let state = self.state.lock().await;
            let Some(row) = state.table.get(&target) else {
                return Ok(Self::outcome(complete));
            };
            complete = validation::is_complete(row);
            let key_after = (row.primary_subject_id.clone(), row.secondary_subject_id.clone());
            if key_after == key_before {
                None
            } else {
                row.subject_key().and_then(|(primary, secondary)| {
                    state.table.find_persisted_by_key(primary, secondary, &target)
                })
            }
        };

        match survivor {
            Some(survivor) => {
                let into = self.merge_rows(&target, &survivor).await?;
                Ok(EditOutcome::Merged { into })
            }
            None => Ok(Self::outcome(complete)),
        }
    }

    fn outcome(complete: bool) -> EditOutcome {
        if complete {
            EditOutcome::Scheduled
        } else {
            EditOutcome::Incomplete
        }
    }

    /// Persisted rows are dirty while complete; a row that regresses to
    /// incomplete must not stay flagged from an earlier complete state.
    fn track_dirty(state: &mut super::SessionState, id: &RowId, complete: bool) {
        if id.is_temporary() {
            return;
        }
        if complete {
            state.table.mark_dirty(id);
        } else {
            state.table.clear_dirty(id);
        }
    }

    /// Fold `loser` into `survivor`: union the tags onto the survivor with one
    /// update, delete the loser remotely if it was persisted, then drop it
    /// locally. Returns the survivor's id, which may have changed if the
    /// update fell back to a create.
    pub(crate) async fn merge_rows(self: &Arc<Self>, loser: &RowId, survivor: &RowId) -> Result<RowId> {
        let (loser_row, survivor_row) = {
            let state = self.state.lock().await;
            let loser_row = state
                .table
                .get(loser)
                .cloned()
                .ok_or_else(|| CanvasError::RowNotFound(loser.clone()))?;
            let survivor_row = state
                .table
                .get(survivor)
                .cloned()
                .ok_or_else(|| CanvasError::RowNotFound(survivor.clone()))?;
            (loser_row, survivor_row)
        };

        let tags = union_tags(&survivor_row, &loser_row);
        let merged = async {
            let resolved = self
                .entities
                .resolve(&survivor_row.primary_subject, &survivor_row.secondary_subject, &tags)
                .await?;
            let survivor_id = self
                .save_persisted(survivor, &payload_for(&resolved))
                .await?
                .ok_or_else(|| CanvasError::RowNotFound(survivor.clone()))?;
            if let Some(server_id) = loser.server_id() {
                match self.remote.delete_linkage(server_id).await {
                    Ok(()) => {}
                    Err(err) if err.is_not_found() => {}
                    Err(err) => return Err(err),
                }
            }
            Ok((survivor_id, resolved))
        };
        let (survivor_id, resolved) = match merged.await {
            Ok(done) => done,
            Err(err) => {
                warn!(loser = %loser, survivor = %survivor, error = %err, "merge failed");
                self.notify(Notification::failure(format!("Merge failed: {err}")).for_row(loser));
                return Err(err);
            }
        };

        {
            let mut state = self.state.lock().await;
            let mut sent = survivor_row.clone();
            for tag in &loser_row.tags {
                if !sent.has_tag(&tag.name) {
                    sent.tags.push(tag.clone());
                }
            }
            if let Some(row) = state.table.get_mut(&survivor_id) {
                for tag in &loser_row.tags {
                    if !row.has_tag(&tag.name) {
                        row.tags.push(tag.clone());
                    }
                }
                apply_resolved(row, &resolved);
                let unchanged = row.same_names(&sent);
                if unchanged {
                    state.table.clear_dirty(&survivor_id);
                }
            }
            state.table.remove(loser);
            if state.staged_delete.as_ref() == Some(loser) {
                state.staged_delete = None;
            }
        }

        info!(loser = %loser, survivor = %survivor_id, tags = tags.len(), "rows merged");
        self.notify(
            Notification::success(format!(
                "Merged into existing {} / {}",
                survivor_row.primary_subject, survivor_row.secondary_subject
            ))
            .for_row(&survivor_id),
        );
        Ok(survivor_id)
    }

    /// Update a persisted record, recreating it if the server no longer has
    /// it. Returns the id the row ends up under, or `None` when the row was
    /// deleted locally while the save was in flight.
    pub(crate) async fn save_persisted(
        &self,
        id: &RowId,
        payload: &LinkagePayload,
    ) -> Result<Option<RowId>> {
        let Some(server_id) = id.server_id() else {
            return Err(CanvasError::invalid(format!("row {id} has not been persisted")));
        };
        match self.remote.update_linkage(server_id, payload).await {
            Ok(_) => Ok(Some(id.clone())),
            Err(err) if err.is_not_found() => {
                if !self.state.lock().await.table.contains(id) {
                    debug!(row = %id, "row deleted while its update was in flight");
                    return Ok(None);
                }

                warn!(row = %id, "record vanished remotely, creating it again");
                let record = self.remote.create_linkage(payload).await?;
                let fresh = RowId::persisted(record.id.clone());

                let relabeled = self.state.lock().await.table.relabel(id, &fresh);
                if !relabeled {
                    warn!(row = %id, server = %fresh, "row vanished during re-creation, removing remote copy");
                    if let Err(err) = self.remote.delete_linkage(&record.id).await
                        && !err.is_not_found()
                    {
                        return Err(err);
                    }
                    return Ok(None);
                }
                Ok(Some(fresh))
            }
            Err(err) => Err(err),
        }
    }

    /// Persist a complete temporary row and move it to its server id.
    ///
    /// If the resolved key already belongs to a persisted row the temporary
    /// row is merged into it instead of creating a duplicate.
    pub(crate) async fn promote(self: &Arc<Self>, temp: &RowId) -> Result<Promotion> {
        let row = {
            let state = self.state.lock().await;
            match state.table.get(temp) {
                Some(row) if validation::is_complete(row) => row.clone(),
                _ => return Ok(Promotion::Skipped),
            }
        };

        let mut resolved = self
            .entities
            .resolve(&row.primary_subject, &row.secondary_subject, &row.tag_names())
            .await?;

        let duplicate = {
            let mut state = self.state.lock().await;
            if let Some(current) = state.table.get_mut(temp) {
                apply_resolved(current, &resolved);
            }
            state.table.find_persisted_by_key(
                &resolved.primary_subject.id,
                &resolved.secondary_subject.id,
                temp,
            )
        };
        if let Some(survivor) = duplicate {
            let into = self.merge_rows(temp, &survivor).await?;
            return Ok(Promotion::Merged { into });
        }

        let record = match self.remote.create_linkage(&payload_for(&resolved)).await {
            Ok(record) => record,
            Err(err) if err.is_not_found() => {
                warn!(row = %temp, "referenced entity vanished, refreshing lookups");
                self.entities.load().await?;
                resolved = self
                    .entities
                    .resolve(&row.primary_subject, &row.secondary_subject, &row.tag_names())
                    .await?;
                self.remote.create_linkage(&payload_for(&resolved)).await?
            }
            Err(err) => return Err(err),
        };
        let server = RowId::persisted(record.id.clone());

        let mut state = self.state.lock().await;
        if !state.table.contains(temp) {
            // deleted or merged away while the create was in flight
            drop(state);
            warn!(row = %temp, server = %server, "row vanished during promotion, removing remote copy");
            if let Err(err) = self.remote.delete_linkage(&record.id).await
                && !err.is_not_found()
            {
                return Err(err);
            }
            return Ok(Promotion::Skipped);
        }

        state.table.relabel(temp, &server);
        let mut edited_in_flight = false;
        if let Some(current) = state.table.get_mut(&server) {
            edited_in_flight = !current.same_names(&row);
            apply_resolved(current, &resolved);
        }
        if edited_in_flight {
            let complete = state
                .table
                .get(&server)
                .is_some_and(validation::is_complete);
            Self::track_dirty(&mut state, &server, complete);
        }
        if state.staged_delete.as_ref() == Some(temp) {
            state.staged_delete = Some(server.clone());
        }
        drop(state);

        if edited_in_flight {
            debug!(row = %server, "row changed while being created, scheduling update");
            self.arm_auto_save();
        }
        info!(temp = %temp, server = %server, "row promoted");
        Ok(Promotion::Created { server })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Entity;

    fn row_with_tags(tags: &[&str]) -> LinkageRow {
        let mut row = LinkageRow::temporary();
        row.tags = tags.iter().map(|t| TagRef::unresolved(*t)).collect();
        row
    }

    #[test]
    fn union_preserves_survivor_order_and_skips_duplicates() {
        let survivor = row_with_tags(&["API", "Web"]);
        let other = row_with_tags(&["Web", "Batch", "api"]);
        assert_eq!(union_tags(&survivor, &other), vec!["API", "Web", "Batch", "api"]);
    }

    #[test]
    fn tag_edits_ignore_blanks_and_repeats() {
        let mut row = LinkageRow::temporary();
        let ids = HashMap::from([("API".to_string(), "s-1".to_string())]);
        apply_edit(
            &mut row,
            RowEdit::Tags(vec!["API".into(), " ".into(), "API".into(), "Web".into()]),
            None,
            &ids,
        );
        assert_eq!(row.tag_names(), vec!["API", "Web"]);
        assert_eq!(row.tags[0].id.as_deref(), Some("s-1"));
        assert_eq!(row.tags[1].id, None);

        apply_edit(&mut row, RowEdit::AddTag("Web".into()), None, &ids);
        apply_edit(&mut row, RowEdit::RemoveTag("API".into()), None, &ids);
        assert_eq!(row.tag_names(), vec!["Web"]);
    }

    #[test]
    fn subject_edit_replaces_stale_id() {
        let mut row = LinkageRow::temporary();
        row.primary_subject = "Acme".into();
        row.primary_subject_id = Some("e-1".into());
        apply_edit(&mut row, RowEdit::PrimarySubject("Globex".into()), None, &HashMap::new());
        assert_eq!(row.primary_subject, "Globex");
        assert_eq!(row.primary_subject_id, None);
    }

    #[test]
    fn resolved_ids_only_land_on_matching_names() {
        let mut row = row_with_tags(&["API"]);
        row.primary_subject = "Acme".into();
        row.secondary_subject = "Ledger".into();
        let resolved = ResolvedRefs {
            primary_subject: Entity::new("e-1", "Acme"),
            secondary_subject: Entity::new("p-1", "Billing"),
            tags: vec![Entity::new("s-1", "API")],
        };
        apply_resolved(&mut row, &resolved);
        assert_eq!(row.primary_subject_id.as_deref(), Some("e-1"));
        assert_eq!(row.secondary_subject_id, None);
        assert_eq!(row.tags[0].id.as_deref(), Some("s-1"));
        assert_eq!(payload_for(&resolved).tag_ids, vec!["s-1"]);
    }
}
