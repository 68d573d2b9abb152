use super::{EntityRef, LinkageFilter, LinkagePayload, LinkageRecord, RemoteCollaborator};
use crate::core::{CanvasError, Entity, EntityKind, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Operations of the remote contract, used for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteOp {
    ListEntities,
    CreateEntity,
    ListLinkages,
    CreateLinkage,
    UpdateLinkage,
    DeleteLinkage,
}

#[derive(Debug, Clone)]
struct StoredLinkage {
    primary_subject_id: String,
    secondary_subject_id: String,
    tag_ids: Vec<String>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RemoteState {
    next_id: u64,
    entities: HashMap<EntityKind, Vec<Entity>>,
    linkages: Vec<(String, StoredLinkage)>,
    calls: HashMap<RemoteOp, usize>,
    failures: HashMap<RemoteOp, Vec<u16>>,
}

impl RemoteState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Counts the call and pops an injected failure, if one is queued.
    fn enter(&mut self, op: RemoteOp, what: &str) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        let Some(queue) = self.failures.get_mut(&op) else {
            return Ok(());
        };
        if queue.is_empty() {
            return Ok(());
        }
        let status = queue.remove(0);
        if status == 404 {
            return Err(CanvasError::not_found(format!("{what}: injected")));
        }
        Err(CanvasError::remote(status, format!("{what}: injected")))
    }

    fn expand(&self, kind: EntityKind, id: &str) -> EntityRef {
        self.entities
            .get(&kind)
            .and_then(|list| list.iter().find(|entity| entity.id == id))
            .map(|entity| EntityRef::Expanded(entity.clone()))
            .unwrap_or_else(|| EntityRef::Id(id.to_string()))
    }

    fn to_record(&self, id: &str, stored: &StoredLinkage) -> LinkageRecord {
        LinkageRecord {
            id: id.to_string(),
            primary_subject: self.expand(EntityKind::PrimarySubject, &stored.primary_subject_id),
            secondary_subject: self
                .expand(EntityKind::SecondarySubject, &stored.secondary_subject_id),
            tags: stored
                .tag_ids
                .iter()
                .map(|tag| self.expand(EntityKind::Tag, tag))
                .collect(),
            created_at: stored.created_at,
            updated_at: stored.updated_at,
        }
    }

    fn validate(&self, payload: &LinkagePayload) -> Result<()> {
        let known = |kind: EntityKind, id: &str| {
            self.entities
                .get(&kind)
                .is_some_and(|list| list.iter().any(|entity| entity.id == id))
        };
        if !known(EntityKind::PrimarySubject, &payload.primary_subject_id)
            || !known(EntityKind::SecondarySubject, &payload.secondary_subject_id)
            || payload.tag_ids.iter().any(|tag| !known(EntityKind::Tag, tag))
        {
            return Err(CanvasError::remote(422, "payload references unknown entity"));
        }
        Ok(())
    }
}

/// In-process collaborator with the same contract as the REST backend.
///
/// Ids are handed out from one counter (`e-1`, `l-2`, ...). Failures can be
/// queued per operation with [`InMemoryRemote::fail_next`]; a queued 404
/// surfaces as the not-found class.
#[derive(Debug, Default)]
pub struct InMemoryRemote {
    state: RwLock<RemoteState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `op` fail with `status`.
    pub async fn fail_next(&self, op: RemoteOp, status: u16) {
        self.state
            .write()
            .await
            .failures
            .entry(op)
            .or_default()
            .push(status);
    }

    pub async fn calls(&self, op: RemoteOp) -> usize {
        self.state.read().await.calls.get(&op).copied().unwrap_or(0)
    }

    /// Seed an entity directly, bypassing call counting.
    pub async fn seed_entity(&self, kind: EntityKind, name: &str) -> Entity {
        let mut state = self.state.write().await;
        let entity = Entity::new(state.next_id("e"), name);
        state.entities.entry(kind).or_default().push(entity.clone());
        entity
    }

    /// Seed a linkage directly, bypassing validation and call counting.
    pub async fn seed_linkage(&self, payload: LinkagePayload) -> LinkageRecord {
        let mut state = self.state.write().await;
        let id = state.next_id("l");
        let now = Utc::now();
        let stored = StoredLinkage {
            primary_subject_id: payload.primary_subject_id,
            secondary_subject_id: payload.secondary_subject_id,
            tag_ids: payload.tag_ids,
            created_at: now,
            updated_at: now,
        };
        let record = state.to_record(&id, &stored);
        state.linkages.push((id, stored));
        record
    }

    pub async fn linkage_count(&self) -> usize {
        self.state.read().await.linkages.len()
    }
}

#[async_trait]
impl RemoteCollaborator for InMemoryRemote {
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>> {
        let mut state = self.state.write().await;
        state.enter(RemoteOp::ListEntities, "list entities")?;
        Ok(state.entities.get(&kind).cloned().unwrap_or_default())
    }

    async fn create_entity(&self, kind: EntityKind, name: &str) -> Result<Entity> {
        let mut state = self.state.write().await;
        state.enter(RemoteOp::CreateEntity, "create entity")?;
        if name.trim().is_empty() {
            return Err(CanvasError::remote(422, "entity name must not be empty"));
        }
        let entity = Entity::new(state.next_id("e"), name);
        state.entities.entry(kind).or_default().push(entity.clone());
        Ok(entity)
    }

    async fn list_linkages(&self, filter: &LinkageFilter) -> Result<Vec<LinkageRecord>> {
        let mut state = self.state.write().await;
        state.enter(RemoteOp::ListLinkages, "list linkages")?;
        Ok(state
            .linkages
            .iter()
            .map(|(id, stored)| state.to_record(id, stored))
            .filter(|record| filter.matches(record))
            .collect())
    }

    async fn create_linkage(&self, payload: &LinkagePayload) -> Result<LinkageRecord> {
        let mut state = self.state.write().await;
        state.enter(RemoteOp::CreateLinkage, "create linkage")?;
        state.validate(payload)?;
        let id = state.next_id("l");
        let now = Utc::now();
        let stored = StoredLinkage {
            primary_subject_id: payload.primary_subject_id.clone(),
            secondary_subject_id: payload.secondary_subject_id.clone(),
            tag_ids: payload.tag_ids.clone(),
            created_at: now,
            updated_at: now,
        };
        let record = state.to_record(&id, &stored);
        state.linkages.push((id, stored));
        Ok(record)
    }

    async fn update_linkage(&self, id: &str, payload: &LinkagePayload) -> Result<LinkageRecord> {
        let mut state = self.state.write().await;
        state.enter(RemoteOp::UpdateLinkage, "update linkage")?;
        let Some(index) = state.linkages.iter().position(|(key, _)| key == id) else {
            return Err(CanvasError::not_found(format!("linkage '{id}'")));
        };
        state.validate(payload)?;
        let stored = &mut state.linkages[index].1;
        stored.primary_subject_id = payload.primary_subject_id.clone();
        stored.secondary_subject_id = payload.secondary_subject_id.clone();
        stored.tag_ids = payload.tag_ids.clone();
        stored.updated_at = Utc::now();
        let stored = stored.clone();
        Ok(state.to_record(id, &stored))
    }

    async fn delete_linkage(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.enter(RemoteOp::DeleteLinkage, "delete linkage")?;
        let before = state.linkages.len();
        state.linkages.retain(|(key, _)| key != id);
        if state.linkages.len() == before {
            return Err(CanvasError::not_found(format!("linkage '{id}'")));
        }
        Ok(())
    }
}
