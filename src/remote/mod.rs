//! The remote collaborator: the REST backend that owns entities and linkages.
//!
//! The session only talks to it through [`RemoteCollaborator`], so the HTTP
//! client and the in-process double are interchangeable.

pub mod http;
pub mod memory;

use crate::core::{Entity, EntityKind, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use http::HttpRemote;
pub use memory::{InMemoryRemote, RemoteOp};

/// An entity reference as it appears in a linkage listing: either the bare id
/// or the expanded `{id, name}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Expanded(Entity),
    Id(String),
}

impl EntityRef {
    pub fn id(&self) -> &str {
        match self {
            EntityRef::Expanded(entity) => &entity.id,
            EntityRef::Id(id) => id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            EntityRef::Expanded(entity) => Some(&entity.name),
            EntityRef::Id(_) => None,
        }
    }
}

/// A linkage record as served by `GET /linkages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkageRecord {
    pub id: String,
    pub primary_subject: EntityRef,
    pub secondary_subject: EntityRef,
    #[serde(default)]
    pub tags: Vec<EntityRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /linkages` and `PUT /linkages/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkagePayload {
    pub primary_subject_id: String,
    pub secondary_subject_id: String,
    pub tag_ids: Vec<String>,
}

/// Query filters for `GET /linkages`. Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkageFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_subject_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_id: Option<String>,
}

impl LinkageFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn primary_subject(mut self, id: impl Into<String>) -> Self {
        self.primary_subject_id = Some(id.into());
        self
    }

    pub fn secondary_subject(mut self, id: impl Into<String>) -> Self {
        self.secondary_subject_id = Some(id.into());
        self
    }

    pub fn tag(mut self, id: impl Into<String>) -> Self {
        self.tag_id = Some(id.into());
        self
    }

    pub fn matches(&self, record: &LinkageRecord) -> bool {
        self.primary_subject_id
            .as_deref()
            .is_none_or(|id| record.primary_subject.id() == id)
            && self
                .secondary_subject_id
                .as_deref()
                .is_none_or(|id| record.secondary_subject.id() == id)
            && self
                .tag_id
                .as_deref()
                .is_none_or(|id| record.tags.iter().any(|tag| tag.id() == id))
    }
}

#[async_trait]
pub trait RemoteCollaborator: Send + Sync {
    async fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>>;
    async fn create_entity(&self, kind: EntityKind, name: &str) -> Result<Entity>;
    async fn list_linkages(&self, filter: &LinkageFilter) -> Result<Vec<LinkageRecord>>;
    async fn create_linkage(&self, payload: &LinkagePayload) -> Result<LinkageRecord>;
    /// Fails with a not-found class error when `id` no longer exists.
    async fn update_linkage(&self, id: &str, payload: &LinkagePayload) -> Result<LinkageRecord>;
    async fn delete_linkage(&self, id: &str) -> Result<()>;
}
