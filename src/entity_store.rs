//! Cache of the three reference lists (enterprises, products, services).

use crate::core::{CanvasError, Entity, EntityKind, Result};
use crate::remote::RemoteCollaborator;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Entities a row refers to, after lookup and on-demand creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRefs {
    pub primary_subject: Entity,
    pub secondary_subject: Entity,
    pub tags: Vec<Entity>,
}

impl ResolvedRefs {
    pub fn tag_ids(&self) -> Vec<String> {
        self.tags.iter().map(|tag| tag.id.clone()).collect()
    }
}

pub struct EntityStore {
    remote: Arc<dyn RemoteCollaborator>,
    cache: RwLock<HashMap<EntityKind, Vec<Entity>>>,
}

impl EntityStore {
    pub fn new(remote: Arc<dyn RemoteCollaborator>) -> Self {
        Self {
            remote,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch all three lists and replace the cache wholesale.
    ///
    /// Nothing is replaced unless every list was fetched.
    pub async fn load(&self) -> Result<()> {
        let mut fresh = HashMap::new();
        for kind in EntityKind::ALL {
            let entities = self.remote.list_entities(kind).await?;
            debug!(%kind, count = entities.len(), "entity list fetched");
            fresh.insert(kind, entities);
        }
        *self.cache.write().await = fresh;
        Ok(())
    }

    /// Exact, case-sensitive lookup against the cache.
    pub async fn find_by_name(&self, kind: EntityKind, name: &str) -> Option<Entity> {
        self.cache
            .read()
            .await
            .get(&kind)
            .and_then(|list| list.iter().find(|entity| entity.name == name))
            .cloned()
    }

    pub async fn find_by_id(&self, kind: EntityKind, id: &str) -> Option<Entity> {
        self.cache
            .read()
            .await
            .get(&kind)
            .and_then(|list| list.iter().find(|entity| entity.id == id))
            .cloned()
    }

    pub async fn entities(&self, kind: EntityKind) -> Vec<Entity> {
        self.cache
            .read()
            .await
            .get(&kind)
            .cloned()
            .unwrap_or_default()
    }

    /// Return the cached entity for `name`, creating it remotely if absent.
    ///
    /// Two overlapping calls for the same new name may both reach the remote
    /// and create two entities; the cache keeps both and lookups return the
    /// first.
    pub async fn create_if_missing(&self, kind: EntityKind, name: &str) -> Result<Entity> {
        if name.trim().is_empty() {
            return Err(CanvasError::invalid(format!(
                "refusing to create a {kind} entity with a blank name"
            )));
        }
        if let Some(existing) = self.find_by_name(kind, name).await {
            return Ok(existing);
        }

        let created = self.remote.create_entity(kind, name).await?;
        info!(%kind, id = %created.id, name = %created.name, "entity created on demand");
        self.cache
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(created.clone());
        Ok(created)
    }

    /// Resolve every reference of a row: look all names up first, then create
    /// only the ones that are missing. Blank tag names are dropped and
    /// repeated tag names resolve once.
    pub async fn resolve(
        &self,
        primary_subject: &str,
        secondary_subject: &str,
        tags: &[String],
    ) -> Result<ResolvedRefs> {
        let mut tag_names: Vec<&str> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !tag.trim().is_empty() && !tag_names.contains(&tag.as_str()) {
                tag_names.push(tag);
            }
        }

        let mut wanted = vec![
            (EntityKind::PrimarySubject, primary_subject),
            (EntityKind::SecondarySubject, secondary_subject),
        ];
        wanted.extend(tag_names.iter().map(|name| (EntityKind::Tag, *name)));

        let mut found: Vec<Option<Entity>> = {
            let cache = self.cache.read().await;
            wanted
                .iter()
                .map(|(kind, name)| {
                    cache
                        .get(kind)
                        .and_then(|list| list.iter().find(|entity| entity.name == *name))
                        .cloned()
                })
                .collect()
        };

        let missing = found.iter().filter(|slot| slot.is_none()).count();
        if missing > 0 {
            debug!(missing, "creating missing entities");
        }
        for ((kind, name), slot) in wanted.iter().zip(found.iter_mut()) {
            if slot.is_none() {
                *slot = Some(self.create_if_missing(*kind, name).await?);
            }
        }

        let mut resolved = found.into_iter().flatten();
        let (Some(primary_subject), Some(secondary_subject)) = (resolved.next(), resolved.next())
        else {
            return Err(CanvasError::invalid("subject references did not resolve"));
        };
        Ok(ResolvedRefs {
            primary_subject,
            secondary_subject,
            tags: resolved.collect(),
        })
    }
}
