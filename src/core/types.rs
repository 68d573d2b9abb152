use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix used when a temporary row id is rendered for the presentation layer.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// The three reference lists a linkage row points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// Enterprise / pipeline name.
    PrimarySubject,
    /// Product / details.
    SecondarySubject,
    /// Service.
    Tag,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [
        EntityKind::PrimarySubject,
        EntityKind::SecondarySubject,
        EntityKind::Tag,
    ];

    /// Path segment under `/entities/` on the remote collaborator.
    pub fn path_segment(self) -> &'static str {
        match self {
            EntityKind::PrimarySubject => "enterprises",
            EntityKind::SecondarySubject => "products",
            EntityKind::Tag => "services",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.path_segment() == segment)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// A named reference value. The id is opaque and server-assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// Identity of a linkage row.
///
/// Temporary ids live in their own namespace and can never equal a server id,
/// whatever string the server hands out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RowId {
    Temporary(Uuid),
    Persisted(String),
}

impl RowId {
    pub fn new_temporary() -> Self {
        RowId::Temporary(Uuid::new_v4())
    }

    pub fn persisted(id: impl Into<String>) -> Self {
        RowId::Persisted(id.into())
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, RowId::Temporary(_))
    }

    /// Server id, if this row has been persisted.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            RowId::Persisted(id) => Some(id),
            RowId::Temporary(_) => None,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowId::Temporary(uuid) => write!(f, "{TEMP_ID_PREFIX}{uuid}"),
            RowId::Persisted(id) => f.write_str(id),
        }
    }
}

/// A tag name together with the entity it resolved to, if any yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRef {
    pub name: String,
    pub id: Option<String>,
}

impl TagRef {
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
        }
    }

    pub fn resolved(entity: &Entity) -> Self {
        Self {
            name: entity.name.clone(),
            id: Some(entity.id.clone()),
        }
    }
}

/// The editable unit: one primary subject, one secondary subject, a set of tags.
///
/// Names are the denormalized display values; the `*_id` fields point into the
/// entity store and stay `None` until the name has been resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkageRow {
    pub id: RowId,
    pub primary_subject: String,
    pub primary_subject_id: Option<String>,
    pub secondary_subject: String,
    pub secondary_subject_id: Option<String>,
    pub tags: Vec<TagRef>,
}

impl LinkageRow {
    pub fn temporary() -> Self {
        Self::blank(RowId::new_temporary())
    }

    pub fn blank(id: RowId) -> Self {
        Self {
            id,
            primary_subject: String::new(),
            primary_subject_id: None,
            secondary_subject: String::new(),
            secondary_subject_id: None,
            tags: Vec::new(),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.id.is_temporary()
    }

    /// The (primary, secondary) key, present only once both sides are resolved.
    pub fn subject_key(&self) -> Option<(&str, &str)> {
        match (&self.primary_subject_id, &self.secondary_subject_id) {
            (Some(primary), Some(secondary)) => Some((primary.as_str(), secondary.as_str())),
            _ => None,
        }
    }

    pub fn tag_names(&self) -> Vec<String> {
        self.tags.iter().map(|tag| tag.name.clone()).collect()
    }

    pub fn has_tag(&self, name: &str) -> bool {
        self.tags.iter().any(|tag| tag.name == name)
    }

    /// Same user-visible values, ignoring identity and resolved ids.
    pub fn same_names(&self, other: &LinkageRow) -> bool {
        self.primary_subject == other.primary_subject
            && self.secondary_subject == other.secondary_subject
            && self.tags.len() == other.tags.len()
            && self
                .tags
                .iter()
                .zip(&other.tags)
                .all(|(left, right)| left.name == right.name)
    }
}

/// A single field mutation coming from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "snake_case")]
pub enum RowEdit {
    PrimarySubject(String),
    SecondarySubject(String),
    /// Replace the whole tag set.
    Tags(Vec<String>),
    AddTag(String),
    RemoveTag(String),
}

impl RowEdit {
    /// Whether applying this edit can move the row onto a different
    /// (primary, secondary) key.
    pub fn touches_subject_key(&self) -> bool {
        matches!(self, RowEdit::PrimarySubject(_) | RowEdit::SecondarySubject(_))
    }
}

/// A row as the presentation layer sees it: the row plus its stable position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderedRow {
    pub display_order: u64,
    #[serde(flatten)]
    pub row: LinkageRow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_ids_render_with_prefix() {
        let id = RowId::new_temporary();
        assert!(id.to_string().starts_with(TEMP_ID_PREFIX));
        assert!(id.is_temporary());
        assert_eq!(id.server_id(), None);
    }

    #[test]
    fn temporary_namespace_never_equals_server_id() {
        let temp = RowId::new_temporary();
        let lookalike = RowId::persisted(temp.to_string());
        assert_ne!(temp, lookalike);
        assert_eq!(lookalike.server_id(), Some(temp.to_string().as_str()));
    }

    #[test]
    fn subject_key_requires_both_ids() {
        let mut row = LinkageRow::temporary();
        row.primary_subject_id = Some("e1".into());
        assert_eq!(row.subject_key(), None);
        row.secondary_subject_id = Some("p1".into());
        assert_eq!(row.subject_key(), Some(("e1", "p1")));
    }

    #[test]
    fn entity_kind_path_round_trip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_path_segment(kind.path_segment()), Some(kind));
        }
        assert_eq!(EntityKind::from_path_segment("pipelines"), None);
    }
}
