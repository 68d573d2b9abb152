//! Required-field rules for linkage rows.
//!
//! Everything here is a pure function of the row. Persistence state, dirty
//! tracking and the scheduler never influence the verdict.

use crate::core::{LinkageRow, RowId};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequiredField {
    PrimarySubject,
    SecondarySubject,
    Tags,
}

impl RequiredField {
    pub fn label(self) -> &'static str {
        match self {
            RequiredField::PrimarySubject => "primary subject",
            RequiredField::SecondarySubject => "secondary subject",
            RequiredField::Tags => "tags",
        }
    }
}

impl fmt::Display for RequiredField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A row that failed validation and the fields it is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteRow {
    pub id: RowId,
    pub missing: BTreeSet<RequiredField>,
}

impl fmt::Display for IncompleteRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self
            .missing
            .iter()
            .map(|field| field.label())
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "row {} is missing {}", self.id, fields)
    }
}

fn present(value: &str) -> bool {
    !value.trim().is_empty()
}

pub fn incomplete_fields(row: &LinkageRow) -> BTreeSet<RequiredField> {
    let mut missing = BTreeSet::new();
    if !present(&row.primary_subject) {
        missing.insert(RequiredField::PrimarySubject);
    }
    if !present(&row.secondary_subject) {
        missing.insert(RequiredField::SecondarySubject);
    }
    if !row.tags.iter().any(|tag| present(&tag.name)) {
        missing.insert(RequiredField::Tags);
    }
    missing
}

pub fn is_complete(row: &LinkageRow) -> bool {
    incomplete_fields(row).is_empty()
}

/// All three required dimensions empty: the user has not touched the row yet.
pub fn is_blank(row: &LinkageRow) -> bool {
    incomplete_fields(row).len() == 3
}

/// Rows to flag as invalid in the table.
///
/// Blank rows are left alone unless `show_all` is set, which happens after a
/// manual save was rejected.
pub fn invalid_rows<'a, I>(rows: I, show_all: bool) -> Vec<IncompleteRow>
where
    I: IntoIterator<Item = &'a LinkageRow>,
{
    rows.into_iter()
        .filter_map(|row| {
            let missing = incomplete_fields(row);
            if missing.is_empty() || (!show_all && missing.len() == 3) {
                return None;
            }
            Some(IncompleteRow {
                id: row.id.clone(),
                missing,
            })
        })
        .collect()
}
