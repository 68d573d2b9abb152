//! Record table state: rows, their stable display order, and dirty tracking.
//!
//! Everything is kept in `im` collections so a snapshot is a cheap clone and a
//! flush can work from a consistent view while edits continue on the live
//! table.

use crate::core::{LinkageRow, OrderedRow, RowId};
use im::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct RecordTable {
    rows: HashMap<RowId, LinkageRow>,
    /// Stable position, never renumbered.
    display_order: HashMap<RowId, u64>,
    /// Insertion sequence, used to break display-order ties.
    arrival: HashMap<RowId, u64>,
    dirty: HashSet<RowId>,
    /// Old id -> id it was relabeled to.
    aliases: HashMap<RowId, RowId>,
    /// Identity sequence at which each live id appeared (insert or relabel).
    labeled_at: HashMap<RowId, u64>,
    /// Identity sequence at which a persisted id left the table.
    retired: HashMap<RowId, u64>,
    next_order: u64,
    next_arrival: u64,
    next_label: u64,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Follow relabels so ids captured before an identity change still land
    /// on the surviving row.
    pub fn resolve(&self, id: &RowId) -> Option<RowId> {
        let mut current = id.clone();
        // a relabel chain can never be longer than the number of relabels
        for _ in 0..=self.aliases.len() {
            if self.rows.contains_key(&current) {
                return Some(current);
            }
            current = self.aliases.get(&current)?.clone();
        }
        None
    }

    pub fn contains(&self, id: &RowId) -> bool {
        self.rows.contains_key(id)
    }

    pub fn get(&self, id: &RowId) -> Option<&LinkageRow> {
        self.rows.get(id)
    }

    pub fn get_mut(&mut self, id: &RowId) -> Option<&mut LinkageRow> {
        self.rows.get_mut(id)
    }

    pub fn display_order(&self, id: &RowId) -> Option<u64> {
        self.display_order.get(id).copied()
    }

    /// Append a row at the end of the display order.
    pub fn insert(&mut self, row: LinkageRow) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        self.insert_at(row, order);
        order
    }

    fn insert_at(&mut self, row: LinkageRow, order: u64) {
        let id = row.id.clone();
        self.display_order.insert(id.clone(), order);
        self.arrival.insert(id.clone(), self.next_arrival);
        self.next_arrival += 1;
        let label = self.bump_label();
        self.labeled_at.insert(id.clone(), label);
        self.retired.remove(&id);
        self.rows.insert(id, row);
    }

    fn bump_label(&mut self) -> u64 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    fn retire(&mut self, id: &RowId) {
        self.labeled_at.remove(id);
        if !id.is_temporary() {
            let label = self.bump_label();
            self.retired.insert(id.clone(), label);
        }
    }

    /// Current identity sequence. Take it before fetching a listing and pass
    /// it to [`RecordTable::replace_persisted`].
    pub fn label_mark(&self) -> u64 {
        self.next_label
    }

    /// Delete a row. The display order keeps the gap.
    pub fn remove(&mut self, id: &RowId) -> Option<LinkageRow> {
        let row = self.rows.remove(id)?;
        self.display_order.remove(id);
        self.arrival.remove(id);
        self.dirty.remove(id);
        self.aliases.retain(|_, target| target != id);
        self.retire(id);
        Some(row)
    }

    /// Move a row to a new identity, carrying its display order and dirty
    /// membership along. Absent `old` is a no-op, which makes repeated calls
    /// harmless.
    pub fn relabel(&mut self, old: &RowId, new: &RowId) -> bool {
        if old == new || self.rows.contains_key(new) {
            return false;
        }
        let Some(mut row) = self.rows.remove(old) else {
            return false;
        };
        row.id = new.clone();
        self.rows.insert(new.clone(), row);

        if let Some(order) = self.display_order.remove(old) {
            self.display_order.insert(new.clone(), order);
        }
        if let Some(arrival) = self.arrival.remove(old) {
            self.arrival.insert(new.clone(), arrival);
        }
        if self.dirty.remove(old).is_some() {
            self.dirty.insert(new.clone());
        }
        self.retire(old);
        let label = self.bump_label();
        self.labeled_at.insert(new.clone(), label);
        self.retired.remove(new);

        let redirected: Vec<RowId> = self
            .aliases
            .iter()
            .filter(|(_, target)| *target == old)
            .map(|(alias, _)| alias.clone())
            .collect();
        for alias in redirected {
            self.aliases.insert(alias, new.clone());
        }
        self.aliases.insert(old.clone(), new.clone());
        true
    }

    pub fn mark_dirty(&mut self, id: &RowId) -> bool {
        if id.is_temporary() || !self.rows.contains_key(id) {
            return false;
        }
        self.dirty.insert(id.clone()).is_none()
    }

    pub fn clear_dirty(&mut self, id: &RowId) -> bool {
        self.dirty.remove(id).is_some()
    }

    pub fn is_dirty(&self, id: &RowId) -> bool {
        self.dirty.contains(id)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Dirty ids in display order.
    pub fn dirty_ids(&self) -> Vec<RowId> {
        self.ordered_ids()
            .into_iter()
            .filter(|id| self.dirty.contains(id))
            .collect()
    }

    fn sort_key(&self, id: &RowId) -> (u64, u64) {
        (
            self.display_order.get(id).copied().unwrap_or(u64::MAX),
            self.arrival.get(id).copied().unwrap_or(u64::MAX),
        )
    }

    pub fn ordered_ids(&self) -> Vec<RowId> {
        let mut ids: Vec<RowId> = self.rows.keys().cloned().collect();
        ids.sort_by_key(|id| self.sort_key(id));
        ids
    }

    /// Rows sorted by display order, ties broken by insertion position.
    pub fn rows(&self) -> Vec<OrderedRow> {
        self.ordered_ids()
            .into_iter()
            .filter_map(|id| {
                let row = self.rows.get(&id)?.clone();
                Some(OrderedRow {
                    display_order: self.sort_key(&id).0,
                    row,
                })
            })
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LinkageRow> {
        self.rows.values()
    }

    /// Persisted row other than `except` sitting on the given key.
    pub fn find_persisted_by_key(
        &self,
        primary_id: &str,
        secondary_id: &str,
        except: &RowId,
    ) -> Option<RowId> {
        self.ordered_ids().into_iter().find(|id| {
            id != except
                && !id.is_temporary()
                && self
                    .rows
                    .get(id)
                    .and_then(LinkageRow::subject_key)
                    .is_some_and(|key| key == (primary_id, secondary_id))
        })
    }

    /// Apply a server listing whose fetch started at identity sequence
    /// `since` (see [`RecordTable::label_mark`]).
    ///
    /// Rows already known keep their display order; unseen rows are appended
    /// in the order given. Dirty rows keep their local version, temporary rows
    /// are untouched, and persisted rows missing from the listing are dropped.
    /// Ids that appeared after `since` are kept even when the listing lacks
    /// them, and ids that left the table after `since` are not brought back.
    pub fn replace_persisted(&mut self, fetched: Vec<LinkageRow>, since: u64) {
        let fetched_ids: HashSet<RowId> = fetched.iter().map(|row| row.id.clone()).collect();
        let stale: Vec<RowId> = self
            .rows
            .keys()
            .filter(|id| {
                !id.is_temporary()
                    && !fetched_ids.contains(*id)
                    && !self.dirty.contains(*id)
                    && self.labeled_at.get(*id).is_some_and(|label| *label < since)
            })
            .cloned()
            .collect();
        for id in stale {
            self.remove(&id);
        }

        for row in fetched {
            if self.dirty.contains(&row.id) {
                continue;
            }
            if self.retired.get(&row.id).is_some_and(|label| *label >= since) {
                continue;
            }
            match self.rows.get_mut(&row.id) {
                Some(existing) => *existing = row,
                None => {
                    self.insert(row);
                }
            }
        }
    }
}
