//! Index structures behind the point-in-time rule.
//!
//! Each entity with a time column gets a `TimeIndex`: one sort by
//! timestamp yielding a rank per row, so "visible at cutoff t" is a rank
//! comparison against a prefix length. The `CutoffSchedule` groups
//! target rows by nondecreasing cutoff and advances every entity's
//! prefix two-pointer style, one pass for the whole run. Relationship
//! fan-out goes through `LinkIndex` maps built lazily behind a
//! `parking_lot::RwLock` and shared across worker threads.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::model::{Key, Table};
use crate::schema::{EntitySet, Relationship};
use crate::{Error, Result};

// ============================================================================
// Time index
// ============================================================================

/// Sort order of one entity's rows by timestamp (ties by row id).
#[derive(Debug)]
pub(crate) struct TimeIndex {
    /// Timestamps in sorted order.
    stamps: Vec<DateTime<Utc>>,
    /// Sorted position of each row id.
    rank: Vec<usize>,
}

impl TimeIndex {
    pub fn build(table: &Table, time_column: &str) -> Result<Self> {
        let col = table.column(time_column).ok_or_else(|| {
            Error::Evaluation(format!("time column '{time_column}' is missing from the table"))
        })?;
        let mut stamped: Vec<(DateTime<Utc>, usize)> = Vec::with_capacity(col.len());
        for (row, value) in col.iter().enumerate() {
            let ts = value.as_timestamp().ok_or_else(|| {
                Error::Evaluation(format!(
                    "time column '{time_column}' has no timestamp at row {row}"
                ))
            })?;
            stamped.push((ts, row));
        }
        stamped.sort();

        let mut stamps = Vec::with_capacity(stamped.len());
        let mut rank = vec![0; stamped.len()];
        for (position, (ts, row)) in stamped.into_iter().enumerate() {
            stamps.push(ts);
            rank[row] = position;
        }
        Ok(Self { stamps, rank })
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn rank_of(&self, row: usize) -> usize {
        self.rank[row]
    }

    /// Whether the sorted entry at `position` falls within `cutoff`.
    pub fn admits(&self, position: usize, cutoff: DateTime<Utc>, inclusive: bool) -> bool {
        if inclusive {
            self.stamps[position] <= cutoff
        } else {
            self.stamps[position] < cutoff
        }
    }
}

// ============================================================================
// Cutoff schedule
// ============================================================================

/// Target rows sharing one cutoff time, with the per-entity visible
/// prefix lengths frozen for that cutoff.
#[derive(Debug)]
pub(crate) struct Batch {
    pub cutoff: DateTime<Utc>,
    /// Target row ids, ascending.
    pub rows: Vec<usize>,
    /// Visible prefix per entity position; meaningful only where the
    /// entity has a time index.
    pub prefixes: Vec<usize>,
}

#[derive(Debug)]
pub(crate) struct CutoffSchedule {
    pub batches: Vec<Batch>,
}

impl CutoffSchedule {
    /// `cutoffs[row]` is the cutoff of target row `row`; `indexes` holds
    /// one optional time index per entity position.
    pub fn build(
        cutoffs: &[DateTime<Utc>],
        indexes: &[Option<TimeIndex>],
        inclusive: bool,
    ) -> Self {
        let mut by_cutoff: Vec<(DateTime<Utc>, usize)> = cutoffs
            .iter()
            .enumerate()
            .map(|(row, &t)| (t, row))
            .collect();
        by_cutoff.sort();

        let mut batches = Vec::new();
        let mut pointers = vec![0usize; indexes.len()];
        let mut i = 0;
        while i < by_cutoff.len() {
            let cutoff = by_cutoff[i].0;
            let mut rows = Vec::new();
            while i < by_cutoff.len() && by_cutoff[i].0 == cutoff {
                rows.push(by_cutoff[i].1);
                i += 1;
            }

            let mut prefixes = vec![0usize; indexes.len()];
            for (pos, maybe) in indexes.iter().enumerate() {
                if let Some(index) = maybe {
                    let mut p = pointers[pos];
                    while p < index.len() && index.admits(p, cutoff, inclusive) {
                        p += 1;
                    }
                    pointers[pos] = p;
                    prefixes[pos] = p;
                }
            }
            batches.push(Batch {
                cutoff,
                rows,
                prefixes,
            });
        }
        Self { batches }
    }
}

/// Immutable per-batch visibility view: a row of a temporal entity is
/// visible iff its rank falls inside the batch's prefix; atemporal
/// entities are always fully visible.
#[derive(Clone, Copy)]
pub(crate) struct Slice<'a> {
    indexes: &'a [Option<TimeIndex>],
    batch: &'a Batch,
}

impl<'a> Slice<'a> {
    pub fn new(indexes: &'a [Option<TimeIndex>], batch: &'a Batch) -> Self {
        Self { indexes, batch }
    }

    pub fn visible(&self, entity_pos: usize, row: usize) -> bool {
        match &self.indexes[entity_pos] {
            Some(index) => index.rank_of(row) < self.batch.prefixes[entity_pos],
            None => true,
        }
    }

    pub fn rows(&self) -> &[usize] {
        &self.batch.rows
    }
}

// ============================================================================
// Link index
// ============================================================================

/// Child-key value → child row ids, in row order.
#[derive(Debug)]
pub(crate) struct LinkIndex {
    by_key: HashMap<Key, Vec<usize>>,
}

impl LinkIndex {
    pub fn build(table: &Table, key_column: &str) -> Result<Self> {
        let col = table.column(key_column).ok_or_else(|| {
            Error::Evaluation(format!("key column '{key_column}' is missing from the table"))
        })?;
        let mut by_key: HashMap<Key, Vec<usize>> = HashMap::new();
        for (row, value) in col.iter().enumerate() {
            let key = Key::try_from(value).map_err(|_| {
                Error::Evaluation(format!(
                    "key column '{key_column}' has a non-key value at row {row}"
                ))
            })?;
            by_key.entry(key).or_default().push(row);
        }
        Ok(Self { by_key })
    }

    pub fn rows_for(&self, key: &Key) -> &[usize] {
        self.by_key.get(key).map_or(&[], Vec::as_slice)
    }
}

/// Lazily built link indexes, one per relationship, shared by all
/// evaluation workers for the run.
pub(crate) struct IndexCache {
    links: RwLock<HashMap<Relationship, Arc<LinkIndex>>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
        }
    }

    pub fn link(&self, set: &EntitySet, rel: &Relationship) -> Result<Arc<LinkIndex>> {
        if let Some(found) = self.links.read().get(rel) {
            return Ok(Arc::clone(found));
        }
        let table = set.table(&rel.child).ok_or_else(|| {
            Error::Evaluation(format!("entity '{}' has no table", rel.child))
        })?;
        let built = Arc::new(LinkIndex::build(table, &rel.child_key)?);
        let mut guard = self.links.write();
        let entry = guard.entry(rel.clone()).or_insert(built);
        Ok(Arc::clone(entry))
    }
}
