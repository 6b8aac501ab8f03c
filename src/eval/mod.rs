//! # Cutoff-Time Evaluator
//!
//! Computes every planned feature for every target row under the
//! point-in-time rule: a value for target row `r` may only be influenced
//! by rows whose own timestamp falls within `r`'s cutoff time, applied
//! transitively through every relationship hop. Entities without a time
//! column are atemporal and always fully visible.
//!
//! The run is organized as a `CutoffSchedule`: target rows grouped by
//! nondecreasing cutoff, each batch carrying the frozen visible prefix
//! of every temporal entity. Specs are independent once planned, so they
//! evaluate in parallel; everything they touch — the entity set, the
//! schedule, the lazily built link indexes — is read-only or internally
//! locked for the duration.

pub(crate) mod slice;

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::model::{Key, Table, Value};
use crate::plan::FeatureSpec;
use crate::primitive::{PrimitiveKind, PrimitiveLibrary};
use crate::schema::EntitySet;
use crate::{Error, Result};

use slice::{CutoffSchedule, IndexCache, Slice, TimeIndex};

/// One computed feature column: target index value → feature value,
/// covering every target row.
pub type ValueMap = HashMap<Key, Value>;

// ============================================================================
// Options
// ============================================================================

/// Explicit cutoff times, keyed by target index value.
#[derive(Debug, Clone, Default)]
pub struct CutoffFrame {
    times: HashMap<Key, DateTime<Utc>>,
}

impl CutoffFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<Key>, cutoff: DateTime<Utc>) {
        self.times.insert(key.into(), cutoff);
    }

    pub fn get(&self, key: &Key) -> Option<DateTime<Utc>> {
        self.times.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
}

impl<K: Into<Key>> FromIterator<(K, DateTime<Utc>)> for CutoffFrame {
    fn from_iter<I: IntoIterator<Item = (K, DateTime<Utc>)>>(iter: I) -> Self {
        let mut frame = Self::new();
        for (key, cutoff) in iter {
            frame.set(key, cutoff);
        }
        frame
    }
}

/// Where each target row's cutoff comes from. `OwnTime` (the default)
/// reads the target's own time column.
#[derive(Debug, Clone, Default)]
pub enum CutoffPolicy {
    #[default]
    OwnTime,
    Frame(CutoffFrame),
}

/// Tie policy for a row stamped exactly at the cutoff. Inclusive (≤) is
/// the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CutoffInclusion {
    #[default]
    Inclusive,
    Exclusive,
}

/// Strict aborts the run on the first failing feature; lenient fills the
/// failing feature's column with its empty value and records the failure
/// in the run report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvalMode {
    #[default]
    Strict,
    Lenient,
}

#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    pub cutoff: CutoffPolicy,
    pub inclusion: CutoffInclusion,
    pub mode: EvalMode,
}

impl EvalOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cutoff(mut self, policy: CutoffPolicy) -> Self {
        self.cutoff = policy;
        self
    }

    pub fn with_inclusion(mut self, inclusion: CutoffInclusion) -> Self {
        self.inclusion = inclusion;
        self
    }

    pub fn with_mode(mut self, mode: EvalMode) -> Self {
        self.mode = mode;
        self
    }
}

// ============================================================================
// Run report
// ============================================================================

#[derive(Debug, Clone)]
pub struct FeatureFailure {
    pub feature: String,
    pub message: String,
}

/// Run-level summary handed back next to the computed columns.
#[derive(Debug)]
pub struct RunReport {
    pub features_planned: usize,
    pub features_computed: usize,
    pub failures: Vec<FeatureFailure>,
    pub batches: usize,
    pub elapsed: Duration,
}

// ============================================================================
// Entry point
// ============================================================================

/// Evaluate every spec for every row of `target`, in plan order.
///
/// A missing cutoff for any target row aborts the run in either mode —
/// it is a caller mistake, not a data condition. Per-feature compute
/// failures follow `options.mode`, as does a spec defined on some
/// entity other than `target`.
pub fn evaluate(
    set: &EntitySet,
    library: &PrimitiveLibrary,
    specs: &[FeatureSpec],
    target: &str,
    options: &EvalOptions,
) -> Result<(Vec<ValueMap>, RunReport)> {
    let started = Instant::now();
    let ctx = EvalContext::new(set, library, target, options)?;
    debug!(
        entity = %target,
        rows = ctx.keys.len(),
        batches = ctx.schedule.batches.len(),
        specs = specs.len(),
        "evaluation starting"
    );

    // Row ids below are target row ids; a spec rooted elsewhere would
    // index a foreign table with them.
    let results: Vec<Result<ValueMap>> = specs
        .par_iter()
        .map(|spec| {
            if spec.entity() != target {
                return Err(Error::Evaluation(format!(
                    "feature '{}' is defined on entity '{}', not on target '{target}'",
                    spec.name(),
                    spec.entity()
                )));
            }
            ctx.column(spec)
        })
        .collect();

    let mut maps = Vec::with_capacity(specs.len());
    let mut failures = Vec::new();
    for (spec, result) in specs.iter().zip(results) {
        match result {
            Ok(map) => maps.push(map),
            Err(err) => match options.mode {
                EvalMode::Strict => {
                    return Err(Error::Evaluation(format!(
                        "feature '{}' failed: {err}",
                        spec.name()
                    )));
                }
                EvalMode::Lenient => {
                    warn!(feature = %spec.name(), error = %err, "feature failed, filling default");
                    failures.push(FeatureFailure {
                        feature: spec.name(),
                        message: err.to_string(),
                    });
                    maps.push(ctx.fallback_column(spec));
                }
            },
        }
    }

    let report = RunReport {
        features_planned: specs.len(),
        features_computed: specs.len() - failures.len(),
        failures,
        batches: ctx.schedule.batches.len(),
        elapsed: started.elapsed(),
    };
    info!(
        features = report.features_planned,
        failed = report.failures.len(),
        batches = report.batches,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "evaluation complete"
    );
    Ok((maps, report))
}

// ============================================================================
// Context
// ============================================================================

struct EvalContext<'a> {
    set: &'a EntitySet,
    library: &'a PrimitiveLibrary,
    /// Target index value per row.
    keys: Vec<Key>,
    /// One time index per entity position; `None` for atemporal entities.
    indexes: Vec<Option<TimeIndex>>,
    schedule: CutoffSchedule,
    cache: IndexCache,
}

impl<'a> EvalContext<'a> {
    fn new(
        set: &'a EntitySet,
        library: &'a PrimitiveLibrary,
        target: &str,
        options: &EvalOptions,
    ) -> Result<Self> {
        let target_def = set
            .entity(target)
            .ok_or_else(|| Error::Evaluation(format!("target entity '{target}' is not registered")))?;
        let target_table = set
            .table(target)
            .ok_or_else(|| Error::Evaluation(format!("entity '{target}' has no table")))?;

        let index_col = target_table.column(target_def.index()).ok_or_else(|| {
            Error::Evaluation(format!(
                "index column '{}' is missing from the table",
                target_def.index()
            ))
        })?;
        let mut keys = Vec::with_capacity(index_col.len());
        for value in index_col {
            keys.push(Key::try_from(value).map_err(|_| {
                Error::Evaluation(format!("index value '{value}' is not a valid key"))
            })?);
        }

        let mut indexes = Vec::with_capacity(set.entity_count());
        for def in set.entities() {
            match def.time_index() {
                Some(time_col) => {
                    let table = set.table(def.name()).ok_or_else(|| {
                        Error::Evaluation(format!("entity '{}' has no table", def.name()))
                    })?;
                    indexes.push(Some(TimeIndex::build(table, time_col)?));
                }
                None => indexes.push(None),
            }
        }

        // Every target row's cutoff, resolved up front; a hole here is
        // fatal regardless of mode.
        let cutoffs = match &options.cutoff {
            CutoffPolicy::OwnTime => {
                let time_col = target_def.time_index().ok_or_else(|| {
                    Error::Evaluation(format!(
                        "cutoff policy is own-time but entity '{target}' has no time column"
                    ))
                })?;
                let col = target_table.column(time_col).ok_or_else(|| {
                    Error::Evaluation(format!("time column '{time_col}' is missing from the table"))
                })?;
                let mut cutoffs = Vec::with_capacity(col.len());
                for (row, value) in col.iter().enumerate() {
                    cutoffs.push(value.as_timestamp().ok_or_else(|| {
                        Error::Evaluation(format!(
                            "time column '{time_col}' has no timestamp at row {row}"
                        ))
                    })?);
                }
                cutoffs
            }
            CutoffPolicy::Frame(frame) => {
                let mut cutoffs = Vec::with_capacity(keys.len());
                for key in &keys {
                    cutoffs.push(frame.get(key).ok_or_else(|| {
                        Error::Evaluation(format!("no cutoff time for target row '{key}'"))
                    })?);
                }
                cutoffs
            }
        };

        let inclusive = matches!(options.inclusion, CutoffInclusion::Inclusive);
        let schedule = CutoffSchedule::build(&cutoffs, &indexes, inclusive);

        Ok(Self {
            set,
            library,
            keys,
            indexes,
            schedule,
            cache: IndexCache::new(),
        })
    }

    /// One spec's full column over all target rows.
    fn column(&self, spec: &FeatureSpec) -> Result<ValueMap> {
        let mut out = ValueMap::with_capacity(self.keys.len());
        for batch in &self.schedule.batches {
            let slice = Slice::new(&self.indexes, batch);
            debug!(
                feature = %spec.name(),
                cutoff = %batch.cutoff,
                rows = batch.rows.len(),
                "resolving batch"
            );
            for &row in slice.rows() {
                let value = self.resolve(spec, row, &slice)?;
                out.insert(self.keys[row].clone(), value);
            }
        }
        Ok(out)
    }

    /// Value of `spec` for one row of the entity the spec is defined on.
    ///
    /// Raw column reads respect visibility — a row past the batch cutoff
    /// reads as missing, which also covers a target row whose own
    /// timestamp exceeds its cutoff. Aggregation fan-out starts from the
    /// given row's key (the row's identity is caller-supplied context)
    /// and filters every descendant row against the slice.
    fn resolve(&self, spec: &FeatureSpec, row: usize, slice: &Slice<'_>) -> Result<Value> {
        match spec {
            FeatureSpec::Column { entity, column, .. } => {
                let pos = self.position(entity)?;
                if !slice.visible(pos, row) {
                    return Ok(Value::Missing);
                }
                let table = self.table(entity)?;
                let value = table.value(row, column).ok_or_else(|| {
                    Error::Evaluation(format!(
                        "column '{column}' is missing on entity '{entity}'"
                    ))
                })?;
                Ok(value.clone())
            }

            FeatureSpec::Transform {
                primitive, inputs, ..
            } => {
                let p = self
                    .library
                    .get(PrimitiveKind::Transform, primitive)
                    .ok_or_else(|| {
                        Error::Evaluation(format!("unknown transform primitive '{primitive}'"))
                    })?;
                let mut args = Vec::with_capacity(inputs.len());
                for input in inputs {
                    args.push(self.resolve(input, row, slice)?);
                }
                p.apply_row(&args)
            }

            FeatureSpec::Aggregation {
                primitive,
                entity,
                path,
                input,
                ..
            } => {
                let p = self
                    .library
                    .get(PrimitiveKind::Aggregation, primitive)
                    .ok_or_else(|| {
                        Error::Evaluation(format!("unknown aggregation primitive '{primitive}'"))
                    })?;
                if path.is_empty() {
                    return Err(Error::Evaluation(format!(
                        "aggregation '{}' has an empty relationship path",
                        spec.name()
                    )));
                }
                let mut current = entity.as_str();
                for rel in path {
                    if rel.parent != current || !self.set.has_relationship(rel) {
                        return Err(Error::Evaluation(format!(
                            "relationship {rel} is not registered"
                        )));
                    }
                    current = &rel.child;
                }

                // Fan out hop by hop, dropping rows outside the slice
                let mut frontier: Vec<usize> = vec![row];
                for rel in path {
                    let link = self.cache.link(self.set, rel)?;
                    let parent_table = self.table(&rel.parent)?;
                    let child_pos = self.position(&rel.child)?;
                    let mut next = Vec::new();
                    for &parent_row in &frontier {
                        let key_value =
                            parent_table.value(parent_row, &rel.parent_key).ok_or_else(|| {
                                Error::Evaluation(format!(
                                    "key column '{}' is missing on entity '{}'",
                                    rel.parent_key, rel.parent
                                ))
                            })?;
                        let key = Key::try_from(key_value).map_err(|_| {
                            Error::Evaluation(format!(
                                "key value '{key_value}' on entity '{}' is not a valid key",
                                rel.parent
                            ))
                        })?;
                        for &child_row in link.rows_for(&key) {
                            if slice.visible(child_pos, child_row) {
                                next.push(child_row);
                            }
                        }
                    }
                    frontier = next;
                }

                let mut values = Vec::with_capacity(frontier.len());
                for &leaf_row in &frontier {
                    values.push(self.resolve(input, leaf_row, slice)?);
                }
                p.apply_group(&[values])
            }
        }
    }

    /// Lenient-mode fill: an aggregation's declared empty value, missing
    /// for anything else.
    fn fallback_column(&self, spec: &FeatureSpec) -> ValueMap {
        let fill = match spec {
            FeatureSpec::Aggregation { primitive, .. } => self
                .library
                .get(PrimitiveKind::Aggregation, primitive)
                .map(|p| p.empty_value().clone())
                .unwrap_or(Value::Missing),
            _ => Value::Missing,
        };
        self.keys
            .iter()
            .map(|key| (key.clone(), fill.clone()))
            .collect()
    }

    fn position(&self, entity: &str) -> Result<usize> {
        self.set
            .entity_position(entity)
            .ok_or_else(|| Error::Evaluation(format!("entity '{entity}' is not registered")))
    }

    fn table(&self, entity: &str) -> Result<&Table> {
        self.set
            .table(entity)
            .ok_or_else(|| Error::Evaluation(format!("entity '{entity}' has no table")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ColumnType, Table};
    use crate::plan::{plan, PlanConfig};
    use crate::schema::EntityDef;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn parent_child_set() -> EntitySet {
        let mut es = EntitySet::new();

        let targets = EntityDef::new("targets", "id")
            .with_time("t")
            .with_column("id", ColumnType::Identifier)
            .with_column("t", ColumnType::Timestamp);
        let mut target_rows = Table::new(["id", "t"]).unwrap();
        for (id, t) in [(1, 10), (2, 20), (3, 30)] {
            target_rows
                .push_row([Value::Int(id), Value::Timestamp(ts(t))])
                .unwrap();
        }
        es.add_entity(targets, target_rows).unwrap();

        let children = EntityDef::new("children", "id")
            .with_time("t")
            .with_column("id", ColumnType::Identifier)
            .with_column("parent", ColumnType::Identifier)
            .with_column("t", ColumnType::Timestamp)
            .with_column("val", ColumnType::Numeric);
        let mut child_rows = Table::new(["id", "parent", "t", "val"]).unwrap();
        for (id, parent, t, val) in [(100, 1, 9, 5), (101, 1, 15, 7), (102, 2, 21, 2)] {
            child_rows
                .push_row([
                    Value::Int(id),
                    Value::Int(parent),
                    Value::Timestamp(ts(t)),
                    Value::Int(val),
                ])
                .unwrap();
        }
        es.add_entity(children, child_rows).unwrap();

        es.add_relationship("targets", "id", "children", "parent")
            .unwrap();
        es
    }

    #[test]
    fn test_sum_respects_own_time_cutoffs() {
        let es = parent_child_set();
        let library = PrimitiveLibrary::standard().unwrap();
        let config = PlanConfig::new()
            .with_max_depth(1)
            .with_aggregations(["sum"])
            .with_transforms(Vec::<String>::new());
        let specs = plan(&es, &library, "targets", &config).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name(), "SUM(children.val)");

        let (maps, report) =
            evaluate(&es, &library, &specs, "targets", &EvalOptions::new()).unwrap();
        assert_eq!(report.failures.len(), 0);
        let sums = &maps[0];
        assert_eq!(sums[&Key::from(1)], Value::Int(5));
        assert_eq!(sums[&Key::from(2)], Value::Int(0));
        assert_eq!(sums[&Key::from(3)], Value::Int(0));
    }

    #[test]
    fn test_missing_cutoff_aborts_before_any_feature_work() {
        let es = parent_child_set();
        let library = PrimitiveLibrary::standard().unwrap();
        let specs = plan(&es, &library, "targets", &PlanConfig::new()).unwrap();

        let mut frame = CutoffFrame::new();
        frame.set(1, ts(10));
        frame.set(2, ts(20));
        // row 3 has no cutoff
        let options = EvalOptions::new()
            .with_cutoff(CutoffPolicy::Frame(frame))
            .with_mode(EvalMode::Lenient);
        let err = evaluate(&es, &library, &specs, "targets", &options).unwrap_err();
        assert!(matches!(err, Error::Evaluation(_)));
    }

    #[test]
    fn test_foreign_rooted_spec_rejected() {
        let es = parent_child_set();
        let library = PrimitiveLibrary::standard().unwrap();
        // Defined on the child entity, evaluated against the parent:
        // target row ids must never index the child table
        let foreign = FeatureSpec::Column {
            entity: "children".into(),
            column: "val".into(),
            output: ColumnType::Numeric,
        };

        let err = evaluate(
            &es,
            &library,
            &[foreign.clone()],
            "targets",
            &EvalOptions::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("'children'"));

        let lenient = EvalOptions::new().with_mode(EvalMode::Lenient);
        let (maps, report) = evaluate(&es, &library, &[foreign], "targets", &lenient).unwrap();
        assert_eq!(report.features_computed, 0);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(maps[0][&Key::from(1)], Value::Missing);
    }

    #[test]
    fn test_exclusive_inclusion_drops_boundary_rows() {
        let es = parent_child_set();
        let library = PrimitiveLibrary::standard().unwrap();
        let config = PlanConfig::new()
            .with_max_depth(1)
            .with_aggregations(["count"])
            .with_transforms(Vec::<String>::new());
        let specs = plan(&es, &library, "targets", &config).unwrap();

        let mut frame = CutoffFrame::new();
        frame.set(1, ts(9)); // exactly the first child's stamp
        frame.set(2, ts(9));
        frame.set(3, ts(9));

        let inclusive = EvalOptions::new().with_cutoff(CutoffPolicy::Frame(frame.clone()));
        let (maps, _) = evaluate(&es, &library, &specs, "targets", &inclusive).unwrap();
        assert_eq!(maps[0][&Key::from(1)], Value::Int(1));

        let exclusive = EvalOptions::new()
            .with_cutoff(CutoffPolicy::Frame(frame))
            .with_inclusion(CutoffInclusion::Exclusive);
        let (maps, _) = evaluate(&es, &library, &specs, "targets", &exclusive).unwrap();
        assert_eq!(maps[0][&Key::from(1)], Value::Int(0));
    }
}
