//! # Feature Synthesis Planner
//!
//! Enumerates every realizable feature for a target entity, breadth-first
//! by composition depth: raw columns at depth zero, then per depth-level
//! transform applications followed by aggregations over relationship
//! paths. The output order is fully determined by column declaration
//! order, primitive selection order, and relationship registration order,
//! so two runs over the same registry produce byte-identical plans.
//!
//! Degenerate features are suppressed by typing: identifier columns
//! (indexes and foreign keys) and declared time columns never enter a
//! base feature set, so no plan aggregates a join key or transforms the
//! leakage clock. Row counting still works — identifier-input
//! aggregations are fed the descendant's index column structurally.

pub mod spec;

use std::sync::Arc;

use hashbrown::HashMap;
use tracing::debug;

use crate::model::ColumnType;
use crate::primitive::{Primitive, PrimitiveKind, PrimitiveLibrary};
use crate::schema::{EntitySet, Relationship};
use crate::{Error, Result};

pub use spec::FeatureSpec;

/// Aggregations used when the caller doesn't pick their own.
pub const DEFAULT_AGGREGATIONS: &[&str] = &["COUNT", "SUM", "MEAN", "MIN", "MAX"];

/// Transforms used when the caller doesn't pick their own.
pub const DEFAULT_TRANSFORMS: &[&str] = &["YEAR", "MONTH", "WEEKDAY"];

// ============================================================================
// Configuration
// ============================================================================

/// Planning request: depth bound, target columns to omit, and which
/// library primitives to compose. `None` selections fall back to the
/// defaults above (names absent from the library are skipped; explicitly
/// selected names must exist).
#[derive(Debug, Clone)]
pub struct PlanConfig {
    pub max_depth: usize,
    pub excluded_columns: Vec<String>,
    pub transforms: Option<Vec<String>>,
    pub aggregations: Option<Vec<String>>,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            max_depth: 2,
            excluded_columns: Vec::new(),
            transforms: None,
            aggregations: None,
        }
    }
}

impl PlanConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_excluded<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_transforms<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transforms = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_aggregations<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aggregations = Some(names.into_iter().map(Into::into).collect());
        self
    }
}

// ============================================================================
// Entry point
// ============================================================================

/// Plan the full feature set for `target`.
///
/// Fails with `Error::Plan` if the target is unregistered, an excluded
/// column doesn't exist on it, or an explicitly selected primitive is
/// absent from the library.
pub fn plan(
    set: &EntitySet,
    library: &PrimitiveLibrary,
    target: &str,
    config: &PlanConfig,
) -> Result<Vec<FeatureSpec>> {
    Planner::new(set, library, config)?.features_for(target)
}

// ============================================================================
// Planner
// ============================================================================

struct Planner<'a> {
    set: &'a EntitySet,
    transforms: Vec<Arc<Primitive>>,
    aggregations: Vec<Arc<Primitive>>,
    excluded: Vec<String>,
    max_depth: usize,
    /// Per-entity feature sets for descendants, built once and shared by
    /// every relationship path that reaches the entity.
    memo: HashMap<String, Vec<FeatureSpec>>,
}

impl<'a> Planner<'a> {
    fn new(set: &'a EntitySet, library: &'a PrimitiveLibrary, config: &PlanConfig) -> Result<Self> {
        Ok(Self {
            set,
            transforms: resolve_selection(
                library,
                PrimitiveKind::Transform,
                config.transforms.as_deref(),
                DEFAULT_TRANSFORMS,
            )?,
            aggregations: resolve_selection(
                library,
                PrimitiveKind::Aggregation,
                config.aggregations.as_deref(),
                DEFAULT_AGGREGATIONS,
            )?,
            excluded: config.excluded_columns.clone(),
            max_depth: config.max_depth,
            memo: HashMap::new(),
        })
    }

    fn features_for(mut self, target: &str) -> Result<Vec<FeatureSpec>> {
        let def = self
            .set
            .entity(target)
            .ok_or_else(|| Error::Plan(format!("target entity '{target}' is not registered")))?;
        for column in &self.excluded {
            if !def.has_column(column) {
                return Err(Error::Plan(format!(
                    "excluded column '{column}' does not exist on entity '{target}'"
                )));
            }
        }

        // Descendant feature sets first, deepest entities inward.
        let children: Vec<Relationship> = self.set.relationships_from(target).cloned().collect();
        for rel in &children {
            self.memoize(&rel.child)?;
        }

        let excluded = std::mem::take(&mut self.excluded);
        let specs = self.build(target, self.max_depth, &excluded)?;
        debug!(entity = %target, features = specs.len(), depth = self.max_depth, "planned");
        Ok(specs)
    }

    /// Build and cache the feature set of a descendant entity. Descendant
    /// sets carry no exclusions and get one less depth level than the
    /// target, since reaching them costs at least one hop.
    fn memoize(&mut self, entity: &str) -> Result<()> {
        if self.memo.contains_key(entity) {
            return Ok(());
        }
        let children: Vec<Relationship> = self.set.relationships_from(entity).cloned().collect();
        for rel in &children {
            self.memoize(&rel.child)?;
        }
        let specs = self.build(entity, self.max_depth.saturating_sub(1), &[])?;
        self.memo.insert(entity.to_owned(), specs);
        Ok(())
    }

    /// Layered enumeration for one entity: depth 0 is its raw columns,
    /// each later layer holds exactly the specs of that depth.
    fn build(&self, entity: &str, budget: usize, excluded: &[String]) -> Result<Vec<FeatureSpec>> {
        let def = self
            .set
            .entity(entity)
            .ok_or_else(|| Error::Plan(format!("entity '{entity}' is not registered")))?;

        let mut out: Vec<FeatureSpec> = Vec::new();
        let mut names: HashMap<String, usize> = HashMap::new();

        for (column, ty) in def.columns() {
            if *ty == ColumnType::Identifier
                || def.time_index() == Some(column.as_str())
                || excluded.iter().any(|e| e == column)
            {
                continue;
            }
            push_unique(
                &mut out,
                &mut names,
                FeatureSpec::Column {
                    entity: entity.to_owned(),
                    column: column.clone(),
                    output: *ty,
                },
            )?;
        }
        if budget == 0 {
            return Ok(out);
        }

        let paths = self.paths_from(entity, budget);

        for depth in 1..=budget {
            let mut layer: Vec<FeatureSpec> = Vec::new();

            // Row-wise compositions within the entity
            for primitive in &self.transforms {
                for inputs in input_combos(
                    &out,
                    primitive.input_types(),
                    depth - 1,
                    primitive.is_commutative(),
                ) {
                    layer.push(FeatureSpec::Transform {
                        primitive: primitive.name().to_owned(),
                        entity: entity.to_owned(),
                        inputs,
                        output: primitive.output(),
                    });
                }
            }

            // Folds over every reachable descendant
            for (path, leaf) in &paths {
                if path.len() > depth {
                    continue;
                }
                let need = depth - path.len();
                let leaf_def = self
                    .set
                    .entity(leaf)
                    .ok_or_else(|| Error::Plan(format!("entity '{leaf}' is not registered")))?;
                let pool = self
                    .memo
                    .get(leaf)
                    .ok_or_else(|| Error::Plan(format!("entity '{leaf}' has no feature set")))?;

                for primitive in &self.aggregations {
                    let [want] = primitive.input_types() else {
                        // Multi-input aggregations are registrable but not
                        // composed automatically.
                        continue;
                    };
                    if *want == ColumnType::Identifier {
                        if need == 0 {
                            layer.push(FeatureSpec::Aggregation {
                                primitive: primitive.name().to_owned(),
                                entity: entity.to_owned(),
                                path: path.clone(),
                                input: Box::new(FeatureSpec::Column {
                                    entity: leaf.clone(),
                                    column: leaf_def.index().to_owned(),
                                    output: ColumnType::Identifier,
                                }),
                                output: primitive.output(),
                            });
                        }
                        continue;
                    }
                    for candidate in pool
                        .iter()
                        .filter(|s| s.depth() == need && s.output() == *want)
                    {
                        layer.push(FeatureSpec::Aggregation {
                            primitive: primitive.name().to_owned(),
                            entity: entity.to_owned(),
                            path: path.clone(),
                            input: Box::new(candidate.clone()),
                            output: primitive.output(),
                        });
                    }
                }
            }

            for spec in layer {
                push_unique(&mut out, &mut names, spec)?;
            }
        }
        Ok(out)
    }

    /// Every relationship path rooted at `entity`, shortest first, each
    /// with its leaf entity. The registry is acyclic so enumeration
    /// terminates without visited-tracking.
    fn paths_from(&self, entity: &str, max_len: usize) -> Vec<(Vec<Relationship>, String)> {
        let mut all: Vec<(Vec<Relationship>, String)> = Vec::new();
        let mut frontier: Vec<(Vec<Relationship>, String)> =
            vec![(Vec::new(), entity.to_owned())];
        for _ in 0..max_len {
            let mut next: Vec<(Vec<Relationship>, String)> = Vec::new();
            for (path, leaf) in &frontier {
                for rel in self.set.relationships_from(leaf) {
                    let mut extended = path.clone();
                    extended.push(rel.clone());
                    next.push((extended, rel.child.clone()));
                }
            }
            if next.is_empty() {
                break;
            }
            all.extend(next.iter().cloned());
            frontier = next;
        }
        all
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn resolve_selection(
    library: &PrimitiveLibrary,
    kind: PrimitiveKind,
    names: Option<&[String]>,
    defaults: &[&str],
) -> Result<Vec<Arc<Primitive>>> {
    let mut out = Vec::new();
    match names {
        Some(list) => {
            for name in list {
                let primitive = library.get(kind, name).ok_or_else(|| {
                    Error::Plan(format!("unknown {kind} primitive '{name}'"))
                })?;
                out.push(Arc::clone(primitive));
            }
        }
        None => {
            for name in defaults {
                if let Some(primitive) = library.get(kind, name) {
                    out.push(Arc::clone(primitive));
                }
            }
        }
    }
    Ok(out)
}

/// Input tuples drawn from `pool`, matching `types` slot by slot, where
/// the deepest member sits exactly at `top_depth` (keeps each
/// composition in its own layer) and no spec repeats within a tuple.
/// Commutative primitives get unordered sets (ascending pool order),
/// everything else gets every argument permutation.
fn input_combos(
    pool: &[FeatureSpec],
    types: &[ColumnType],
    top_depth: usize,
    commutative: bool,
) -> Vec<Vec<FeatureSpec>> {
    let mut combos = Vec::new();
    let mut current: Vec<usize> = Vec::with_capacity(types.len());
    fill_combos(pool, types, top_depth, commutative, &mut current, &mut combos);
    combos
}

fn fill_combos(
    pool: &[FeatureSpec],
    types: &[ColumnType],
    top_depth: usize,
    commutative: bool,
    current: &mut Vec<usize>,
    out: &mut Vec<Vec<FeatureSpec>>,
) {
    if current.len() == types.len() {
        if current.iter().any(|&i| pool[i].depth() == top_depth) {
            out.push(current.iter().map(|&i| pool[i].clone()).collect());
        }
        return;
    }
    let want = types[current.len()];
    let start = if commutative {
        current.last().map_or(0, |&i| i + 1)
    } else {
        0
    };
    for (index, candidate) in pool.iter().enumerate().skip(start) {
        if candidate.output() != want
            || candidate.depth() > top_depth
            || current.contains(&index)
        {
            continue;
        }
        current.push(index);
        fill_combos(pool, types, top_depth, commutative, current, out);
        current.pop();
    }
}

fn push_unique(
    out: &mut Vec<FeatureSpec>,
    names: &mut HashMap<String, usize>,
    spec: FeatureSpec,
) -> Result<()> {
    let name = spec.name();
    if let Some(&existing) = names.get(&name) {
        if out[existing] != spec {
            return Err(Error::Plan(format!("feature name '{name}' is ambiguous")));
        }
        return Ok(());
    }
    names.insert(name, out.len());
    out.push(spec);
    Ok(())
}
