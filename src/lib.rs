//! # featuretools-rs — Leakage-Safe Feature Synthesis
//!
//! Automated deep feature synthesis over relational data: declare typed
//! entities and their relationships once, get a reproducible feature
//! matrix out, with every value computed strictly from information that
//! existed at each row's cutoff time.
//!
//! ## Design Principles
//!
//! 1. **Typed schema first**: features are enumerated from declared `ColumnType`s, never sniffed from data
//! 2. **Plans are data**: a `FeatureSpec` tree is serializable and carries no engine state
//! 3. **Leakage is structural**: row visibility is decided once per cutoff batch, not per primitive
//! 4. **Planner owns nothing**: planning is a pure function of registry + config
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chrono::{TimeZone, Utc};
//! use featuretools_rs::{
//!     ColumnType, CutoffFrame, CutoffPolicy, EntityDef, EntitySet,
//!     EvalOptions, SynthesisOptions, Table, Value,
//! };
//!
//! # fn example() -> featuretools_rs::Result<()> {
//! // Describe the data
//! let mut customers = Table::new(["id", "region"])?;
//! customers.push_row([Value::Int(1), Value::from("north")])?;
//!
//! let mut orders = Table::new(["id", "customer_id", "amount", "ordered_at"])?;
//! orders.push_row([
//!     Value::Int(10),
//!     Value::Int(1),
//!     Value::Float(25.0),
//!     Value::from(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()),
//! ])?;
//!
//! // Register entities and the parent → child link
//! let mut set = EntitySet::new();
//! set.add_entity(
//!     EntityDef::new("customers", "id")
//!         .with_column("id", ColumnType::Identifier)
//!         .with_column("region", ColumnType::Categorical),
//!     customers,
//! )?;
//! set.add_entity(
//!     EntityDef::new("orders", "id")
//!         .with_time("ordered_at")
//!         .with_column("id", ColumnType::Identifier)
//!         .with_column("customer_id", ColumnType::Identifier)
//!         .with_column("amount", ColumnType::Numeric)
//!         .with_column("ordered_at", ColumnType::Timestamp),
//!     orders,
//! )?;
//! set.add_relationship("customers", "id", "orders", "customer_id")?;
//!
//! // Synthesize as of an explicit cutoff per customer
//! let mut cutoffs = CutoffFrame::new();
//! cutoffs.set(1, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
//! let options = SynthesisOptions::default()
//!     .with_eval(EvalOptions::new().with_cutoff(CutoffPolicy::Frame(cutoffs)));
//!
//! let output = featuretools_rs::synthesize(&set, "customers", &options)?;
//! for name in output.matrix.column_names() {
//!     println!("{name}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline Stages
//!
//! | Stage | Module | Description |
//! |-------|--------|-------------|
//! | Schema registry | `schema` | Typed entities, tables, relationship graph |
//! | Primitive library | `primitive` | Named transform / aggregation building blocks |
//! | Planner | `plan` | Deterministic feature enumeration up to a depth bound |
//! | Evaluator | `eval` | Cutoff-batched, parallel feature computation |
//! | Assembler | `matrix` | Feature matrix, one row per target row |
//! | Encoding & export | `encode`, `export` | One-hot categoricals, CSV / JSON |

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod schema;
pub mod primitive;
pub mod plan;
pub mod eval;
pub mod matrix;
pub mod encode;
pub mod export;

// ============================================================================
// Re-exports: Model (the DTOs)
// ============================================================================

pub use model::{ColumnType, Key, Table, Value};

// ============================================================================
// Re-exports: Schema
// ============================================================================

pub use schema::{EntityDef, EntitySet, Relationship};

// ============================================================================
// Re-exports: Primitives
// ============================================================================

pub use primitive::{Primitive, PrimitiveKind, PrimitiveLibrary};

// ============================================================================
// Re-exports: Planning
// ============================================================================

pub use plan::{
    plan, FeatureSpec, PlanConfig, DEFAULT_AGGREGATIONS, DEFAULT_TRANSFORMS,
};

// ============================================================================
// Re-exports: Evaluation
// ============================================================================

pub use eval::{
    evaluate, CutoffFrame, CutoffInclusion, CutoffPolicy, EvalMode,
    EvalOptions, FeatureFailure, RunReport, ValueMap,
};

// ============================================================================
// Re-exports: Matrix, Encoding
// ============================================================================

pub use encode::{CategoryEncoder, CategoryEncoding};
pub use matrix::{assemble, FeatureMatrix};

// ============================================================================
// Top-level synthesis entry point
// ============================================================================

/// End-to-end run options. `library: None` uses the standard builtins.
#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    pub plan: PlanConfig,
    pub eval: EvalOptions,
    pub library: Option<PrimitiveLibrary>,
}

impl SynthesisOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plan(mut self, config: PlanConfig) -> Self {
        self.plan = config;
        self
    }

    pub fn with_eval(mut self, options: EvalOptions) -> Self {
        self.eval = options;
        self
    }

    pub fn with_library(mut self, library: PrimitiveLibrary) -> Self {
        self.library = Some(library);
        self
    }
}

/// Everything a synthesis run produces: the matrix, the plan that shaped
/// it, and the run report.
#[derive(Debug)]
pub struct SynthesisOutput {
    pub matrix: FeatureMatrix,
    pub specs: Vec<FeatureSpec>,
    pub report: RunReport,
}

/// Plan, evaluate, and assemble in one call.
pub fn synthesize(
    set: &EntitySet,
    target: &str,
    options: &SynthesisOptions,
) -> Result<SynthesisOutput> {
    let fallback;
    let library = match &options.library {
        Some(library) => library,
        None => {
            fallback = PrimitiveLibrary::standard()?;
            &fallback
        }
    };

    // Phase 1: Plan
    let specs = plan::plan(set, library, target, &options.plan)?;

    // Phase 2: Evaluate
    let (maps, report) = eval::evaluate(set, library, &specs, target, &options.eval)?;

    // Phase 3: Assemble
    let matrix = matrix::assemble(set, target, &specs, &maps)?;

    Ok(SynthesisOutput { matrix, specs, report })
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Primitive error: {0}")]
    Primitive(String),

    #[error("Type error: expected {expected}, got {got}")]
    TypeError { expected: String, got: String },

    #[error("Planning error: {0}")]
    Plan(String),

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Assembly error: {0}")]
    Assembly(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
