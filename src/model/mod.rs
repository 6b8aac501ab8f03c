//! # Data Model
//!
//! Clean DTOs for tabular data. These types cross every boundary:
//! schema ↔ planner ↔ evaluator ↔ user.
//!
//! Design rule: this module is pure data — no I/O, no registry state, no
//! knowledge of cutoff semantics.

pub mod column;
pub mod table;
pub mod value;

pub use column::ColumnType;
pub use table::{Key, Table};
pub use value::Value;
