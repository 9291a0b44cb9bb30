//! `macrosift-model` holds the dynamic value model shared by the macrosift
//! emulation engine, together with the VBA coercion and operator semantics
//! that sit underneath expression evaluation.
//!
//! VBA is loosely typed and the implicit conversions it applies are driven by
//! the *left* operand of an expression (`1 + "3"` is `4`, `"1" + 3` is
//! `"13"`). Obfuscated macros lean on these quirks, so the functions in
//! [`ops`] and [`coerce`] reproduce them rather than anything saner.

mod value;

pub mod coerce;
pub mod ops;

pub use crate::value::{Value, CURRENT_FILE_NAME, MATCH_ANY, SOME_FILE_NAME, WILDCARDS};
