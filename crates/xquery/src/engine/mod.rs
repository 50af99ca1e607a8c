//! Evaluation: the IR interpreter and the operations it is built from.

pub mod arith;
pub mod axes;
pub mod casting;
pub mod collation;
pub mod compare;
pub mod construct;
pub mod deep_equal;
pub mod evaluator;
pub mod fulltext;
pub mod functions;
pub mod sequence;
pub mod update;
