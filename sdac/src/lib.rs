//! C6 — state-dependent action cost: a unified infix/prefix cost-expression
//! grammar ([`expr`]), folded into an ADD and split into constant-cost
//! facets ([`fold`]).

pub mod expr;
pub mod fold;

pub use expr::{parse_infix, parse_prefix, BinOp, CostExpr, CostParseError, ParseResult};
pub use fold::{fold as fold_expr, level_set_bdd, split_facets, terminal_set, var_value_add, var_value_add_for, Facet, SdacError, SdacResult, INFINITE_HIGH, INFINITE_LOW};
