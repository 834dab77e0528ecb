//! ACL evaluator (Core B-2, §4.11): parses the v3/legacy v2 ACL file
//! format, compiles clause lists into a rights-indexed decision
//! structure, and evaluates `check_rights` requests against it.

pub mod compiler;
pub mod evaluator;
pub mod las;
pub mod parser;
pub mod types;

pub use compiler::compile;
pub use evaluator::{CheckRightsOutcome, Evaluator};
pub use parser::{parse_acl_file, ParsedClause};
pub use types::{AclResult, Cachability, Clause, ClauseType, CompiledAclList, Comparator, Expr, ExprNode};
