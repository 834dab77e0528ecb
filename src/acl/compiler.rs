//! ACL compile phase (§4.11 step 1-4): assigns declaration-order sequence
//! numbers, buckets ALLOW/DENY clauses by right name, and snapshots AUTH
//! requirements onto the clauses that follow them.

use std::collections::HashMap;

use crate::acl::parser::ParsedClause;
use crate::acl::types::{Clause, ClauseType, CompiledAclList};
use crate::common::Plist;

/// Compiles a parsed clause list into the rights-indexed structure the
/// evaluator walks. Mirrors the donor's "compile under a crit section,
/// evaluate lock-free" split: this function takes no lock itself — the
/// caller (holding `acl_crit`) is responsible for serializing compiles of
/// the same named list.
pub fn compile(parsed: Vec<ParsedClause>) -> CompiledAclList {
    let mut clauses = Vec::with_capacity(parsed.len());
    let mut by_right: HashMap<String, Vec<usize>> = HashMap::new();
    let mut running_auth = Plist::new();
    let mut absolute_auth = Plist::new();
    let mut deny_type: Option<String> = None;
    let mut deny_message: Option<String> = None;

    for p in parsed {
        let sequence = clauses.len();

        match p.clause_type {
            ClauseType::Allow | ClauseType::Deny | ClauseType::Auth => {
                for right in &p.rights {
                    by_right.entry(right.clone()).or_default().push(sequence);
                }
            }
            _ => {}
        }

        match p.clause_type {
            ClauseType::Auth => {
                if let Some(requirements) = &p.auth_requirements {
                    for (name, value) in requirements.iter() {
                        if p.absolute {
                            absolute_auth.set(name.clone(), value.clone());
                        }
                        if absolute_auth.get(name).is_none() {
                            running_auth.set(name.clone(), value.clone());
                        }
                    }
                }
            }
            ClauseType::Response => {
                if let Some(requirements) = &p.auth_requirements {
                    deny_type = requirements.get_str("deny_type").map(str::to_string);
                    deny_message = requirements.get_str("deny_message").map(str::to_string);
                }
            }
            ClauseType::Allow | ClauseType::Deny => {}
        }

        let mut clause = Clause::new(p.clause_type, p.tag, sequence, p.rights, p.expr);
        clause.absolute = p.absolute;
        clause.auth_requirements = match p.clause_type {
            ClauseType::Auth => Some(running_auth.duplicate()),
            _ => None,
        };
        if p.clause_type == ClauseType::Response {
            clause.deny_type = deny_type.clone();
            clause.deny_message = deny_message.clone();
        }
        clauses.push(clause);
    }

    CompiledAclList { clauses, by_right }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::parser::parse_acl_file;

    #[test]
    fn buckets_allow_deny_clauses_by_right() {
        let src = r#"
            version 3.0;
            acl "combo";
            allow (read, search) user = "anyone";
            deny (write) user = "guest";
        "#;
        let parsed = parse_acl_file(src).unwrap();
        let compiled = compile(parsed);
        assert_eq!(compiled.by_right["read"], vec![0]);
        assert_eq!(compiled.by_right["search"], vec![0]);
        assert_eq!(compiled.by_right["write"], vec![1]);
    }

    #[test]
    fn auth_clause_snapshots_running_plist_per_clause() {
        let src = r#"
            version 3.0;
            acl "auth";
            authenticate (read) { authmethod = "simple"; };
            authenticate (search) { dbname = "default"; };
        "#;
        let parsed = parse_acl_file(src).unwrap();
        let compiled = compile(parsed);
        let first = compiled.clauses[0].auth_requirements.as_ref().unwrap();
        assert_eq!(first.get_str("authmethod"), Some("simple"));
        assert!(first.get_str("dbname").is_none());

        let second = compiled.clauses[1].auth_requirements.as_ref().unwrap();
        assert_eq!(second.get_str("authmethod"), Some("simple"));
        assert_eq!(second.get_str("dbname"), Some("default"));
    }
}
