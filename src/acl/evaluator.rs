//! ACL evaluate phase (§4.11): walks the clauses bucketed under each
//! requested right in ascending sequence order, resolving terms through
//! the LAS registry and applying the documented precedence rules.

use std::collections::HashMap;

use crate::acl::las::{self, LasContext, LasOutcome};
use crate::acl::types::{AclResult, Cachability, Clause, ClauseType, CompiledAclList, Comparator, ExprNode};
use crate::common::{Plist, PlistValue};
use crate::contracts::{AttributeGetter, PasswordPolicy};

#[derive(Debug, Clone)]
pub struct CheckRightsOutcome {
    pub result: AclResult,
    pub deny_type: Option<String>,
    pub deny_msg: Option<String>,
    pub clause_tag: Option<String>,
    pub clause_index: Option<usize>,
    pub cachability: Cachability,
}

/// Per-right tentative state the evaluator accumulates while walking a
/// right's clause sequence.
struct RightState {
    result: AclResult,
    fixed: bool,
    deferred_allow_error: bool,
    deny_type: Option<String>,
    deny_msg: Option<String>,
    clause_tag: Option<String>,
    clause_index: Option<usize>,
}

impl RightState {
    fn new() -> RightState {
        RightState {
            result: AclResult::Deny,
            fixed: false,
            deferred_allow_error: false,
            deny_type: None,
            deny_msg: None,
            clause_tag: None,
            clause_index: None,
        }
    }
}

pub struct Evaluator<'a> {
    subject: Option<Plist>,
    resource: Option<Plist>,
    acl_list: Option<&'a CompiledAclList>,
    attribute_getter: Option<&'a dyn AttributeGetter>,
    password_policy: Option<&'a dyn PasswordPolicy>,
}

impl<'a> Evaluator<'a> {
    pub fn new() -> Evaluator<'a> {
        Evaluator { subject: None, resource: None, acl_list: None, attribute_getter: None, password_policy: None }
    }

    pub fn set_subject(&mut self, plist: Plist) {
        self.subject = Some(plist);
    }

    pub fn set_resource(&mut self, plist: Plist) {
        self.resource = Some(plist);
    }

    pub fn set_acl_list(&mut self, list: &'a CompiledAclList) {
        self.acl_list = Some(list);
    }

    pub fn set_attribute_getter(&mut self, getter: &'a dyn AttributeGetter) {
        self.attribute_getter = Some(getter);
    }

    pub fn set_password_policy(&mut self, policy: &'a dyn PasswordPolicy) {
        self.password_policy = Some(policy);
    }

    /// Evaluates `rights` against the compiled list currently set, merging
    /// each right's own clause bucket with buckets of any right it maps to
    /// generically (`generic_map`, e.g. `http_get` implying `read`).
    pub fn check_rights(&self, rights: &[&str], generic_map: &HashMap<&str, Vec<&str>>) -> CheckRightsOutcome {
        let (Some(subject), Some(resource), Some(acl_list)) = (&self.subject, &self.resource, self.acl_list) else {
            return CheckRightsOutcome {
                result: AclResult::Fail,
                deny_type: None,
                deny_msg: None,
                clause_tag: None,
                clause_index: None,
                cachability: Cachability::NotCachable,
            };
        };

        let ctx = LasContext {
            subject,
            resource,
            attribute_getter: self.attribute_getter,
            password_policy: self.password_policy,
        };
        let mut overall_cachability = Cachability::IndefCachable;
        let mut overall = CheckRightsOutcome {
            result: AclResult::Allow,
            deny_type: None,
            deny_msg: None,
            clause_tag: None,
            clause_index: None,
            cachability: Cachability::IndefCachable,
        };

        for &right in rights {
            let mut sequences: Vec<usize> = acl_list.by_right.get(right).cloned().unwrap_or_default();
            if let Some(generics) = generic_map.get(right) {
                for g in generics {
                    if let Some(extra) = acl_list.by_right.get(*g) {
                        sequences.extend(extra.iter().copied());
                    }
                }
            }
            sequences.sort_unstable();
            sequences.dedup();

            let outcome = evaluate_right(acl_list, &sequences, &ctx);
            overall_cachability = overall_cachability.min(outcome.1);

            if outcome.0.result != AclResult::Allow {
                return CheckRightsOutcome { cachability: overall_cachability, ..outcome.0 };
            }
        }

        overall.cachability = overall_cachability;
        overall
    }
}

impl<'a> Default for Evaluator<'a> {
    fn default() -> Evaluator<'a> {
        Evaluator::new()
    }
}

fn evaluate_right(acl_list: &CompiledAclList, sequences: &[usize], ctx: &LasContext<'_>) -> (CheckRightsOutcome, Cachability) {
    let mut state = RightState::new();
    let mut cachability = Cachability::IndefCachable;

    for &seq in sequences {
        let clause = &acl_list.clauses[seq];
        if clause.clause_type == ClauseType::Auth {
            let (truth, term_cachability) = eval_auth_clause(clause, ctx);
            cachability = cachability.min(term_cachability);
            if !matches!(truth, TermResult::True) {
                // An unmet AUTH requirement (wrong dbname, failed bind
                // check) fails the whole right the way a matching DENY
                // would, rather than letting a later ALLOW paper over it.
                state.result = AclResult::Fail;
                state.fixed = true;
                attribute_response(&mut state, clause);
                break;
            }
            continue;
        }

        let (truth, term_cachability) = eval_expr(clause, ctx);
        cachability = cachability.min(term_cachability);

        match truth {
            TermResult::Invalid => {
                apply_error(&mut state, clause, AclResult::Invalid);
                if clause.clause_type == ClauseType::Deny {
                    break;
                }
            }
            TermResult::Decline => {
                apply_error(&mut state, clause, AclResult::Fail);
                if clause.clause_type == ClauseType::Deny {
                    break;
                }
            }
            TermResult::True => match clause.clause_type {
                ClauseType::Deny => {
                    state.result = AclResult::Deny;
                    state.fixed = true;
                    state.deferred_allow_error = false;
                    attribute_response(&mut state, clause);
                    break;
                }
                ClauseType::Allow => {
                    if !state.fixed {
                        state.result = AclResult::Allow;
                        state.deferred_allow_error = false;
                        state.clause_tag = Some(clause.tag.clone());
                        state.clause_index = Some(clause.sequence);
                        if clause.absolute {
                            state.fixed = true;
                            break;
                        }
                    }
                }
                _ => {}
            },
            TermResult::False => {}
        }
    }

    // `state.result` already holds the error code when `deferred_allow_error`
    // is still set at the end of the walk: no later non-absolute ALLOW
    // cleared it, so the deferred error stands.
    let result = state.result;

    (
        CheckRightsOutcome {
            result,
            deny_type: state.deny_type,
            deny_msg: state.deny_msg,
            clause_tag: state.clause_tag,
            clause_index: state.clause_index,
            cachability,
        },
        cachability,
    )
}

fn apply_error(state: &mut RightState, clause: &Clause, kind: AclResult) {
    match clause.clause_type {
        ClauseType::Deny => {
            state.result = kind;
            state.fixed = true;
            attribute_response(state, clause);
        }
        ClauseType::Allow => {
            state.deferred_allow_error = true;
            state.result = kind;
            attribute_response(state, clause);
        }
        _ => {}
    }
}

fn attribute_response(state: &mut RightState, clause: &Clause) {
    state.clause_tag = Some(clause.tag.clone());
    state.clause_index = Some(clause.sequence);
    state.deny_type = clause.deny_type.clone();
    state.deny_msg = clause.deny_message.clone();
}

enum TermResult {
    True,
    False,
    Invalid,
    Decline,
}

fn eval_expr(clause: &Clause, ctx: &LasContext<'_>) -> (TermResult, Cachability) {
    eval_node(&clause.expr.nodes, clause.expr.root, ctx)
}

fn eval_node(nodes: &[ExprNode], index: usize, ctx: &LasContext<'_>) -> (TermResult, Cachability) {
    match &nodes[index] {
        ExprNode::Term { attr, comparator, value } => eval_term(attr, *comparator, value, ctx),
        ExprNode::Not(child) => {
            let (truth, cachability) = eval_node(nodes, *child, ctx);
            let negated = match truth {
                TermResult::True => TermResult::False,
                TermResult::False => TermResult::True,
                other => other,
            };
            (negated, cachability)
        }
        ExprNode::And(lhs, rhs) => {
            let (left, lc) = eval_node(nodes, *lhs, ctx);
            match left {
                TermResult::False => (TermResult::False, lc),
                TermResult::Invalid | TermResult::Decline => (left, lc),
                TermResult::True => {
                    let (right, rc) = eval_node(nodes, *rhs, ctx);
                    (right, lc.min(rc))
                }
            }
        }
        ExprNode::Or(lhs, rhs) => {
            let (left, lc) = eval_node(nodes, *lhs, ctx);
            match left {
                TermResult::True => (TermResult::True, lc),
                TermResult::Invalid | TermResult::Decline => (left, lc),
                TermResult::False => {
                    let (right, rc) = eval_node(nodes, *rhs, ctx);
                    (right, lc.min(rc))
                }
            }
        }
    }
}

/// Checks an AUTH clause's snapshotted requirements (`dbname`, `authmethod`)
/// against the request. A `dbname` mismatch fails closed without consulting
/// the password policy; `authmethod = "simple"` additionally requires a
/// successful bind-password check.
fn eval_auth_clause(clause: &Clause, ctx: &LasContext<'_>) -> (TermResult, Cachability) {
    let Some(requirements) = &clause.auth_requirements else {
        return (TermResult::True, Cachability::IndefCachable);
    };

    if let Some(dbname) = requirements.get_str("dbname") {
        let resource_db = ctx.resource.get_str("dbname").unwrap_or("");
        if resource_db != dbname {
            return (TermResult::False, Cachability::NotCachable);
        }
    }

    if requirements.get_str("authmethod") == Some("simple") {
        let Some(policy) = ctx.password_policy else {
            return (TermResult::Decline, Cachability::NotCachable);
        };
        let Some(subject_dn) = ctx.subject.get_str("user") else {
            return (TermResult::Invalid, Cachability::NotCachable);
        };
        let password = match ctx.subject.get("password") {
            Some(PlistValue::Bytes(b)) => b.clone(),
            Some(PlistValue::Str(s)) => s.clone().into_bytes(),
            _ => return (TermResult::Decline, Cachability::NotCachable),
        };
        if !policy.validate_bind_password(subject_dn, &password) {
            return (TermResult::False, Cachability::NotCachable);
        }
    }

    (TermResult::True, Cachability::NotCachable)
}

fn eval_term(attr: &str, comparator: Comparator, value: &str, ctx: &LasContext<'_>) -> (TermResult, Cachability) {
    let Some(evaluator) = las::lookup(attr) else {
        return (TermResult::Invalid, Cachability::NotCachable);
    };
    let result = evaluator.evaluate(ctx, comparator, value);
    let truth = match result.outcome {
        LasOutcome::True => TermResult::True,
        LasOutcome::False => TermResult::False,
        LasOutcome::Invalid => TermResult::Invalid,
        LasOutcome::Decline => TermResult::Decline,
        LasOutcome::NeedMoreInfo => TermResult::False,
    };
    (truth, result.cachability)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::compiler::compile;
    use crate::acl::parser::parse_acl_file;

    fn plist_with(attr: &str, value: &str) -> Plist {
        let mut p = Plist::new();
        p.set(attr, value);
        p
    }

    #[test]
    fn simple_allow_grants_the_right() {
        let src = r#"
            version 3.0;
            acl "t";
            allow (read) user = "anyone";
        "#;
        let compiled = compile(parse_acl_file(src).unwrap());
        let mut eval = Evaluator::new();
        eval.set_subject(plist_with("user", "uid=alice,dc=example,dc=com"));
        eval.set_resource(Plist::new());
        eval.set_acl_list(&compiled);
        let outcome = eval.check_rights(&["read"], &HashMap::new());
        assert_eq!(outcome.result, AclResult::Allow);
    }

    #[test]
    fn deny_beats_earlier_allow() {
        let src = r#"
            version 3.0;
            acl "t";
            allow (read) user = "anyone";
            deny (read) user = "uid=bob,dc=example,dc=com";
        "#;
        let compiled = compile(parse_acl_file(src).unwrap());
        let mut eval = Evaluator::new();
        eval.set_subject(plist_with("user", "uid=bob,dc=example,dc=com"));
        eval.set_resource(Plist::new());
        eval.set_acl_list(&compiled);
        let outcome = eval.check_rights(&["read"], &HashMap::new());
        assert_eq!(outcome.result, AclResult::Deny);
    }

    #[test]
    fn absolute_allow_short_circuits_later_deny() {
        let src = r#"
            version 3.0;
            acl "t";
            allow absolute (read) user = "uid=alice,dc=example,dc=com";
            deny (read) user = "uid=alice,dc=example,dc=com";
        "#;
        let compiled = compile(parse_acl_file(src).unwrap());
        let mut eval = Evaluator::new();
        eval.set_subject(plist_with("user", "uid=alice,dc=example,dc=com"));
        eval.set_resource(Plist::new());
        eval.set_acl_list(&compiled);
        let outcome = eval.check_rights(&["read"], &HashMap::new());
        assert_eq!(outcome.result, AclResult::Allow);
    }

    #[test]
    fn no_matching_clause_defaults_to_deny() {
        let src = r#"
            version 3.0;
            acl "t";
            allow (read) user = "uid=alice,dc=example,dc=com";
        "#;
        let compiled = compile(parse_acl_file(src).unwrap());
        let mut eval = Evaluator::new();
        eval.set_subject(plist_with("user", "uid=carol,dc=example,dc=com"));
        eval.set_resource(Plist::new());
        eval.set_acl_list(&compiled);
        let outcome = eval.check_rights(&["read"], &HashMap::new());
        assert_eq!(outcome.result, AclResult::Deny);
    }

    #[test]
    fn adding_trailing_allow_never_turns_existing_allow_into_deny() {
        let base_src = r#"
            version 3.0;
            acl "t";
            allow (read) user = "anyone";
        "#;
        let extended_src = r#"
            version 3.0;
            acl "t";
            allow (read) user = "anyone";
            allow (read) user = "uid=late,dc=example,dc=com";
        "#;
        let subject = plist_with("user", "uid=alice,dc=example,dc=com");

        let compiled_base = compile(parse_acl_file(base_src).unwrap());
        let mut eval = Evaluator::new();
        eval.set_subject(subject.clone());
        eval.set_resource(Plist::new());
        eval.set_acl_list(&compiled_base);
        assert_eq!(eval.check_rights(&["read"], &HashMap::new()).result, AclResult::Allow);

        let compiled_extended = compile(parse_acl_file(extended_src).unwrap());
        let mut eval2 = Evaluator::new();
        eval2.set_subject(subject);
        eval2.set_resource(Plist::new());
        eval2.set_acl_list(&compiled_extended);
        assert_eq!(eval2.check_rights(&["read"], &HashMap::new()).result, AclResult::Allow);
    }

    struct FixedPasswordPolicy(bool);

    impl crate::contracts::PasswordPolicy for FixedPasswordPolicy {
        fn validate_bind_password(&self, _dn: &str, _password: &[u8]) -> bool {
            self.0
        }
    }

    #[test]
    fn auth_clause_with_failed_bind_fails_the_right() {
        let src = r#"
            version 3.0;
            acl "t";
            authenticate (read) { authmethod = "simple"; };
            allow (read) user = "anyone";
        "#;
        let compiled = compile(parse_acl_file(src).unwrap());
        let mut subject = plist_with("user", "uid=alice,dc=example,dc=com");
        subject.set("password", "wrong");
        let policy = FixedPasswordPolicy(false);

        let mut eval = Evaluator::new();
        eval.set_subject(subject);
        eval.set_resource(Plist::new());
        eval.set_acl_list(&compiled);
        eval.set_password_policy(&policy);
        let outcome = eval.check_rights(&["read"], &HashMap::new());
        assert_eq!(outcome.result, AclResult::Fail);
    }

    #[test]
    fn auth_clause_with_successful_bind_lets_allow_through() {
        let src = r#"
            version 3.0;
            acl "t";
            authenticate (read) { authmethod = "simple"; };
            allow (read) user = "anyone";
        "#;
        let compiled = compile(parse_acl_file(src).unwrap());
        let mut subject = plist_with("user", "uid=alice,dc=example,dc=com");
        subject.set("password", "right");
        let policy = FixedPasswordPolicy(true);

        let mut eval = Evaluator::new();
        eval.set_subject(subject);
        eval.set_resource(Plist::new());
        eval.set_acl_list(&compiled);
        eval.set_password_policy(&policy);
        let outcome = eval.check_rights(&["read"], &HashMap::new());
        assert_eq!(outcome.result, AclResult::Allow);
    }

    #[test]
    fn auth_clause_dbname_mismatch_fails_without_consulting_policy() {
        let src = r#"
            version 3.0;
            acl "t";
            authenticate (read) { dbname = "userroot"; };
            allow (read) user = "anyone";
        "#;
        let compiled = compile(parse_acl_file(src).unwrap());
        let subject = plist_with("user", "uid=alice,dc=example,dc=com");
        let mut resource = Plist::new();
        resource.set("dbname", "other");

        let mut eval = Evaluator::new();
        eval.set_subject(subject);
        eval.set_resource(resource);
        eval.set_acl_list(&compiled);
        let outcome = eval.check_rights(&["read"], &HashMap::new());
        assert_eq!(outcome.result, AclResult::Fail);
    }
}
