//! LAS (LDAP Access Syntax) term evaluators (§4.11) and the registry that
//! resolves an attribute name to one at first use.

pub mod dayofweek;
pub mod dns;
pub mod group;
pub mod ip;
pub mod timeofday;
pub mod user;

use once_cell::sync::Lazy;
use std::collections::HashMap;

use crate::acl::types::{Cachability, Comparator};
use crate::common::Plist;
use crate::contracts::{AttributeGetter, PasswordPolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LasOutcome {
    True,
    False,
    Invalid,
    Decline,
    NeedMoreInfo,
}

pub struct LasResult {
    pub outcome: LasOutcome,
    pub cachability: Cachability,
}

impl LasResult {
    pub fn new(outcome: LasOutcome, cachability: Cachability) -> LasResult {
        LasResult { outcome, cachability }
    }
}

/// Evaluation context handed to every LAS: the request's subject/resource
/// plists, the attribute-getter seam used by `group` for `user-ismember`,
/// and the password-policy seam AUTH clauses bind-check against.
pub struct LasContext<'a> {
    pub subject: &'a Plist,
    pub resource: &'a Plist,
    pub attribute_getter: Option<&'a dyn AttributeGetter>,
    pub password_policy: Option<&'a dyn PasswordPolicy>,
}

/// Polymorphic capability set every LAS implements (§9 design notes).
pub trait LasEvaluator: Send + Sync {
    fn evaluate(&self, ctx: &LasContext<'_>, comparator: Comparator, pattern: &str) -> LasResult;
}

pub type LasEvaluatorFn = fn() -> Box<dyn LasEvaluator>;

static REGISTRY: Lazy<HashMap<&'static str, LasEvaluatorFn>> = Lazy::new(|| {
    let mut m: HashMap<&'static str, LasEvaluatorFn> = HashMap::new();
    m.insert("ip", || Box::new(ip::IpEvaluator::default()));
    m.insert("dns", || Box::new(dns::DnsEvaluator));
    m.insert("dnsalias", || Box::new(dns::DnsEvaluator));
    m.insert("timeofday", || Box::new(timeofday::TimeOfDayEvaluator));
    m.insert("dayofweek", || Box::new(dayofweek::DayOfWeekEvaluator));
    m.insert("user", || Box::new(user::UserEvaluator));
    m.insert("group", || Box::new(group::GroupEvaluator::default()));
    m
});

/// Resolves an attribute name to its evaluator, constructing a fresh
/// instance each call. LAS evaluators with their own lazily-built state
/// (e.g. `ip`'s bit-trie) own that state per compiled term instead, via
/// `Clause`/`Expr` — the registry only hands out the evaluation logic.
pub fn lookup(attr: &str) -> Option<Box<dyn LasEvaluator>> {
    REGISTRY.get(attr).map(|ctor| ctor())
}
