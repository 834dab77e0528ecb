//! `dns`/`dnsalias` LAS (§4.11): dotted-label hostname match with
//! leading-`.` wildcards.

use crate::acl::types::{Cachability, Comparator};
use crate::common::PlistValue;

use super::{LasContext, LasEvaluator, LasOutcome, LasResult};

pub struct DnsEvaluator;

fn matches(hostname: &str, pattern: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix('.') {
        hostname.eq_ignore_ascii_case(suffix) || hostname.to_ascii_lowercase().ends_with(&format!(".{}", suffix.to_ascii_lowercase()))
    } else {
        hostname.eq_ignore_ascii_case(pattern)
    }
}

impl LasEvaluator for DnsEvaluator {
    fn evaluate(&self, ctx: &LasContext<'_>, comparator: Comparator, pattern: &str) -> LasResult {
        let Some(PlistValue::Str(hostname)) = ctx.subject.get("dns") else {
            return LasResult::new(LasOutcome::NeedMoreInfo, Cachability::NotCachable);
        };
        let truth = matches(hostname, pattern);
        let truth = match comparator {
            Comparator::Eq => truth,
            Comparator::Ne => !truth,
            _ => return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable),
        };
        let outcome = if truth { LasOutcome::True } else { LasOutcome::False };
        LasResult::new(outcome, Cachability::SessionCachable)
    }
}
