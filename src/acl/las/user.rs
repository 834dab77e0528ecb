//! `user` LAS (§4.11): `anyone`/`all` wildcards, `self`/`owner` against the
//! resource's owning DN, or a literal/comma-separated list of subject DNs.

use crate::acl::types::{Cachability, Comparator};
use crate::common::PlistValue;

use super::{LasContext, LasEvaluator, LasOutcome, LasResult};

pub struct UserEvaluator;

fn dn_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

impl LasEvaluator for UserEvaluator {
    fn evaluate(&self, ctx: &LasContext<'_>, comparator: Comparator, pattern: &str) -> LasResult {
        let Some(PlistValue::Str(subject_dn)) = ctx.subject.get("user") else {
            return LasResult::new(LasOutcome::NeedMoreInfo, Cachability::NotCachable);
        };

        let mut matched = false;
        for token in pattern.split(',') {
            let token = token.trim();
            matched = matched
                || match token {
                    "anyone" | "all" => true,
                    "self" | "owner" => ctx
                        .resource
                        .get("owner_dn")
                        .and_then(PlistValue::as_str)
                        .is_some_and(|owner| dn_eq(owner, subject_dn)),
                    literal => dn_eq(literal, subject_dn),
                };
            if matched {
                break;
            }
        }

        let truth = match comparator {
            Comparator::Eq => matched,
            Comparator::Ne => !matched,
            _ => return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable),
        };
        let outcome = if truth { LasOutcome::True } else { LasOutcome::False };
        LasResult::new(outcome, Cachability::SessionCachable)
    }
}
