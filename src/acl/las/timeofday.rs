//! `timeofday` LAS (§4.11): `HHMM` or `HHMM-HHMM` ranges, with range
//! comparisons wrapping past midnight.

use crate::acl::types::{Cachability, Comparator};
use crate::common::PlistValue;

use super::{LasContext, LasEvaluator, LasOutcome, LasResult};

pub struct TimeOfDayEvaluator;

fn parse_hhmm(s: &str) -> Option<u32> {
    if s.len() != 4 {
        return None;
    }
    let hh: u32 = s[0..2].parse().ok()?;
    let mm: u32 = s[2..4].parse().ok()?;
    if hh > 23 || mm > 59 {
        return None;
    }
    Some(hh * 60 + mm)
}

fn in_range(now: u32, start: u32, end: u32) -> bool {
    if start <= end {
        now >= start && now <= end
    } else {
        // Range wraps midnight.
        now >= start || now <= end
    }
}

impl LasEvaluator for TimeOfDayEvaluator {
    fn evaluate(&self, ctx: &LasContext<'_>, comparator: Comparator, pattern: &str) -> LasResult {
        let Some(PlistValue::Str(now_str)) = ctx.subject.get("timeofday") else {
            return LasResult::new(LasOutcome::NeedMoreInfo, Cachability::NotCachable);
        };
        let Some(now) = parse_hhmm(now_str) else {
            return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable);
        };

        let truth = if let Some((start_s, end_s)) = pattern.split_once('-') {
            let (Some(start), Some(end)) = (parse_hhmm(start_s), parse_hhmm(end_s)) else {
                return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable);
            };
            let within = in_range(now, start, end);
            match comparator {
                Comparator::Eq => within,
                Comparator::Ne => !within,
                _ => return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable),
            }
        } else {
            let Some(target) = parse_hhmm(pattern) else {
                return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable);
            };
            match comparator {
                Comparator::Eq => now == target,
                Comparator::Ne => now != target,
                Comparator::Gt => now > target,
                Comparator::Lt => now < target,
                Comparator::Ge => now >= target,
                Comparator::Le => now <= target,
            }
        };

        let outcome = if truth { LasOutcome::True } else { LasOutcome::False };
        LasResult::new(outcome, Cachability::NotCachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Plist;

    fn ctx_for(time: &str) -> Plist {
        let mut p = Plist::new();
        p.set("timeofday", time);
        p
    }

    #[test]
    fn range_wraps_midnight() {
        let subject = ctx_for("2330");
        let resource = Plist::new();
        let ctx = LasContext { subject: &subject, resource: &resource, attribute_getter: None , password_policy: None };
        let result = TimeOfDayEvaluator.evaluate(&ctx, Comparator::Eq, "2200-0600");
        assert_eq!(result.outcome, LasOutcome::True);
    }

    #[test]
    fn outside_non_wrapping_range_is_false() {
        let subject = ctx_for("1200");
        let resource = Plist::new();
        let ctx = LasContext { subject: &subject, resource: &resource, attribute_getter: None , password_policy: None };
        let result = TimeOfDayEvaluator.evaluate(&ctx, Comparator::Eq, "0900-1100");
        assert_eq!(result.outcome, LasOutcome::False);
    }
}
