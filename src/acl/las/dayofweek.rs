//! `dayofweek` LAS (§4.11): comma-separated list of 3-letter day names
//! (`sun,mon,tue,wed,thu,fri,sat`), matched against the subject's current
//! day.

use crate::acl::types::{Cachability, Comparator};
use crate::common::PlistValue;

use super::{LasContext, LasEvaluator, LasOutcome, LasResult};

pub struct DayOfWeekEvaluator;

fn normalise(day: &str) -> Option<&'static str> {
    match day.trim().to_ascii_lowercase().as_str() {
        "sun" => Some("sun"),
        "mon" => Some("mon"),
        "tue" => Some("tue"),
        "wed" => Some("wed"),
        "thu" => Some("thu"),
        "fri" => Some("fri"),
        "sat" => Some("sat"),
        _ => None,
    }
}

impl LasEvaluator for DayOfWeekEvaluator {
    fn evaluate(&self, ctx: &LasContext<'_>, comparator: Comparator, pattern: &str) -> LasResult {
        let Some(PlistValue::Str(today)) = ctx.subject.get("dayofweek") else {
            return LasResult::new(LasOutcome::NeedMoreInfo, Cachability::NotCachable);
        };
        let Some(today) = normalise(today) else {
            return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable);
        };

        let mut days = Vec::new();
        for token in pattern.split(',') {
            match normalise(token) {
                Some(d) => days.push(d),
                None => return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable),
            }
        }

        let present = days.contains(&today);
        let truth = match comparator {
            Comparator::Eq => present,
            Comparator::Ne => !present,
            _ => return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable),
        };
        let outcome = if truth { LasOutcome::True } else { LasOutcome::False };
        LasResult::new(outcome, Cachability::NotCachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Plist;

    #[test]
    fn list_membership_matches() {
        let mut subject = Plist::new();
        subject.set("dayofweek", "wed");
        let resource = Plist::new();
        let ctx = LasContext { subject: &subject, resource: &resource, attribute_getter: None , password_policy: None };
        let result = DayOfWeekEvaluator.evaluate(&ctx, Comparator::Eq, "mon,wed,fri");
        assert_eq!(result.outcome, LasOutcome::True);
    }

    #[test]
    fn non_member_day_is_false() {
        let mut subject = Plist::new();
        subject.set("dayofweek", "sun");
        let resource = Plist::new();
        let ctx = LasContext { subject: &subject, resource: &resource, attribute_getter: None , password_policy: None };
        let result = DayOfWeekEvaluator.evaluate(&ctx, Comparator::Eq, "mon,wed,fri");
        assert_eq!(result.outcome, LasOutcome::False);
    }
}
