//! `group` LAS (§4.11): resolves group membership through the
//! `AttributeGetter` seam (`user-ismember`), backed by a small bounded,
//! TTL'd cache so a busy ACL list doesn't re-resolve the same
//! `(subject, group)` pair on every request.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::acl::types::{Cachability, Comparator};
use crate::common::{BoundedHashMap, PlistValue};

use super::{LasContext, LasEvaluator, LasOutcome, LasResult};

const CACHE_CAPACITY: usize = 4096;
const CACHE_TTL: Duration = Duration::from_secs(300);

struct CacheEntry {
    is_member: bool,
    inserted_at: Instant,
}

/// Group membership is scoped to the database the request is bound
/// against, so the cache key carries `dbname` alongside subject and
/// group, matching `acl_usr_cache_group_len_check(user, dbname, group, ...)`.
pub struct GroupEvaluator {
    cache: Mutex<BoundedHashMap<(String, String, String), CacheEntry>>,
}

impl Default for GroupEvaluator {
    fn default() -> Self {
        GroupEvaluator { cache: Mutex::new(BoundedHashMap::new(CACHE_CAPACITY)) }
    }
}

impl GroupEvaluator {
    fn cached_membership(&self, subject_dn: &str, dbname: &str, group_dn: &str) -> Option<bool> {
        let mut cache = self.cache.lock();
        let key = (subject_dn.to_string(), dbname.to_string(), group_dn.to_string());
        match cache.get(&key) {
            Some(entry) if entry.inserted_at.elapsed() < CACHE_TTL => Some(entry.is_member),
            _ => None,
        }
    }

    fn store_membership(&self, subject_dn: &str, dbname: &str, group_dn: &str, is_member: bool) {
        let mut cache = self.cache.lock();
        cache.insert(
            (subject_dn.to_string(), dbname.to_string(), group_dn.to_string()),
            CacheEntry { is_member, inserted_at: Instant::now() },
        );
    }
}

impl LasEvaluator for GroupEvaluator {
    fn evaluate(&self, ctx: &LasContext<'_>, comparator: Comparator, pattern: &str) -> LasResult {
        // The literal "anyone" token bypasses membership checking (and
        // caching) entirely: every subject matches it.
        if pattern == "anyone" {
            let outcome = if comparator == Comparator::Eq { LasOutcome::True } else { LasOutcome::False };
            return LasResult::new(outcome, Cachability::IndefCachable);
        }

        let Some(PlistValue::Str(subject_dn)) = ctx.subject.get("user") else {
            return LasResult::new(LasOutcome::NeedMoreInfo, Cachability::NotCachable);
        };
        let Some(getter) = ctx.attribute_getter else {
            return LasResult::new(LasOutcome::NeedMoreInfo, Cachability::NotCachable);
        };
        let dbname = ctx.resource.get("dbname").and_then(PlistValue::as_str).unwrap_or("");

        let is_member = if let Some(cached) = self.cached_membership(subject_dn, dbname, pattern) {
            cached
        } else {
            let resolved = match getter.get(ctx.subject, "user-ismember") {
                Some(PlistValue::Bool(b)) => b,
                Some(PlistValue::List(groups)) => groups.iter().any(|g| g.eq_ignore_ascii_case(pattern)),
                _ => return LasResult::new(LasOutcome::NeedMoreInfo, Cachability::NotCachable),
            };
            self.store_membership(subject_dn, dbname, pattern, resolved);
            resolved
        };

        let truth = match comparator {
            Comparator::Eq => is_member,
            Comparator::Ne => !is_member,
            _ => return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable),
        };
        let outcome = if truth { LasOutcome::True } else { LasOutcome::False };
        // Group membership can change between requests without the ACL
        // list being recompiled, so unlike `ip`/`dns` this is never
        // session-cachable.
        LasResult::new(outcome, Cachability::NotCachable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Plist;
    use crate::contracts::AttributeGetter;

    struct FixedMembership(bool);

    impl AttributeGetter for FixedMembership {
        fn get(&self, _plist: &Plist, attr: &str) -> Option<PlistValue> {
            assert_eq!(attr, "user-ismember");
            Some(PlistValue::Bool(self.0))
        }
    }

    #[test]
    fn resolves_membership_via_attribute_getter() {
        let mut subject = Plist::new();
        subject.set("user", "uid=alice,dc=example,dc=com");
        let resource = Plist::new();
        let getter = FixedMembership(true);
        let ctx = LasContext { subject: &subject, resource: &resource, attribute_getter: Some(&getter) , password_policy: None };
        let evaluator = GroupEvaluator::default();
        let result = evaluator.evaluate(&ctx, Comparator::Eq, "cn=admins,dc=example,dc=com");
        assert_eq!(result.outcome, LasOutcome::True);
    }

    #[test]
    fn caches_second_lookup_without_calling_getter_again() {
        struct CountingGetter(std::sync::atomic::AtomicUsize);
        impl AttributeGetter for CountingGetter {
            fn get(&self, _plist: &Plist, _attr: &str) -> Option<PlistValue> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Some(PlistValue::Bool(true))
            }
        }

        let mut subject = Plist::new();
        subject.set("user", "uid=bob,dc=example,dc=com");
        let resource = Plist::new();
        let getter = CountingGetter(std::sync::atomic::AtomicUsize::new(0));
        let ctx = LasContext { subject: &subject, resource: &resource, attribute_getter: Some(&getter) , password_policy: None };
        let evaluator = GroupEvaluator::default();

        evaluator.evaluate(&ctx, Comparator::Eq, "cn=admins,dc=example,dc=com");
        evaluator.evaluate(&ctx, Comparator::Eq, "cn=admins,dc=example,dc=com");

        assert_eq!(getter.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
