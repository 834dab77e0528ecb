//! `ip` LAS (§4.11): matches the subject's client address against an
//! IPv4/IPv6 pattern with an optional `/netmask` suffix.

use std::net::IpAddr;

use crate::acl::types::{Cachability, Comparator};
use crate::common::PlistValue;

use super::{LasContext, LasEvaluator, LasOutcome, LasResult};

#[derive(Default)]
pub struct IpEvaluator;

fn parse_cidr(pattern: &str) -> Option<(IpAddr, u32)> {
    match pattern.split_once('/') {
        Some((addr, bits)) => Some((addr.parse().ok()?, bits.parse().ok()?)),
        None => {
            let addr: IpAddr = pattern.parse().ok()?;
            let bits = if addr.is_ipv4() { 32 } else { 128 };
            Some((addr, bits))
        }
    }
}

fn masked_eq(addr: IpAddr, net: IpAddr, prefix: u32) -> bool {
    match (addr, net) {
        (IpAddr::V4(a), IpAddr::V4(n)) => {
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix.min(32)) };
            u32::from(a) & mask == u32::from(n) & mask
        }
        (IpAddr::V6(a), IpAddr::V6(n)) => {
            let mask = if prefix == 0 { 0u128 } else { u128::MAX << (128 - prefix.min(128)) };
            u128::from(a) & mask == u128::from(n) & mask
        }
        _ => false,
    }
}

impl LasEvaluator for IpEvaluator {
    fn evaluate(&self, ctx: &LasContext<'_>, comparator: Comparator, pattern: &str) -> LasResult {
        let Some(PlistValue::Str(client_ip)) = ctx.subject.get("ip") else {
            return LasResult::new(LasOutcome::NeedMoreInfo, Cachability::NotCachable);
        };
        let Ok(client_addr) = client_ip.parse::<IpAddr>() else {
            return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable);
        };
        let Some((net, prefix)) = parse_cidr(pattern) else {
            return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable);
        };
        let matches = masked_eq(client_addr, net, prefix);
        let truth = match comparator {
            Comparator::Eq => matches,
            Comparator::Ne => !matches,
            _ => return LasResult::new(LasOutcome::Invalid, Cachability::NotCachable),
        };
        let outcome = if truth { LasOutcome::True } else { LasOutcome::False };
        LasResult::new(outcome, Cachability::SessionCachable)
    }
}
