//! Round scoring
//!
//! Pure functions that turn one round's outcomes into point awards and the
//! next set of service states. Nothing here touches shared state; the store
//! calls into this module while it holds its commit lock.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::models::{ProbeOutcome, ServiceDefinition, ServiceState, ServiceStatus};

/// Point allocation for one round
#[derive(Debug, Clone, PartialEq)]
pub struct RoundScore {
    pub awarded: BTreeMap<String, u64>,
    pub unclamped_total: u64,
    pub delta: u64,
}

/// Award weights for passing services, then clamp the total to `cap`.
///
/// Every configured service must have exactly one outcome; an outcome for an
/// unknown service is also a fault.
pub fn score_round(
    round_index: u64,
    services: &[ServiceDefinition],
    outcomes: &BTreeMap<String, ProbeOutcome>,
    cap: u64,
) -> Result<RoundScore, StoreError> {
    if let Some(unknown) = outcomes
        .keys()
        .find(|id| !services.iter().any(|s| &s.id == *id))
    {
        return Err(StoreError::UnknownService {
            round: round_index,
            service: unknown.clone(),
        });
    }

    let mut raw = BTreeMap::new();
    for svc in services {
        let outcome = outcomes.get(&svc.id).ok_or_else(|| StoreError::MissingOutcome {
            round: round_index,
            service: svc.id.clone(),
        })?;
        let points = if outcome.is_pass() { svc.weight } else { 0 };
        raw.insert(svc.id.clone(), points);
    }

    let unclamped_total = raw
        .values()
        .try_fold(0u64, |acc, p| acc.checked_add(*p))
        .ok_or(StoreError::Overflow(round_index))?;

    let awarded = if unclamped_total > cap {
        clamp_proportional(&raw, unclamped_total, cap)
    } else {
        raw
    };
    let delta = awarded.values().sum();

    Ok(RoundScore { awarded, unclamped_total, delta })
}

/// Scale awards down so they sum to exactly `cap`, keeping weight ratios.
///
/// Uses largest-remainder apportionment: every service gets the floor of its
/// exact share, and the leftover points go one at a time to the largest
/// fractional remainders (ties broken by service id order).
pub fn clamp_proportional(
    raw: &BTreeMap<String, u64>,
    total: u64,
    cap: u64,
) -> BTreeMap<String, u64> {
    if total == 0 {
        return raw.keys().map(|id| (id.clone(), 0)).collect();
    }

    let total = total as u128;
    let cap_wide = cap as u128;

    let mut shares: Vec<(&String, u64, u128)> = raw
        .iter()
        .map(|(id, points)| {
            let exact = *points as u128 * cap_wide;
            (id, (exact / total) as u64, exact % total)
        })
        .collect();

    let floor_sum: u64 = shares.iter().map(|(_, floor, _)| floor).sum();
    let mut leftover = cap.saturating_sub(floor_sum);

    let mut order: Vec<usize> = (0..shares.len()).collect();
    // Stable sort keeps id order among equal remainders
    order.sort_by(|a, b| shares[*b].2.cmp(&shares[*a].2));

    for idx in order {
        if leftover == 0 {
            break;
        }
        if shares[idx].2 > 0 {
            shares[idx].1 += 1;
            leftover -= 1;
        }
    }

    shares
        .into_iter()
        .map(|(id, points, _)| (id.clone(), points))
        .collect()
}

/// Fold one outcome into a service's state
pub fn transition(
    prev: &ServiceState,
    outcome: &ProbeOutcome,
    awarded: u64,
    round_index: u64,
) -> Result<ServiceState, StoreError> {
    let mut next = prev.clone();

    if outcome.is_pass() {
        next.status = ServiceStatus::Up;
        next.consecutive_successes += 1;
        next.consecutive_failures = 0;
        next.up_count += 1;
    } else {
        next.status = ServiceStatus::Down;
        next.consecutive_failures += 1;
        next.consecutive_successes = 0;
    }

    next.cumulative_points = prev
        .cumulative_points
        .checked_add(awarded)
        .ok_or(StoreError::Overflow(round_index))?;
    next.points_last_round = awarded;
    next.total_checks += 1;
    next.last_outcome = Some(outcome.clone());
    next.last_round_index = Some(round_index);

    Ok(next)
}
