//! Quota admission for node-group scale-ups.
//!
//! Best-effort: the snapshot is read, never reserved, so two concurrent checks
//! for the same group can both pass and together overshoot the pool.

use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{NodeGroup, ZoneAllocation, ZoneCapacity};
use crate::error::{FlowError, ZoneShortage};
use crate::ports::QuotaSource;

/// Zone label used when a shortage is not attributable to a single zone.
pub const ANY_ZONE: &str = "any";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Nothing to check (no increment, or the group has no instance shape).
    Skipped,
    /// Any-zone group: the pool-wide totals fit.
    AnyZone { increment: u64 },
    /// Fixed-zone group: the predicted split, summing to the increment.
    PerZone(Vec<ZoneAllocation>),
}

impl QuotaDecision {
    pub fn zone_split(&self) -> &[ZoneAllocation] {
        match self {
            QuotaDecision::PerZone(split) => split,
            _ => &[],
        }
    }
}

pub struct QuotaAllocator {
    source: Arc<dyn QuotaSource>,
}

impl QuotaAllocator {
    pub fn new(source: Arc<dyn QuotaSource>) -> Self {
        Self { source }
    }

    pub async fn check_quota(
        &self,
        node_group: &NodeGroup,
        increment: i64,
    ) -> Result<QuotaDecision, FlowError> {
        if increment <= 0 {
            return Ok(QuotaDecision::Skipped);
        }
        let Some((region, instance_type)) = node_group.capacity_key() else {
            debug!(node_group = %node_group.id, "no launch template shape, quota check skipped");
            return Ok(QuotaDecision::Skipped);
        };

        let snapshot = self
            .source
            .zone_capacity(region, instance_type, &node_group.id)
            .await?;
        let decision = decide(&node_group.declared_zones(), &snapshot, increment as u64)?;
        info!(
            node_group = %node_group.id,
            region,
            instance_type,
            increment,
            decision = ?decision,
            "quota check passed"
        );
        Ok(decision)
    }
}

/// Pure admission decision over one capacity snapshot.
///
/// `declared_zones` empty means any-zone mode. Declared zones missing from the
/// snapshot count as zero capacity.
pub fn decide(
    declared_zones: &[String],
    snapshot: &[ZoneCapacity],
    increment: u64,
) -> Result<QuotaDecision, FlowError> {
    if increment == 0 {
        return Ok(QuotaDecision::Skipped);
    }
    if snapshot.is_empty() {
        return Err(FlowError::InsufficientQuota(vec![ZoneShortage {
            zone: ANY_ZONE.to_string(),
            oversold_total: 0,
            group_quota: 0,
            increment,
        }]));
    }

    if declared_zones.is_empty() {
        let total = snapshot.iter().fold(0u64, |acc, z| acc.saturating_add(z.oversold_total));
        let quota = snapshot.iter().fold(0u64, |acc, z| acc.saturating_add(z.group_quota));
        if quota.saturating_add(increment) > total {
            return Err(FlowError::InsufficientQuota(vec![ZoneShortage {
                zone: ANY_ZONE.to_string(),
                oversold_total: total,
                group_quota: quota,
                increment,
            }]));
        }
        return Ok(QuotaDecision::AnyZone { increment });
    }

    let zones: Vec<ZoneCapacity> = declared_zones
        .iter()
        .map(|name| {
            snapshot
                .iter()
                .find(|z| &z.zone == name)
                .cloned()
                .unwrap_or_else(|| ZoneCapacity {
                    zone: name.clone(),
                    ..Default::default()
                })
        })
        .collect();

    let weights: Vec<u64> = zones.iter().map(|z| z.oversold_available).collect();
    let predicted = split_by_weight(increment, &weights);

    let shortages: Vec<ZoneShortage> = zones
        .iter()
        .zip(&predicted)
        .filter(|(zone, share)| zone.group_quota.saturating_add(**share) > zone.oversold_total)
        .map(|(zone, share)| ZoneShortage {
            zone: zone.zone.clone(),
            oversold_total: zone.oversold_total,
            group_quota: zone.group_quota,
            increment: *share,
        })
        .collect();
    if !shortages.is_empty() {
        return Err(FlowError::InsufficientQuota(shortages));
    }

    let split = zones
        .into_iter()
        .zip(predicted)
        .map(|(zone, share)| {
            let count = u32::try_from(share)
                .map_err(|_| FlowError::validation(format!("zone {} share {share} exceeds u32", zone.zone)))?;
            Ok(ZoneAllocation { zone: zone.zone, count })
        })
        .collect::<Result<Vec<_>, FlowError>>()?;
    Ok(QuotaDecision::PerZone(split))
}

/// Largest-remainder split of `total` proportional to `weights`.
///
/// All-zero weights split evenly. Ties go to the earlier index. The result
/// always sums to `total`.
pub fn split_by_weight(total: u64, weights: &[u64]) -> Vec<u64> {
    if weights.is_empty() {
        return Vec::new();
    }
    let sum: u128 = weights.iter().map(|w| *w as u128).sum();
    let weights: Vec<u128> = if sum == 0 {
        vec![1; weights.len()]
    } else {
        weights.iter().map(|w| *w as u128).collect()
    };
    let sum: u128 = weights.iter().sum();
    let total_wide = total as u128;

    let mut shares: Vec<u64> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(usize, u128)> = Vec::with_capacity(weights.len());
    for (i, w) in weights.iter().enumerate() {
        let exact = total_wide * w;
        shares.push((exact / sum) as u64);
        remainders.push((i, exact % sum));
    }

    let assigned: u64 = shares.iter().sum();
    // stable sort keeps declared order among equal remainders
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    for (i, _) in remainders.into_iter().take((total - assigned) as usize) {
        shares[i] += 1;
    }
    shares
}
