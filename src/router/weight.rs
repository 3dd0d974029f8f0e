//! Canary/stable weight distribution
//!
//! Weights are percentages. The canary gets the desired weight and the stable
//! service the complement. Additional destinations (experiment or analysis
//! Services) take their share out of the canary side; once the orchestrator
//! stops sending them they are dropped from the route again.

use super::backend::{find_backend_refs, find_primary_rule, BackendRefPosition};
use super::config::WeightDestination;
use super::route::{BackendRef, Rule, RouteKind};
use super::RoutingError;
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Resolved weights for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightSplit {
    pub canary: i32,
    pub stable: i32,
    /// Sum of additional destination weights, capped at 100
    pub extra: i32,
}

/// Split `desired` between canary, stable and the additional destinations
///
/// The extra weight is subtracted from the canary share, floored at 0. The
/// stable share is always `100 - desired`.
pub fn split_weights(desired: i32, destinations: &[WeightDestination]) -> WeightSplit {
    let extra = destinations
        .iter()
        .map(|destination| destination.weight.max(0))
        .sum::<i32>()
        .min(100);
    WeightSplit {
        canary: (desired - extra).max(0),
        stable: 100 - desired,
        extra,
    }
}

/// Set every canary ref outside `skip_rules` to `desired` and every stable ref
/// to `100 - desired`
///
/// # Arguments
/// * `kind` - route kind, for error messages
/// * `rules` - the route's rules, mutated in place
/// * `skip_rules` - indices of managed header rules; their canary refs are left alone
pub fn apply_weight<R: Rule>(
    kind: RouteKind,
    rules: &mut [R],
    canary: &str,
    stable: &str,
    desired: i32,
    skip_rules: &BTreeSet<usize>,
) -> Result<(), RoutingError> {
    let canary_refs = find_backend_refs(kind, rules, canary, skip_rules)?;
    let stable_refs = find_backend_refs(kind, rules, stable, &BTreeSet::new())?;

    set_weights(rules, &canary_refs, desired);
    set_weights(rules, &stable_refs, 100 - desired);
    Ok(())
}

/// Bring the primary rule's additional destinations in line with `destinations`
///
/// The primary rule is the first rule outside `skip_rules` referencing the
/// canary or stable service. Each destination gets its weight there and the
/// canary refs give up the summed extra weight. A destination missing from the
/// primary rule is appended as a copy of the primary rule's first backend ref,
/// so it inherits port, group and kind.
///
/// Refs in the primary rule naming neither canary, stable nor a requested
/// destination are removed, so with no destinations only canary and stable
/// remain.
pub fn apply_additional_destinations<R: Rule>(
    kind: RouteKind,
    rules: &mut [R],
    canary: &str,
    stable: &str,
    desired: i32,
    destinations: &[WeightDestination],
    skip_rules: &BTreeSet<usize>,
) -> Result<(), RoutingError> {
    let primary = find_primary_rule(kind, rules, canary, stable, skip_rules)?;

    rules[primary].backend_refs_mut().retain(|backend_ref| {
        let keep = backend_ref.name() == canary
            || backend_ref.name() == stable
            || is_requested(destinations, backend_ref.name());
        if !keep {
            info!(
                kind = %kind,
                service = %backend_ref.name(),
                rule = primary,
                "Removed additional destination backend ref"
            );
        }
        keep
    });
    if destinations.is_empty() {
        return Ok(());
    }

    let split = split_weights(desired, destinations);
    let canary_refs = find_backend_refs(kind, rules, canary, skip_rules)?;
    set_weights(rules, &canary_refs, split.canary);

    let refs = rules[primary].backend_refs_mut();
    for destination in destinations {
        let mut present = false;
        for backend_ref in refs
            .iter_mut()
            .filter(|backend_ref| backend_ref.name() == destination.service_name)
        {
            backend_ref.set_weight(Some(destination.weight));
            present = true;
        }
        if present {
            continue;
        }

        let Some(template) = refs.first() else {
            return Err(RoutingError::BackendRefListNotFound { kind });
        };
        let mut appended = template.clone();
        appended.retarget(&destination.service_name);
        appended.set_weight(Some(destination.weight));
        refs.push(appended);
        info!(
            kind = %kind,
            service = %destination.service_name,
            weight = destination.weight,
            rule = primary,
            "Added additional destination backend ref"
        );
    }
    Ok(())
}

/// Check whether `rules` already carry the weights `apply_weight` and
/// `apply_additional_destinations` would write
pub fn weights_applied<R: Rule>(
    kind: RouteKind,
    rules: &[R],
    canary: &str,
    stable: &str,
    desired: i32,
    destinations: &[WeightDestination],
    skip_rules: &BTreeSet<usize>,
) -> Result<bool, RoutingError> {
    let split = split_weights(desired, destinations);

    let canary_ok = has_weight(
        rules,
        &find_backend_refs(kind, rules, canary, skip_rules)?,
        split.canary,
    );
    let stable_ok = has_weight(
        rules,
        &find_backend_refs(kind, rules, stable, &BTreeSet::new())?,
        split.stable,
    );
    if !(canary_ok && stable_ok) {
        debug!(kind = %kind, canary_ok, stable_ok, "Route weights differ from desired split");
        return Ok(false);
    }

    let primary = find_primary_rule(kind, rules, canary, stable, skip_rules)?;
    let refs = rules[primary].backend_refs();
    let destinations_ok = destinations.iter().all(|destination| {
        refs.iter().any(|backend_ref| {
            backend_ref.name() == destination.service_name
                && backend_ref.weight() == Some(destination.weight)
        })
    });
    let stale = refs.iter().any(|backend_ref| {
        backend_ref.name() != canary
            && backend_ref.name() != stable
            && !is_requested(destinations, backend_ref.name())
    });
    if stale {
        debug!(kind = %kind, rule = primary, "Route still carries a stale additional destination");
    }
    Ok(destinations_ok && !stale)
}

fn is_requested(destinations: &[WeightDestination], service: &str) -> bool {
    destinations
        .iter()
        .any(|destination| destination.service_name == service)
}

fn set_weights<R: Rule>(rules: &mut [R], positions: &[BackendRefPosition], weight: i32) {
    for position in positions {
        rules[position.rule].backend_refs_mut()[position.backend_ref].set_weight(Some(weight));
    }
}

fn has_weight<R: Rule>(rules: &[R], positions: &[BackendRefPosition], weight: i32) -> bool {
    positions
        .iter()
        .all(|position| rules[position.rule].backend_refs()[position.backend_ref].weight() == Some(weight))
}

#[cfg(test)]
#[path = "weight_test.rs"]
mod tests;
