//! Locating backend refs and rules by service name

use super::route::{indexed_backend_refs, BackendRef, Rule, RouteKind};
use super::RoutingError;
use std::collections::BTreeSet;
use tracing::info;

/// Position of a backend ref inside a route's rule list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendRefPosition {
    pub rule: usize,
    pub backend_ref: usize,
}

/// Find every backend ref named `service`, across all rules
///
/// A service may appear in more than one rule, and more than once in a rule;
/// all occurrences are returned in rule order. Rules whose index is in
/// `skip_rules` are left out of the result.
///
/// # Errors
/// - `BackendRefListNotFound` if no rule carries any backend ref
/// - `BackendRefNotFound` if `service` is never referenced (the check ignores
///   `skip_rules`, so a service living only in managed rules still counts as
///   found)
pub fn find_backend_refs<R: Rule>(
    kind: RouteKind,
    rules: &[R],
    service: &str,
    skip_rules: &BTreeSet<usize>,
) -> Result<Vec<BackendRefPosition>, RoutingError> {
    if indexed_backend_refs(rules).next().is_none() {
        return Err(RoutingError::BackendRefListNotFound { kind });
    }

    let mut found = false;
    let mut positions = Vec::new();
    for (rule, backend_ref, candidate) in indexed_backend_refs(rules) {
        if candidate.name() != service {
            continue;
        }
        found = true;
        if skip_rules.contains(&rule) {
            info!(kind = %kind, service = %service, rule, "Skipping backend ref in managed rule");
            continue;
        }
        positions.push(BackendRefPosition { rule, backend_ref });
    }

    if !found {
        return Err(RoutingError::BackendRefNotFound {
            kind,
            service: service.to_string(),
        });
    }
    Ok(positions)
}

/// Index of the first rule referencing both `canary` and `stable`
pub fn find_rule_with_services<R: Rule>(
    kind: RouteKind,
    rules: &[R],
    canary: &str,
    stable: &str,
) -> Result<usize, RoutingError> {
    rules
        .iter()
        .position(|rule| references(rule, canary) && references(rule, stable))
        .ok_or_else(|| RoutingError::RouteRuleNotFound {
            kind,
            canary: canary.to_string(),
            stable: stable.to_string(),
        })
}

/// Index of the primary rule: the first rule outside `skip_rules` that
/// references the canary or the stable service
pub fn find_primary_rule<R: Rule>(
    kind: RouteKind,
    rules: &[R],
    canary: &str,
    stable: &str,
    skip_rules: &BTreeSet<usize>,
) -> Result<usize, RoutingError> {
    rules
        .iter()
        .enumerate()
        .filter(|(index, _)| !skip_rules.contains(index))
        .find(|(_, rule)| references(*rule, canary) || references(*rule, stable))
        .map(|(index, _)| index)
        .ok_or_else(|| RoutingError::BackendRefNotFound {
            kind,
            service: stable.to_string(),
        })
}

fn references<R: Rule>(rule: &R, service: &str) -> bool {
    rule.backend_refs()
        .iter()
        .any(|backend_ref| backend_ref.name() == service)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::router::test_fixtures::http_rules;

    #[test]
    fn test_finds_service_in_every_rule() {
        let rules = http_rules(&[&[("stable", 100), ("canary", 0)], &[("canary", 0)]]);

        let positions = find_backend_refs(RouteKind::Http, &rules, "canary", &BTreeSet::new()).unwrap();

        assert_eq!(
            positions,
            vec![
                BackendRefPosition { rule: 0, backend_ref: 1 },
                BackendRefPosition { rule: 1, backend_ref: 0 },
            ]
        );
    }

    #[test]
    fn test_skips_managed_rules() {
        let rules = http_rules(&[&[("stable", 100), ("canary", 0)], &[("canary", 0)]]);
        let skip = BTreeSet::from([1]);

        let positions = find_backend_refs(RouteKind::Http, &rules, "canary", &skip).unwrap();

        assert_eq!(positions, vec![BackendRefPosition { rule: 0, backend_ref: 1 }]);
    }

    #[test]
    fn test_service_only_in_managed_rule_is_not_an_error() {
        let rules = http_rules(&[&[("stable", 100)], &[("canary", 0)]]);
        let skip = BTreeSet::from([1]);

        let positions = find_backend_refs(RouteKind::Http, &rules, "canary", &skip).unwrap();

        assert!(positions.is_empty());
    }

    #[test]
    fn test_missing_service_reports_kind() {
        let rules = http_rules(&[&[("stable", 100)]]);

        let err = find_backend_refs(RouteKind::Http, &rules, "canary", &BTreeSet::new()).unwrap_err();

        assert!(matches!(err, RoutingError::BackendRefNotFound { kind: RouteKind::Http, .. }));
        assert!(err.to_string().contains("HTTPRoute"));
    }

    #[test]
    fn test_rules_without_backend_refs() {
        let rules = http_rules(&[&[], &[]]);

        let err = find_backend_refs(RouteKind::Http, &rules, "canary", &BTreeSet::new()).unwrap_err();

        assert!(matches!(err, RoutingError::BackendRefListNotFound { .. }));
    }

    #[test]
    fn test_rule_with_both_services_picks_first() {
        let rules = http_rules(&[
            &[("canary", 0)],
            &[("stable", 100), ("canary", 0)],
            &[("canary", 0), ("stable", 100)],
        ]);

        let index = find_rule_with_services(RouteKind::Http, &rules, "canary", "stable").unwrap();

        assert_eq!(index, 1);
    }

    #[test]
    fn test_rule_with_both_services_missing() {
        let rules = http_rules(&[&[("canary", 0)], &[("stable", 100)]]);

        let err = find_rule_with_services(RouteKind::Http, &rules, "canary", "stable").unwrap_err();

        assert!(matches!(err, RoutingError::RouteRuleNotFound { .. }));
    }

    #[test]
    fn test_primary_rule() {
        let rules = http_rules(&[&[("canary", 0)], &[("other", 100)], &[("stable", 100)]]);

        let primary =
            find_primary_rule(RouteKind::Http, &rules, "canary", "stable", &BTreeSet::new());
        assert_eq!(primary.unwrap(), 0);

        // a managed header rule never counts as primary
        let primary =
            find_primary_rule(RouteKind::Http, &rules, "canary", "stable", &BTreeSet::from([0]));
        assert_eq!(primary.unwrap(), 2);

        let err = find_primary_rule(RouteKind::Http, &rules, "a", "b", &BTreeSet::new())
            .unwrap_err();
        assert!(matches!(err, RoutingError::BackendRefNotFound { ref service, .. } if service == "b"));
    }
}
