//! Managed route registry
//!
//! Records which rules were injected as header routes:
//! `{managed route name -> {route name -> rule index}}`. One map per route kind
//! is stored JSON-encoded in the registry ConfigMap under the kind's key
//! (`httpManagedRoutes`, `grpcManagedRoutes`, ...).
//!
//! Indices are positional, so removing a rule shifts every later rule down by
//! one. `remove_managed_rule` is the only way rules leave a route: it updates
//! the registry first and then deletes exactly one element.

use super::route::Rule;
use super::RoutingError;
use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Default name of the registry ConfigMap
pub const DEFAULT_DOCUMENT_NAME: &str = "argo-gatewayapi-configmap";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagedRouteMap(BTreeMap<String, BTreeMap<String, usize>>);

impl ManagedRouteMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the map stored under `key`; a missing or empty value is an empty map
    pub fn load(document: &ConfigMap, key: &str) -> Result<Self, RoutingError> {
        let raw = document
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .map(String::as_str)
            .unwrap_or_default();
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_str(raw).map_err(|source| RoutingError::DocumentDecode {
            key: key.to_string(),
            source,
        })
    }

    /// Write the map into `document` under `key`
    pub fn store(&self, document: &mut ConfigMap, key: &str) -> Result<(), RoutingError> {
        let encoded = serde_json::to_string(self).map_err(|source| RoutingError::DocumentEncode {
            key: key.to_string(),
            source,
        })?;
        document
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), encoded);
        Ok(())
    }

    /// Record that `managed_route` lives at `index` in `route`, replacing any
    /// earlier index for the pair
    pub fn record_injection(&mut self, managed_route: &str, route: &str, index: usize) {
        self.0
            .entry(managed_route.to_string())
            .or_default()
            .insert(route.to_string(), index);
    }

    pub fn contains(&self, managed_route: &str) -> bool {
        self.0.contains_key(managed_route)
    }

    pub fn index_of(&self, managed_route: &str, route: &str) -> Option<usize> {
        self.0.get(managed_route)?.get(route).copied()
    }

    /// Indices of every managed rule recorded for `route`
    pub fn managed_rule_indices(&self, route: &str) -> BTreeSet<usize> {
        self.0
            .values()
            .filter_map(|routes| routes.get(route).copied())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Delete the `(managed_route, route)` entry and renumber the rest
    ///
    /// Every remaining entry for `route` above the removed index moves down by
    /// one. A managed route left with no routes is dropped. Returns the removed
    /// index.
    pub fn remove_entry(&mut self, route: &str, managed_route: &str) -> Result<usize, RoutingError> {
        let removed = self.take_entry(route, managed_route)?;
        for routes in self.0.values_mut() {
            if let Some(index) = routes.get_mut(route) {
                if *index > removed {
                    *index -= 1;
                }
            }
        }
        Ok(removed)
    }

    fn take_entry(&mut self, route: &str, managed_route: &str) -> Result<usize, RoutingError> {
        let missing = || RoutingError::ManagedRouteMapEntryDelete {
            key: format!("{managed_route}.{route}"),
        };
        let routes = self.0.get_mut(managed_route).ok_or_else(missing)?;
        let index = routes.remove(route).ok_or_else(missing)?;
        if routes.is_empty() {
            self.0.remove(managed_route);
        }
        Ok(index)
    }
}

/// Remove the rule `managed_route` occupies in `route` and renumber the registry
///
/// Nothing is mutated if the entry is absent or points past the end of
/// `rules`.
pub fn remove_managed_rule<R: Rule>(
    registry: &mut ManagedRouteMap,
    rules: &mut Vec<R>,
    managed_route: &str,
    route: &str,
) -> Result<(), RoutingError> {
    let index = registry.index_of(managed_route, route).ok_or_else(|| {
        RoutingError::ManagedRouteMapEntryDelete {
            key: format!("{managed_route}.{route}"),
        }
    })?;
    if index >= rules.len() {
        return Err(RoutingError::ManagedRuleOutOfRange {
            managed_route: managed_route.to_string(),
            route: route.to_string(),
            index,
            rules: rules.len(),
        });
    }

    registry.remove_entry(route, managed_route)?;
    rules.remove(index);
    debug!(managed_route = %managed_route, route = %route, index, "Removed managed rule");
    Ok(())
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
