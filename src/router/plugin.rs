//! The operation set the rollout orchestrator drives
//!
//! Every request carries a `RolloutContext`. The plugin decodes its traffic
//! routing config, resolves the routes to act on (configured names plus label
//! selector discovery) and runs the engine against each, in kind order HTTP,
//! GRPC, TCP, TLS. The first failure stops the request.
//!
//! Header route changes touch two objects, the route and the registry
//! document, and are committed together through `transaction::run`. They are
//! also serialized per registry document within this process. Weight updates
//! are not: concurrent requests for the same route race on read-modify-write
//! and the API server's resourceVersion check turns the loser into a conflict
//! error.

use super::config::{
    add_target, GatewayAPITrafficRouting, RolloutContext, RouteTarget, SetHeaderRoute,
    WeightDestination,
};
use super::header::{inject_header_route, translate_header_matches, HeaderMatch};
use super::labels::ensure_in_progress_label;
use super::registry::{remove_managed_rule, ManagedRouteMap};
use super::route::{with_rules, with_rules_mut, GatewayRoute, ListField, RouteKind};
use super::store::{RouteStore, StoreError};
use super::transaction::{self, DocumentWrite, RouteWrite};
use super::{weight, RoutingError};
use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Name the orchestrator knows this router by
pub const PLUGIN_TYPE: &str = "GatewayAPI";

/// Routes and settings resolved for one request
#[derive(Debug, Clone)]
pub struct RoutingPlan {
    pub namespace: String,
    pub document: String,
    pub config: GatewayAPITrafficRouting,
    pub targets: Vec<RouteTarget>,
}

impl RoutingPlan {
    fn header_targets(&self) -> impl Iterator<Item = &RouteTarget> {
        self.targets.iter().filter(|target| target.takes_header_routes())
    }
}

/// One async mutex per (namespace, registry document)
///
/// Entries are never pruned. A rollout config names one document, so the
/// table holds at most one entry per namespace and document name in use.
#[derive(Default)]
struct DocumentLocks {
    locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl DocumentLocks {
    async fn acquire(&self, namespace: &str, document: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks
                .entry((namespace.to_string(), document.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct TrafficRouterPlugin {
    store: Arc<dyn RouteStore>,
    document_locks: DocumentLocks,
}

impl TrafficRouterPlugin {
    pub fn new(store: impl RouteStore + 'static) -> Self {
        Self::with_store(Arc::new(store))
    }

    pub fn with_store(store: Arc<dyn RouteStore>) -> Self {
        Self {
            store,
            document_locks: DocumentLocks::default(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        PLUGIN_TYPE
    }

    /// Decode the rollout's config and resolve every route it names
    pub async fn resolve(&self, rollout: &RolloutContext) -> Result<RoutingPlan, RoutingError> {
        let config = GatewayAPITrafficRouting::from_plugin_config(&rollout.traffic_routing)?;
        let namespace = config.namespace_or(&rollout.namespace).to_string();
        let mut targets = config.route_targets();

        for kind in RouteKind::ALL {
            let Some(selector) = config.selector(kind) else {
                continue;
            };
            let discovered = self.store.list_routes(&namespace, kind, selector).await?;
            debug!(kind = %kind, namespace = %namespace, routes = ?discovered, "Discovered routes by selector");
            for name in discovered {
                add_target(&mut targets, kind, &name, true);
            }
        }

        Ok(RoutingPlan {
            namespace,
            document: config.document_name().to_string(),
            config,
            targets,
        })
    }

    /// Send `desired_weight` percent of traffic to the canary on every route
    ///
    /// # Arguments
    /// * `rollout` - rollout context carrying services and config
    /// * `desired_weight` - canary percentage, 0..=100
    /// * `destinations` - additional Services with fixed weights
    pub async fn set_weight(
        &self,
        rollout: &RolloutContext,
        desired_weight: i32,
        destinations: &[WeightDestination],
    ) -> Result<(), RoutingError> {
        check_weight(desired_weight)?;
        let plan = self.resolve(rollout).await?;
        let document = self.store.get_document(&plan.namespace, &plan.document).await?;

        for target in &plan.targets {
            let mut route = self
                .store
                .get_route(&plan.namespace, target.kind, &target.name)
                .await?;
            let skip = managed_rule_indices(document.as_ref(), target)?;
            let (canary, stable) = (&rollout.canary_service, &rollout.stable_service);
            let kind = target.kind;

            with_rules_mut!(&mut route, |rules| {
                weight::apply_weight(kind, rules, canary, stable, desired_weight, &skip)?;
                weight::apply_additional_destinations(
                    kind,
                    rules,
                    canary,
                    stable,
                    desired_weight,
                    destinations,
                    &skip,
                )?;
            });
            ensure_in_progress_label(route.metadata_mut(), desired_weight, &plan.config);

            self.store.update_route(&plan.namespace, &route).await?;
            info!(
                rollout = %rollout.name,
                kind = %kind,
                route = %target.name,
                weight = desired_weight,
                "Updated route weights"
            );
        }
        Ok(())
    }

    /// Add (or, with no matches, remove) the header route `header_route.name`
    pub async fn set_header_route(
        &self,
        rollout: &RolloutContext,
        header_route: &SetHeaderRoute,
    ) -> Result<(), RoutingError> {
        let plan = self.resolve(rollout).await?;
        if header_route.matches.is_empty() {
            return self
                .remove_managed_route_names(&plan, &[header_route.name.clone()])
                .await;
        }
        let headers = translate_header_matches(&header_route.matches)?;

        let _guard = self
            .document_locks
            .acquire(&plan.namespace, &plan.document)
            .await;
        let mut document = self.get_or_create_document(&plan).await?;

        for target in &plan.targets {
            if !target.takes_header_routes() {
                debug!(kind = %target.kind, route = %target.name, "Route takes no header routes");
                continue;
            }
            let key = target.kind.registry_key();
            let before_map = ManagedRouteMap::load(&document, key)?;
            let before = self
                .store
                .get_route(&plan.namespace, target.kind, &target.name)
                .await?;

            let mut after = before.clone();
            let index = inject(
                &mut after,
                &rollout.canary_service,
                &rollout.stable_service,
                &headers,
            )?;
            let mut after_map = before_map.clone();
            after_map.record_injection(&header_route.name, &target.name, index);

            document = self
                .commit(&plan, before, after, &document, key, &before_map, &after_map)
                .await?;
            info!(
                rollout = %rollout.name,
                kind = %target.kind,
                route = %target.name,
                managed_route = %header_route.name,
                index,
                "Injected header route"
            );
        }
        Ok(())
    }

    /// Remove every managed route the rollout declares from every route
    pub async fn remove_managed_routes(&self, rollout: &RolloutContext) -> Result<(), RoutingError> {
        let plan = self.resolve(rollout).await?;
        let names: Vec<String> = rollout
            .managed_routes
            .iter()
            .map(|managed| managed.name.clone())
            .collect();
        self.remove_managed_route_names(&plan, &names).await
    }

    /// Whether every route carries the weights `set_weight` would write
    ///
    /// `None` is never returned; the option is part of the wire contract for
    /// routers that cannot tell.
    pub async fn verify_weight(
        &self,
        rollout: &RolloutContext,
        desired_weight: i32,
        destinations: &[WeightDestination],
    ) -> Result<Option<bool>, RoutingError> {
        check_weight(desired_weight)?;
        let plan = self.resolve(rollout).await?;
        let document = self.store.get_document(&plan.namespace, &plan.document).await?;

        for target in &plan.targets {
            let route = self
                .store
                .get_route(&plan.namespace, target.kind, &target.name)
                .await?;
            let skip = managed_rule_indices(document.as_ref(), target)?;
            let kind = target.kind;
            let applied = with_rules!(&route, |rules| weight::weights_applied(
                kind,
                rules,
                &rollout.canary_service,
                &rollout.stable_service,
                desired_weight,
                destinations,
                &skip,
            ))?;
            if !applied {
                info!(kind = %kind, route = %target.name, weight = desired_weight, "Route weights not yet applied");
                return Ok(Some(false));
            }
        }
        Ok(Some(true))
    }

    /// Pod template hashes play no part in Gateway API routing
    pub async fn update_hash(
        &self,
        _rollout: &RolloutContext,
        _canary_hash: &str,
        _stable_hash: &str,
        _destinations: &[WeightDestination],
    ) -> Result<(), RoutingError> {
        Ok(())
    }

    async fn remove_managed_route_names(
        &self,
        plan: &RoutingPlan,
        names: &[String],
    ) -> Result<(), RoutingError> {
        let _guard = self
            .document_locks
            .acquire(&plan.namespace, &plan.document)
            .await;
        let mut document = self.get_or_create_document(plan).await?;

        for target in plan.header_targets() {
            let key = target.kind.registry_key();
            let before_map = ManagedRouteMap::load(&document, key)?;
            let before = self
                .store
                .get_route(&plan.namespace, target.kind, &target.name)
                .await?;

            let mut after = before.clone();
            let mut after_map = before_map.clone();
            let mut removed = Vec::new();
            for name in names {
                if !after_map.contains(name) {
                    info!(kind = %target.kind, managed_route = %name, "Managed route not in registry, skipping");
                    continue;
                }
                with_rules_mut!(&mut after, |rules| {
                    remove_managed_rule(&mut after_map, rules, name, &target.name)?;
                });
                removed.push(name.as_str());
            }
            if removed.is_empty() {
                continue;
            }

            document = self
                .commit(plan, before, after, &document, key, &before_map, &after_map)
                .await?;
            info!(
                kind = %target.kind,
                route = %target.name,
                managed_routes = ?removed,
                "Removed managed routes"
            );
        }
        Ok(())
    }

    /// Write the route and then the registry document as one unit
    ///
    /// Returns the document as stored so later routes build on its
    /// resourceVersion.
    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        plan: &RoutingPlan,
        before: GatewayRoute,
        after: GatewayRoute,
        document: &ConfigMap,
        key: &str,
        before_map: &ManagedRouteMap,
        after_map: &ManagedRouteMap,
    ) -> Result<ConfigMap, RoutingError> {
        let mut route_write = RouteWrite::new(self.store.clone(), &plan.namespace, before, after);
        let mut document_write = DocumentWrite::new(
            self.store.clone(),
            &plan.namespace,
            document,
            key,
            before_map,
            after_map,
        )?;

        transaction::run(&mut [&mut route_write, &mut document_write]).await?;

        document_write.into_written().ok_or_else(|| {
            RoutingError::Store(StoreError::NotFound(format!(
                "ConfigMap {}/{}",
                plan.namespace, plan.document
            )))
        })
    }

    async fn get_or_create_document(&self, plan: &RoutingPlan) -> Result<ConfigMap, RoutingError> {
        if let Some(document) = self.store.get_document(&plan.namespace, &plan.document).await? {
            return Ok(document);
        }
        info!(namespace = %plan.namespace, document = %plan.document, "Creating managed route registry");
        Ok(self
            .store
            .create_document(&plan.namespace, &plan.document)
            .await?)
    }
}

fn check_weight(desired_weight: i32) -> Result<(), RoutingError> {
    if (0..=100).contains(&desired_weight) {
        Ok(())
    } else {
        Err(RoutingError::WeightOutOfRange(desired_weight))
    }
}

/// Rule indices of header routes recorded for `target`
fn managed_rule_indices(
    document: Option<&ConfigMap>,
    target: &RouteTarget,
) -> Result<BTreeSet<usize>, RoutingError> {
    let Some(document) = document else {
        return Ok(BTreeSet::new());
    };
    Ok(ManagedRouteMap::load(document, target.kind.registry_key())?.managed_rule_indices(&target.name))
}

fn inject(
    route: &mut GatewayRoute,
    canary: &str,
    stable: &str,
    headers: &[HeaderMatch],
) -> Result<usize, RoutingError> {
    let kind = route.kind();
    match route {
        GatewayRoute::Http(route) => {
            inject_header_route(kind, route.spec.rules.items_mut(), canary, stable, headers)
        }
        GatewayRoute::Grpc(route) => {
            inject_header_route(kind, route.spec.rules.items_mut(), canary, stable, headers)
        }
        GatewayRoute::Tcp(_) | GatewayRoute::Tls(_) => Err(RoutingError::InvalidConfig(format!(
            "{kind} does not support header routes"
        ))),
    }
}

#[cfg(test)]
#[path = "plugin_test.rs"]
mod tests;
