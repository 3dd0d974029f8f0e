//! Request payloads and the traffic routing configuration
//!
//! The rollout orchestrator sends a `RolloutContext` with every request. Its
//! `trafficRouting` blob is decoded into `GatewayAPITrafficRouting`, which
//! names the routes to shape, either directly or through label selectors.

use super::labels::{DEFAULT_IN_PROGRESS_LABEL_KEY, DEFAULT_IN_PROGRESS_LABEL_VALUE};
use super::registry::DEFAULT_DOCUMENT_NAME;
use super::route::RouteKind;
use super::RoutingError;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Gateway API traffic routing configuration
///
/// Compatible with the `plugins.argoproj-labs/gatewayAPI` block of an Argo
/// Rollout.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct GatewayAPITrafficRouting {
    /// Single HTTPRoute (header routes enabled)
    #[serde(rename = "httpRoute", default, skip_serializing_if = "Option::is_none")]
    pub http_route: Option<String>,

    /// Single GRPCRoute (header routes enabled)
    #[serde(rename = "grpcRoute", default, skip_serializing_if = "Option::is_none")]
    pub grpc_route: Option<String>,

    /// Single TCPRoute
    #[serde(rename = "tcpRoute", default, skip_serializing_if = "Option::is_none")]
    pub tcp_route: Option<String>,

    /// Single TLSRoute
    #[serde(rename = "tlsRoute", default, skip_serializing_if = "Option::is_none")]
    pub tls_route: Option<String>,

    #[serde(rename = "httpRoutes", default, skip_serializing_if = "Vec::is_empty")]
    pub http_routes: Vec<RouteEntry>,

    #[serde(rename = "grpcRoutes", default, skip_serializing_if = "Vec::is_empty")]
    pub grpc_routes: Vec<RouteEntry>,

    #[serde(rename = "tcpRoutes", default, skip_serializing_if = "Vec::is_empty")]
    pub tcp_routes: Vec<RouteEntry>,

    #[serde(rename = "tlsRoutes", default, skip_serializing_if = "Vec::is_empty")]
    pub tls_routes: Vec<RouteEntry>,

    /// Every HTTPRoute in the namespace matching this selector is shaped too
    #[serde(rename = "httpRouteSelector", default, skip_serializing_if = "Option::is_none")]
    pub http_route_selector: Option<LabelSelector>,

    #[serde(rename = "grpcRouteSelector", default, skip_serializing_if = "Option::is_none")]
    pub grpc_route_selector: Option<LabelSelector>,

    #[serde(rename = "tcpRouteSelector", default, skip_serializing_if = "Option::is_none")]
    pub tcp_route_selector: Option<LabelSelector>,

    #[serde(rename = "tlsRouteSelector", default, skip_serializing_if = "Option::is_none")]
    pub tls_route_selector: Option<LabelSelector>,

    /// Namespace of the routes and the registry ConfigMap (default: the rollout's)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the registry ConfigMap (default: argo-gatewayapi-configmap)
    #[serde(rename = "configMap", default, skip_serializing_if = "Option::is_none")]
    pub config_map: Option<String>,

    /// Never label routes while a canary is in progress
    #[serde(rename = "disableInProgressLabel", default)]
    pub disable_in_progress_label: bool,

    #[serde(rename = "inProgressLabelKey", default, skip_serializing_if = "Option::is_none")]
    pub in_progress_label_key: Option<String>,

    #[serde(rename = "inProgressLabelValue", default, skip_serializing_if = "Option::is_none")]
    pub in_progress_label_value: Option<String>,
}

/// A named route in a per-kind route list
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct RouteEntry {
    pub name: String,

    /// Whether header routes are injected into this route
    #[serde(rename = "useHeaderRoutes", default)]
    pub use_header_routes: bool,
}

/// A route one request acts on, after folding and discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub kind: RouteKind,
    pub name: String,
    pub use_header_routes: bool,
}

impl RouteTarget {
    /// Header routes only apply to kinds with header matches
    pub fn takes_header_routes(&self) -> bool {
        self.use_header_routes && self.kind.supports_header_routes()
    }
}

impl GatewayAPITrafficRouting {
    /// Decode the `trafficRouting` blob of a request
    pub fn from_plugin_config(value: &serde_json::Value) -> Result<Self, RoutingError> {
        let config: Self = serde_json::from_value(value.clone())
            .map_err(|e| RoutingError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// A config must name at least one route or selector
    pub fn validate(&self) -> Result<(), RoutingError> {
        let has_routes = RouteKind::ALL
            .iter()
            .any(|kind| self.single_route(*kind).is_some() || !self.route_list(*kind).is_empty());
        let has_selectors = RouteKind::ALL
            .iter()
            .any(|kind| self.selector(*kind).is_some());
        if !(has_routes || has_selectors) {
            return Err(RoutingError::InvalidConfig(
                "no route or route selector configured".to_string(),
            ));
        }
        for kind in RouteKind::ALL {
            if self.route_list(kind).iter().any(|entry| entry.name.is_empty()) {
                return Err(RoutingError::InvalidConfig(format!(
                    "{kind} entry without a name"
                )));
            }
        }
        Ok(())
    }

    pub fn single_route(&self, kind: RouteKind) -> Option<&str> {
        match kind {
            RouteKind::Http => self.http_route.as_deref(),
            RouteKind::Grpc => self.grpc_route.as_deref(),
            RouteKind::Tcp => self.tcp_route.as_deref(),
            RouteKind::Tls => self.tls_route.as_deref(),
        }
        .filter(|name| !name.is_empty())
    }

    pub fn route_list(&self, kind: RouteKind) -> &[RouteEntry] {
        match kind {
            RouteKind::Http => &self.http_routes,
            RouteKind::Grpc => &self.grpc_routes,
            RouteKind::Tcp => &self.tcp_routes,
            RouteKind::Tls => &self.tls_routes,
        }
    }

    pub fn selector(&self, kind: RouteKind) -> Option<&LabelSelector> {
        match kind {
            RouteKind::Http => self.http_route_selector.as_ref(),
            RouteKind::Grpc => self.grpc_route_selector.as_ref(),
            RouteKind::Tcp => self.tcp_route_selector.as_ref(),
            RouteKind::Tls => self.tls_route_selector.as_ref(),
        }
    }

    /// Configured routes in kind order, single names folded into the lists
    ///
    /// A single name gets `useHeaderRoutes: true`; if the same name is also
    /// listed, the listed entry is kept with header routes switched on.
    pub fn route_targets(&self) -> Vec<RouteTarget> {
        let mut targets = Vec::new();
        for kind in RouteKind::ALL {
            for entry in self.route_list(kind) {
                add_target(&mut targets, kind, &entry.name, entry.use_header_routes);
            }
            if let Some(name) = self.single_route(kind) {
                add_target(&mut targets, kind, name, true);
            }
        }
        targets
    }

    pub fn namespace_or<'a>(&'a self, rollout_namespace: &'a str) -> &'a str {
        self.namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(rollout_namespace)
    }

    pub fn document_name(&self) -> &str {
        self.config_map
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DOCUMENT_NAME)
    }

    pub fn in_progress_label_key(&self) -> &str {
        self.in_progress_label_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .unwrap_or(DEFAULT_IN_PROGRESS_LABEL_KEY)
    }

    pub fn in_progress_label_value(&self) -> &str {
        self.in_progress_label_value
            .as_deref()
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_IN_PROGRESS_LABEL_VALUE)
    }
}

/// Add a route unless it is already targeted; a repeat can only switch header
/// routes on
pub fn add_target(targets: &mut Vec<RouteTarget>, kind: RouteKind, name: &str, use_header_routes: bool) {
    match targets
        .iter_mut()
        .find(|target| target.kind == kind && target.name == name)
    {
        Some(existing) => existing.use_header_routes |= use_header_routes,
        None => {
            // Keep kind order when discovery appends after the fact
            let at = targets
                .iter()
                .position(|target| target.kind > kind)
                .unwrap_or(targets.len());
            targets.insert(
                at,
                RouteTarget {
                    kind,
                    name: name.to_string(),
                    use_header_routes,
                },
            );
        }
    }
}

/// Render a label selector in the `key=value,key in (a,b)` syntax list calls take
pub fn selector_expression(selector: &LabelSelector) -> String {
    let mut terms: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();

    for requirement in selector.match_expressions.iter().flatten() {
        let values = requirement.values.as_deref().unwrap_or_default().join(",");
        let key = &requirement.key;
        terms.push(match requirement.operator.as_str() {
            "In" => format!("{key} in ({values})"),
            "NotIn" => format!("{key} notin ({values})"),
            "Exists" => key.clone(),
            "DoesNotExist" => format!("!{key}"),
            other => format!("{key} {other} ({values})"),
        });
    }
    terms.join(",")
}

/// Rollout state sent with every request
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct RolloutContext {
    pub name: String,

    pub namespace: String,

    #[serde(rename = "canaryService")]
    pub canary_service: String,

    #[serde(rename = "stableService")]
    pub stable_service: String,

    /// Header routes the rollout declares; removal targets these names
    #[serde(rename = "managedRoutes", default)]
    pub managed_routes: Vec<ManagedRoute>,

    /// Raw `GatewayAPITrafficRouting`
    #[serde(rename = "trafficRouting", default)]
    pub traffic_routing: serde_json::Value,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ManagedRoute {
    pub name: String,
}

/// Extra Service receiving a fixed share of traffic (experiments, analysis)
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct WeightDestination {
    #[serde(rename = "serviceName")]
    pub service_name: String,

    pub weight: i32,

    #[serde(rename = "podTemplateHash", default, skip_serializing_if = "Option::is_none")]
    pub pod_template_hash: Option<String>,
}

/// Header route requested by a rollout step
///
/// An empty match list asks for the managed route to be removed.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct SetHeaderRoute {
    pub name: String,

    #[serde(rename = "match", default)]
    pub matches: Vec<HeaderRoutingMatch>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct HeaderRoutingMatch {
    #[serde(rename = "headerName")]
    pub header_name: String,

    #[serde(rename = "headerValue")]
    pub header_value: StringMatch,
}

/// Exactly one of the fields is expected to be set
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct StringMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
