//! Uniform view over the four Gateway API route kinds
//!
//! HTTPRoute, GRPCRoute, TCPRoute and TLSRoute all carry an ordered list of
//! rules, and every rule carries an ordered list of backend references with a
//! name and an optional weight. The `Rule` and `BackendRef` traits expose just
//! that shape so weight distribution, rule lookup and managed-rule removal are
//! written once and monomorphised per kind.
//!
//! Rule identity is positional: the managed route registry stores rule
//! *indices*, so nothing here ever reorders rules.

use gateway_api::apis::experimental::tcproutes::{TCPRoute, TCPRouteRules, TCPRouteRulesBackendRefs};
use gateway_api::apis::experimental::tlsroutes::{TLSRoute, TLSRouteRules, TLSRouteRulesBackendRefs};
use gateway_api::apis::standard::grpcroutes::{GRPCRoute, GRPCRouteRules, GRPCRouteRulesBackendRefs};
use gateway_api::apis::standard::httproutes::{HTTPRoute, HTTPRouteRules, HTTPRouteRulesBackendRefs};
use kube::api::ObjectMeta;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The route kinds this router knows how to shape traffic on
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum RouteKind {
    #[serde(rename = "HTTPRoute")]
    Http,
    #[serde(rename = "GRPCRoute")]
    Grpc,
    #[serde(rename = "TCPRoute")]
    Tcp,
    #[serde(rename = "TLSRoute")]
    Tls,
}

impl RouteKind {
    /// All kinds, in the order requests process them
    pub const ALL: [RouteKind; 4] = [
        RouteKind::Http,
        RouteKind::Grpc,
        RouteKind::Tcp,
        RouteKind::Tls,
    ];

    /// Key of this kind's managed route map inside the registry document
    pub fn registry_key(self) -> &'static str {
        match self {
            RouteKind::Http => "httpManagedRoutes",
            RouteKind::Grpc => "grpcManagedRoutes",
            RouteKind::Tcp => "tcpManagedRoutes",
            RouteKind::Tls => "tlsManagedRoutes",
        }
    }

    /// Only kinds with header match predicates can carry header routes
    pub fn supports_header_routes(self) -> bool {
        matches!(self, RouteKind::Http | RouteKind::Grpc)
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RouteKind::Http => "HTTPRoute",
            RouteKind::Grpc => "GRPCRoute",
            RouteKind::Tcp => "TCPRoute",
            RouteKind::Tls => "TLSRoute",
        })
    }
}

/// A backend reference inside a route rule
pub trait BackendRef: Clone {
    fn name(&self) -> &str;

    fn weight(&self) -> Option<i32>;

    fn set_weight(&mut self, weight: Option<i32>);

    fn port(&self) -> Option<i32>;

    /// Point this reference at another Service, keeping port, group and kind
    fn retarget(&mut self, name: &str);

    /// Reset to a bare core/v1 Service reference without per-backend filters
    fn as_plain_service(&mut self);
}

/// A route rule: an ordered list of backend references plus kind-specific
/// matches and filters that are cloned, never interpreted
pub trait Rule: Clone {
    type Ref: BackendRef;

    fn backend_refs(&self) -> &[Self::Ref];

    fn backend_refs_mut(&mut self) -> &mut Vec<Self::Ref>;
}

/// Lazy, restartable traversal of `(rule index, backend ref index, backend ref)`
/// in rule order
pub fn indexed_backend_refs<R: Rule>(
    rules: &[R],
) -> impl Iterator<Item = (usize, usize, &R::Ref)> + '_ {
    rules.iter().enumerate().flat_map(|(rule_index, rule)| {
        rule.backend_refs()
            .iter()
            .enumerate()
            .map(move |(ref_index, backend_ref)| (rule_index, ref_index, backend_ref))
    })
}

/// Generated CRD types model optional lists as `Option<Vec<T>>` and required
/// ones as `Vec<T>`; this lets the trait impls read both the same way.
pub(crate) trait ListField<T> {
    fn items(&self) -> &[T];

    fn items_mut(&mut self) -> &mut Vec<T>;
}

impl<T> ListField<T> for Option<Vec<T>> {
    fn items(&self) -> &[T] {
        self.as_deref().unwrap_or(&[])
    }

    fn items_mut(&mut self) -> &mut Vec<T> {
        self.get_or_insert_with(Vec::new)
    }
}

impl<T> ListField<T> for Vec<T> {
    fn items(&self) -> &[T] {
        self
    }

    fn items_mut(&mut self) -> &mut Vec<T> {
        self
    }
}

macro_rules! impl_backend_ref {
    ($ty:ty) => {
        impl_backend_ref!(@impl $ty, |_this| {});
    };
    ($ty:ty, with_filters) => {
        impl_backend_ref!(@impl $ty, |this| this.filters = None);
    };
    (@impl $ty:ty, |$this:ident| $clear_filters:expr) => {
        impl BackendRef for $ty {
            fn name(&self) -> &str {
                &self.name
            }

            fn weight(&self) -> Option<i32> {
                self.weight
            }

            fn set_weight(&mut self, weight: Option<i32>) {
                self.weight = weight;
            }

            fn port(&self) -> Option<i32> {
                self.port
            }

            fn retarget(&mut self, name: &str) {
                self.name = name.to_string();
            }

            fn as_plain_service(&mut self) {
                self.group = Some(String::new());
                self.kind = Some("Service".to_string());
                let $this = self;
                $clear_filters;
            }
        }
    };
}

impl_backend_ref!(HTTPRouteRulesBackendRefs, with_filters);
impl_backend_ref!(GRPCRouteRulesBackendRefs, with_filters);
impl_backend_ref!(TCPRouteRulesBackendRefs);
impl_backend_ref!(TLSRouteRulesBackendRefs);

macro_rules! impl_rule {
    ($rule:ty, $backend_ref:ty) => {
        impl Rule for $rule {
            type Ref = $backend_ref;

            fn backend_refs(&self) -> &[Self::Ref] {
                self.backend_refs.items()
            }

            fn backend_refs_mut(&mut self) -> &mut Vec<Self::Ref> {
                self.backend_refs.items_mut()
            }
        }
    };
}

impl_rule!(HTTPRouteRules, HTTPRouteRulesBackendRefs);
impl_rule!(GRPCRouteRules, GRPCRouteRulesBackendRefs);
impl_rule!(TCPRouteRules, TCPRouteRulesBackendRefs);
impl_rule!(TLSRouteRules, TLSRouteRulesBackendRefs);

/// A route resource of any supported kind
#[derive(Debug, Clone)]
pub enum GatewayRoute {
    Http(HTTPRoute),
    Grpc(GRPCRoute),
    Tcp(TCPRoute),
    Tls(TLSRoute),
}

/// Run `$body` with `$rules` bound to the route's rule list, whatever its kind
///
/// Each arm is type-checked separately, so `$body` may call functions that are
/// generic over `Rule`.
macro_rules! with_rules {
    ($route:expr, |$rules:ident| $body:expr) => {
        match $route {
            $crate::router::route::GatewayRoute::Http(route) => {
                let $rules = $crate::router::route::ListField::items(&route.spec.rules);
                $body
            }
            $crate::router::route::GatewayRoute::Grpc(route) => {
                let $rules = $crate::router::route::ListField::items(&route.spec.rules);
                $body
            }
            $crate::router::route::GatewayRoute::Tcp(route) => {
                let $rules = $crate::router::route::ListField::items(&route.spec.rules);
                $body
            }
            $crate::router::route::GatewayRoute::Tls(route) => {
                let $rules = $crate::router::route::ListField::items(&route.spec.rules);
                $body
            }
        }
    };
}

/// Mutable counterpart of `with_rules!`
macro_rules! with_rules_mut {
    ($route:expr, |$rules:ident| $body:expr) => {
        match $route {
            $crate::router::route::GatewayRoute::Http(route) => {
                let $rules = $crate::router::route::ListField::items_mut(&mut route.spec.rules);
                $body
            }
            $crate::router::route::GatewayRoute::Grpc(route) => {
                let $rules = $crate::router::route::ListField::items_mut(&mut route.spec.rules);
                $body
            }
            $crate::router::route::GatewayRoute::Tcp(route) => {
                let $rules = $crate::router::route::ListField::items_mut(&mut route.spec.rules);
                $body
            }
            $crate::router::route::GatewayRoute::Tls(route) => {
                let $rules = $crate::router::route::ListField::items_mut(&mut route.spec.rules);
                $body
            }
        }
    };
}

pub(crate) use {with_rules, with_rules_mut};

impl GatewayRoute {
    pub fn kind(&self) -> RouteKind {
        match self {
            GatewayRoute::Http(_) => RouteKind::Http,
            GatewayRoute::Grpc(_) => RouteKind::Grpc,
            GatewayRoute::Tcp(_) => RouteKind::Tcp,
            GatewayRoute::Tls(_) => RouteKind::Tls,
        }
    }

    pub fn name(&self) -> String {
        match self {
            GatewayRoute::Http(route) => route.name_any(),
            GatewayRoute::Grpc(route) => route.name_any(),
            GatewayRoute::Tcp(route) => route.name_any(),
            GatewayRoute::Tls(route) => route.name_any(),
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            GatewayRoute::Http(route) => &route.metadata,
            GatewayRoute::Grpc(route) => &route.metadata,
            GatewayRoute::Tcp(route) => &route.metadata,
            GatewayRoute::Tls(route) => &route.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            GatewayRoute::Http(route) => &mut route.metadata,
            GatewayRoute::Grpc(route) => &mut route.metadata,
            GatewayRoute::Tcp(route) => &mut route.metadata,
            GatewayRoute::Tls(route) => &mut route.metadata,
        }
    }

    /// Number of rules currently on the route
    pub fn rule_count(&self) -> usize {
        with_rules!(self, |rules| rules.len())
    }

    /// `(name, weight)` of every backend ref, grouped per rule
    pub fn backend_weights(&self) -> Vec<Vec<(String, Option<i32>)>> {
        with_rules!(self, |rules| rules
            .iter()
            .map(|rule| {
                rule.backend_refs()
                    .iter()
                    .map(|backend_ref| (backend_ref.name().to_string(), backend_ref.weight()))
                    .collect()
            })
            .collect())
    }
}

impl From<HTTPRoute> for GatewayRoute {
    fn from(route: HTTPRoute) -> Self {
        GatewayRoute::Http(route)
    }
}

impl From<GRPCRoute> for GatewayRoute {
    fn from(route: GRPCRoute) -> Self {
        GatewayRoute::Grpc(route)
    }
}

impl From<TCPRoute> for GatewayRoute {
    fn from(route: TCPRoute) -> Self {
        GatewayRoute::Tcp(route)
    }
}

impl From<TLSRoute> for GatewayRoute {
    fn from(route: TLSRoute) -> Self {
        GatewayRoute::Tls(route)
    }
}

#[cfg(test)]
#[path = "route_test.rs"]
mod tests;
