//! Traffic routing engine
//!
//! The engine is layered leaves first:
//! - `route` - uniform rule/backend-ref view over the four route kinds
//! - `backend` - locating backend refs and rules by service name
//! - `weight` - canary/stable weight split, additional destinations
//! - `header` - header match translation and managed rule injection
//! - `registry` - persisted managed route index map
//! - `transaction` - apply/compensate step runner
//! - `labels` - in-progress label maintenance
//! - `store` - Kubernetes access behind the `RouteStore` trait
//! - `config` - per-request traffic routing configuration
//! - `plugin` - the operation set the rollout orchestrator calls

pub mod backend;
pub mod config;
pub mod header;
pub mod labels;
pub mod plugin;
pub mod registry;
pub mod route;
pub mod store;
pub mod transaction;
pub mod weight;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use config::{
    GatewayAPITrafficRouting, HeaderRoutingMatch, ManagedRoute, RolloutContext, RouteEntry,
    SetHeaderRoute, StringMatch, WeightDestination,
};
pub use plugin::{TrafficRouterPlugin, PLUGIN_TYPE};
pub use registry::ManagedRouteMap;
pub use route::{GatewayRoute, RouteKind};
pub use store::{KubeRouteStore, RouteStore, StoreError};
pub use transaction::TransactionError;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("{kind} backendRefs list was not found")]
    BackendRefListNotFound { kind: RouteKind },

    #[error("{kind} backendRef {service:?} was not found")]
    BackendRefNotFound { kind: RouteKind, service: String },

    #[error("{kind} rule referencing {canary:?} and {stable:?} was not found")]
    RouteRuleNotFound {
        kind: RouteKind,
        canary: String,
        stable: String,
    },

    #[error("Invalid header match type for header {header:?}")]
    InvalidHeaderMatchType { header: String },

    #[error("Failed to delete {key:?} from managed route map: entry is absent")]
    ManagedRouteMapEntryDelete { key: String },

    #[error("Managed route {managed_route:?} points at rule {index} but {route:?} has {rules} rules")]
    ManagedRuleOutOfRange {
        managed_route: String,
        route: String,
        index: usize,
        rules: usize,
    },

    #[error("Failed to decode {key} from registry document: {source}")]
    DocumentDecode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode {key} for registry document: {source}")]
    DocumentEncode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid traffic routing config: {0}")]
    InvalidConfig(String),

    #[error("Desired weight {0} is outside 0..=100")]
    WeightOutOfRange(i32),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}
