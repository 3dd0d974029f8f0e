//! Kubernetes access for routes and the registry document
//!
//! Production code uses `KubeRouteStore`, which talks to the API server with
//! full `replace` updates, so a stale `resourceVersion` comes back as a
//! conflict. Tests use `InMemoryRouteStore`, which enforces the same
//! `resourceVersion` rules and can be told to fail writes.

use super::config::selector_expression;
use super::route::{GatewayRoute, RouteKind};
use async_trait::async_trait;
use gateway_api::apis::experimental::tcproutes::TCPRoute;
use gateway_api::apis::experimental::tlsroutes::TLSRoute;
use gateway_api::apis::standard::grpcroutes::GRPCRoute;
use gateway_api::apis::standard::httproutes::HTTPRoute;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, ObjectMeta, PostParams};
use kube::{Api, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict writing {0}")]
    Conflict(String),

    #[error("Kubernetes API error on {what}: {source}")]
    KubeError {
        what: String,
        #[source]
        source: kube::Error,
    },
}

impl StoreError {
    fn from_kube(error: kube::Error, what: &str) -> Self {
        match error {
            kube::Error::Api(err) if err.code == 404 => StoreError::NotFound(what.to_string()),
            kube::Error::Api(err) if err.code == 409 => StoreError::Conflict(what.to_string()),
            source => StoreError::KubeError {
                what: what.to_string(),
                source,
            },
        }
    }
}

/// Reads and writes routes and the registry document
#[async_trait]
pub trait RouteStore: Send + Sync {
    async fn get_route(
        &self,
        namespace: &str,
        kind: RouteKind,
        name: &str,
    ) -> Result<GatewayRoute, StoreError>;

    /// Replace the stored route; fails with `Conflict` on a stale resourceVersion
    async fn update_route(
        &self,
        namespace: &str,
        route: &GatewayRoute,
    ) -> Result<GatewayRoute, StoreError>;

    /// Names of the routes of `kind` matching `selector`
    async fn list_routes(
        &self,
        namespace: &str,
        kind: RouteKind,
        selector: &LabelSelector,
    ) -> Result<Vec<String>, StoreError>;

    async fn get_document(&self, namespace: &str, name: &str)
        -> Result<Option<ConfigMap>, StoreError>;

    /// Create an empty document
    async fn create_document(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError>;

    async fn update_document(
        &self,
        namespace: &str,
        document: &ConfigMap,
    ) -> Result<ConfigMap, StoreError>;
}

/// `RouteStore` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeRouteStore {
    client: kube::Client,
}

impl KubeRouteStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn replace<K>(api: Api<K>, object: &K, what: &str) -> Result<K, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    api.replace(&object.name_any(), &PostParams::default(), object)
        .await
        .map_err(|e| StoreError::from_kube(e, what))
}

async fn list_names<K>(api: Api<K>, params: &ListParams, what: &str) -> Result<Vec<String>, StoreError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let list = api
        .list(params)
        .await
        .map_err(|e| StoreError::from_kube(e, what))?;
    Ok(list.items.iter().map(|item| item.name_any()).collect())
}

#[async_trait]
impl RouteStore for KubeRouteStore {
    async fn get_route(
        &self,
        namespace: &str,
        kind: RouteKind,
        name: &str,
    ) -> Result<GatewayRoute, StoreError> {
        let what = format!("{kind} {namespace}/{name}");
        let map_err = |e| StoreError::from_kube(e, &what);
        Ok(match kind {
            RouteKind::Http => self.api::<HTTPRoute>(namespace).get(name).await.map_err(map_err)?.into(),
            RouteKind::Grpc => self.api::<GRPCRoute>(namespace).get(name).await.map_err(map_err)?.into(),
            RouteKind::Tcp => self.api::<TCPRoute>(namespace).get(name).await.map_err(map_err)?.into(),
            RouteKind::Tls => self.api::<TLSRoute>(namespace).get(name).await.map_err(map_err)?.into(),
        })
    }

    async fn update_route(
        &self,
        namespace: &str,
        route: &GatewayRoute,
    ) -> Result<GatewayRoute, StoreError> {
        let what = format!("{} {namespace}/{}", route.kind(), route.name());
        Ok(match route {
            GatewayRoute::Http(r) => replace(self.api(namespace), r, &what).await?.into(),
            GatewayRoute::Grpc(r) => replace(self.api(namespace), r, &what).await?.into(),
            GatewayRoute::Tcp(r) => replace(self.api(namespace), r, &what).await?.into(),
            GatewayRoute::Tls(r) => replace(self.api(namespace), r, &what).await?.into(),
        })
    }

    async fn list_routes(
        &self,
        namespace: &str,
        kind: RouteKind,
        selector: &LabelSelector,
    ) -> Result<Vec<String>, StoreError> {
        let params = ListParams::default().labels(&selector_expression(selector));
        let what = format!("{kind} list in {namespace}");
        match kind {
            RouteKind::Http => list_names(self.api::<HTTPRoute>(namespace), &params, &what).await,
            RouteKind::Grpc => list_names(self.api::<GRPCRoute>(namespace), &params, &what).await,
            RouteKind::Tcp => list_names(self.api::<TCPRoute>(namespace), &params, &what).await,
            RouteKind::Tls => list_names(self.api::<TLSRoute>(namespace), &params, &what).await,
        }
    }

    async fn get_document(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, StoreError> {
        match self.api::<ConfigMap>(namespace).get(name).await {
            Ok(document) => Ok(Some(document)),
            Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
            Err(e) => Err(StoreError::from_kube(e, &format!("ConfigMap {namespace}/{name}"))),
        }
    }

    async fn create_document(&self, namespace: &str, name: &str) -> Result<ConfigMap, StoreError> {
        let document = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.api::<ConfigMap>(namespace)
            .create(&PostParams::default(), &document)
            .await
            .map_err(|e| StoreError::from_kube(e, &format!("ConfigMap {namespace}/{name}")))
    }

    async fn update_document(
        &self,
        namespace: &str,
        document: &ConfigMap,
    ) -> Result<ConfigMap, StoreError> {
        let what = format!("ConfigMap {namespace}/{}", document.name_any());
        replace(self.api(namespace), document, &what).await
    }
}

#[cfg(test)]
pub use in_memory::InMemoryRouteStore;

#[cfg(test)]
mod in_memory {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// In-memory `RouteStore` with resourceVersion checks and failure injection
    #[derive(Default)]
    pub struct InMemoryRouteStore {
        state: Mutex<State>,
    }

    #[derive(Default)]
    struct State {
        routes: BTreeMap<(String, RouteKind, String), GatewayRoute>,
        documents: BTreeMap<(String, String), ConfigMap>,
        version: u64,
        route_updates_allowed: Option<usize>,
        fail_document_updates: bool,
        route_updates: usize,
        document_updates: usize,
    }

    impl State {
        fn next_version(&mut self) -> String {
            self.version += 1;
            format!("v{}", self.version)
        }
    }

    fn check_version(
        stored: &ObjectMeta,
        incoming: &ObjectMeta,
        what: &str,
    ) -> Result<(), StoreError> {
        match (&stored.resource_version, &incoming.resource_version) {
            (Some(stored), Some(incoming)) if stored != incoming => {
                Err(StoreError::Conflict(what.to_string()))
            }
            _ => Ok(()),
        }
    }

    impl InMemoryRouteStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Seed a route; its namespace defaults to "default"
        pub fn with_route(self, route: impl Into<GatewayRoute>) -> Self {
            let mut route = route.into();
            {
                let mut state = self.state.lock().unwrap();
                let version = state.next_version();
                route.metadata_mut().resource_version = Some(version);
                let namespace = route
                    .metadata()
                    .namespace
                    .clone()
                    .unwrap_or_else(|| "default".to_string());
                state
                    .routes
                    .insert((namespace, route.kind(), route.name()), route);
            }
            self
        }

        pub fn with_document(self, namespace: &str, mut document: ConfigMap) -> Self {
            {
                let mut state = self.state.lock().unwrap();
                document.metadata.resource_version = Some(state.next_version());
                state
                    .documents
                    .insert((namespace.to_string(), document.name_any()), document);
            }
            self
        }

        /// Let `count` more route updates succeed, then fail every later one
        pub fn allow_route_updates(&self, count: usize) {
            self.state.lock().unwrap().route_updates_allowed = Some(count);
        }

        pub fn fail_document_updates(&self) {
            self.state.lock().unwrap().fail_document_updates = true;
        }

        pub fn route(&self, namespace: &str, kind: RouteKind, name: &str) -> GatewayRoute {
            self.state.lock().unwrap().routes[&(namespace.to_string(), kind, name.to_string())]
                .clone()
        }

        pub fn document(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
            self.state
                .lock()
                .unwrap()
                .documents
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        }

        pub fn route_update_count(&self) -> usize {
            self.state.lock().unwrap().route_updates
        }

        pub fn document_update_count(&self) -> usize {
            self.state.lock().unwrap().document_updates
        }
    }

    #[async_trait]
    impl RouteStore for InMemoryRouteStore {
        async fn get_route(
            &self,
            namespace: &str,
            kind: RouteKind,
            name: &str,
        ) -> Result<GatewayRoute, StoreError> {
            self.state
                .lock()
                .unwrap()
                .routes
                .get(&(namespace.to_string(), kind, name.to_string()))
                .cloned()
                .ok_or_else(|| StoreError::NotFound(format!("{kind} {namespace}/{name}")))
        }

        async fn update_route(
            &self,
            namespace: &str,
            route: &GatewayRoute,
        ) -> Result<GatewayRoute, StoreError> {
            let mut state = self.state.lock().unwrap();
            let what = format!("{} {namespace}/{}", route.kind(), route.name());
            if let Some(allowed) = state.route_updates_allowed.as_mut() {
                if *allowed == 0 {
                    return Err(StoreError::Conflict(what));
                }
                *allowed -= 1;
            }

            let key = (namespace.to_string(), route.kind(), route.name());
            let stored = state
                .routes
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(what.clone()))?;
            check_version(stored.metadata(), route.metadata(), &what)?;

            let mut written = route.clone();
            written.metadata_mut().resource_version = Some(state.next_version());
            state.routes.insert(key, written.clone());
            state.route_updates += 1;
            Ok(written)
        }

        async fn list_routes(
            &self,
            namespace: &str,
            kind: RouteKind,
            selector: &LabelSelector,
        ) -> Result<Vec<String>, StoreError> {
            let wanted = selector.match_labels.clone().unwrap_or_default();
            Ok(self
                .state
                .lock()
                .unwrap()
                .routes
                .iter()
                .filter(|((ns, k, _), _)| ns == namespace && *k == kind)
                .filter(|(_, route)| {
                    let labels = route.metadata().labels.clone().unwrap_or_default();
                    wanted.iter().all(|(key, value)| labels.get(key) == Some(value))
                })
                .map(|((_, _, name), _)| name.clone())
                .collect())
        }

        async fn get_document(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<Option<ConfigMap>, StoreError> {
            Ok(self.document(namespace, name))
        }

        async fn create_document(
            &self,
            namespace: &str,
            name: &str,
        ) -> Result<ConfigMap, StoreError> {
            let mut state = self.state.lock().unwrap();
            let key = (namespace.to_string(), name.to_string());
            if state.documents.contains_key(&key) {
                return Err(StoreError::Conflict(format!("ConfigMap {namespace}/{name}")));
            }
            let document = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    resource_version: Some(state.next_version()),
                    ..Default::default()
                },
                ..Default::default()
            };
            state.documents.insert(key, document.clone());
            Ok(document)
        }

        async fn update_document(
            &self,
            namespace: &str,
            document: &ConfigMap,
        ) -> Result<ConfigMap, StoreError> {
            let mut state = self.state.lock().unwrap();
            let what = format!("ConfigMap {namespace}/{}", document.name_any());
            if state.fail_document_updates {
                return Err(StoreError::Conflict(what));
            }

            let key = (namespace.to_string(), document.name_any());
            let stored = state
                .documents
                .get(&key)
                .ok_or_else(|| StoreError::NotFound(what.clone()))?;
            check_version(&stored.metadata, &document.metadata, &what)?;

            let mut written = document.clone();
            written.metadata.resource_version = Some(state.next_version());
            state.documents.insert(key, written.clone());
            state.document_updates += 1;
            Ok(written)
        }
    }
}
