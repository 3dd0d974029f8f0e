//! Apply/compensate step runner
//!
//! Pairs writes that must land together, a route update and the registry
//! document update describing it. Steps run in order; when one fails, every
//! step already applied is compensated in reverse order and the failing step's
//! error is returned. Compensation failures are logged and carried on the
//! error instead of being dropped.

use super::registry::ManagedRouteMap;
use super::route::GatewayRoute;
use super::store::{RouteStore, StoreError};
use super::RoutingError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// One reversible write
#[async_trait]
pub trait TransactionStep: Send {
    fn describe(&self) -> String;

    async fn apply(&mut self) -> Result<(), StoreError>;

    /// Undo a successful `apply`
    async fn compensate(&mut self) -> Result<(), StoreError>;
}

/// A compensation that failed, leaving its step's write in place
#[derive(Debug)]
pub struct CompensationFailure {
    pub step: String,
    pub error: StoreError,
}

#[derive(Debug, Error)]
#[error("{source}")]
pub struct TransactionError {
    /// Step whose apply failed
    pub step: String,
    #[source]
    pub source: StoreError,
    /// Non-empty when state may be left inconsistent
    pub compensation_failures: Vec<CompensationFailure>,
}

impl TransactionError {
    pub fn is_consistent(&self) -> bool {
        self.compensation_failures.is_empty()
    }
}

/// Apply `steps` in order, compensating the applied prefix on failure
pub async fn run(steps: &mut [&mut dyn TransactionStep]) -> Result<(), TransactionError> {
    for failed in 0..steps.len() {
        let Err(source) = steps[failed].apply().await else {
            continue;
        };
        let step = steps[failed].describe();
        warn!(step = %step, error = %source, "Transaction step failed, compensating");

        let mut compensation_failures = Vec::new();
        for applied in steps[..failed].iter_mut().rev() {
            let name = applied.describe();
            match applied.compensate().await {
                Ok(()) => info!(step = %name, "Compensated transaction step"),
                Err(error) => {
                    error!(step = %name, error = %error, "Compensation failed, state may be inconsistent");
                    compensation_failures.push(CompensationFailure { step: name, error });
                }
            }
        }
        return Err(TransactionError {
            step,
            source,
            compensation_failures,
        });
    }
    Ok(())
}

/// Replace a route, reverting to its pre-image on compensation
pub struct RouteWrite {
    store: Arc<dyn RouteStore>,
    namespace: String,
    before: GatewayRoute,
    after: GatewayRoute,
    written: Option<GatewayRoute>,
}

impl RouteWrite {
    pub fn new(
        store: Arc<dyn RouteStore>,
        namespace: &str,
        before: GatewayRoute,
        after: GatewayRoute,
    ) -> Self {
        Self {
            store,
            namespace: namespace.to_string(),
            before,
            after,
            written: None,
        }
    }
}

#[async_trait]
impl TransactionStep for RouteWrite {
    fn describe(&self) -> String {
        format!("update {} {}/{}", self.after.kind(), self.namespace, self.after.name())
    }

    async fn apply(&mut self) -> Result<(), StoreError> {
        self.written = Some(self.store.update_route(&self.namespace, &self.after).await?);
        Ok(())
    }

    async fn compensate(&mut self) -> Result<(), StoreError> {
        let mut revert = self.before.clone();
        // The forward write moved the resourceVersion on
        if let Some(written) = &self.written {
            revert.metadata_mut().resource_version = written.metadata().resource_version.clone();
        }
        self.store.update_route(&self.namespace, &revert).await?;
        self.written = None;
        Ok(())
    }
}

/// Store a new managed route map in the registry document, restoring the
/// previous map on compensation
pub struct DocumentWrite {
    store: Arc<dyn RouteStore>,
    namespace: String,
    forward: ConfigMap,
    revert: ConfigMap,
    written: Option<ConfigMap>,
}

impl DocumentWrite {
    /// Encodes both maps up front so apply and compensate only do I/O
    pub fn new(
        store: Arc<dyn RouteStore>,
        namespace: &str,
        document: &ConfigMap,
        key: &str,
        before: &ManagedRouteMap,
        after: &ManagedRouteMap,
    ) -> Result<Self, RoutingError> {
        let mut forward = document.clone();
        after.store(&mut forward, key)?;
        let mut revert = document.clone();
        before.store(&mut revert, key)?;
        Ok(Self {
            store,
            namespace: namespace.to_string(),
            forward,
            revert,
            written: None,
        })
    }

    /// The document as stored by `apply`
    pub fn into_written(self) -> Option<ConfigMap> {
        self.written
    }
}

#[async_trait]
impl TransactionStep for DocumentWrite {
    fn describe(&self) -> String {
        format!(
            "update ConfigMap {}/{}",
            self.namespace,
            self.forward.metadata.name.as_deref().unwrap_or_default()
        )
    }

    async fn apply(&mut self) -> Result<(), StoreError> {
        self.written = Some(self.store.update_document(&self.namespace, &self.forward).await?);
        Ok(())
    }

    async fn compensate(&mut self) -> Result<(), StoreError> {
        let mut revert = self.revert.clone();
        if let Some(written) = &self.written {
            revert.metadata.resource_version = written.metadata.resource_version.clone();
        }
        self.store.update_document(&self.namespace, &revert).await?;
        self.written = None;
        Ok(())
    }
}

#[cfg(test)]
#[path = "transaction_test.rs"]
mod tests;
