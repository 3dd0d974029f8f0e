//! Route fixtures shared by the router tests
#![allow(clippy::unwrap_used)]

use gateway_api::apis::experimental::tcproutes::TCPRoute;
use gateway_api::apis::experimental::tlsroutes::TLSRoute;
use gateway_api::apis::standard::grpcroutes::GRPCRoute;
use gateway_api::apis::standard::httproutes::{HTTPRoute, HTTPRouteRules};
use serde_json::{json, Value};

/// Backend refs as `(service, weight)` pairs, one slice per rule
pub type RuleSpec<'a> = &'a [(&'a str, i32)];

fn rules_json(rules: &[RuleSpec<'_>]) -> Value {
    Value::Array(
        rules
            .iter()
            .map(|refs| {
                let backend_refs: Vec<Value> = refs
                    .iter()
                    .map(|(name, weight)| json!({ "name": name, "port": 80, "weight": weight }))
                    .collect();
                json!({ "backendRefs": backend_refs })
            })
            .collect(),
    )
}

fn route_json(api_version: &str, kind: &str, name: &str, rules: &[RuleSpec<'_>]) -> Value {
    json!({
        "apiVersion": api_version,
        "kind": kind,
        "metadata": { "name": name, "namespace": "default", "resourceVersion": "1" },
        "spec": { "rules": rules_json(rules) }
    })
}

pub fn http_rules(rules: &[RuleSpec<'_>]) -> Vec<HTTPRouteRules> {
    serde_json::from_value(rules_json(rules)).unwrap()
}

pub fn http_route(name: &str, rules: &[RuleSpec<'_>]) -> HTTPRoute {
    serde_json::from_value(route_json("gateway.networking.k8s.io/v1", "HTTPRoute", name, rules))
        .unwrap()
}

pub fn grpc_route(name: &str, rules: &[RuleSpec<'_>]) -> GRPCRoute {
    serde_json::from_value(route_json("gateway.networking.k8s.io/v1", "GRPCRoute", name, rules))
        .unwrap()
}

pub fn tcp_route(name: &str, rules: &[RuleSpec<'_>]) -> TCPRoute {
    serde_json::from_value(route_json(
        "gateway.networking.k8s.io/v1alpha2",
        "TCPRoute",
        name,
        rules,
    ))
    .unwrap()
}

/// TLSRoute requires `spec.hostnames`, so this one carries `example.com`
pub fn tls_route(name: &str, rules: &[RuleSpec<'_>]) -> TLSRoute {
    let mut route = route_json("gateway.networking.k8s.io/v1alpha2", "TLSRoute", name, rules);
    route["spec"]["hostnames"] = json!(["example.com"]);
    serde_json::from_value(route).unwrap()
}

/// An HTTPRoute whose single rule matches `/api` with a query parameter and
/// carries a request header filter
pub fn http_route_with_matches(name: &str) -> HTTPRoute {
    serde_yaml::from_str(&format!(
        r#"
apiVersion: gateway.networking.k8s.io/v1
kind: HTTPRoute
metadata:
  name: {name}
  namespace: default
  resourceVersion: "1"
spec:
  parentRefs:
    - name: gateway
  rules:
    - name: primary
      matches:
        - path:
            type: PathPrefix
            value: /api
          queryParams:
            - name: tier
              value: gold
        - path:
            type: Exact
            value: /health
      filters:
        - type: RequestHeaderModifier
          requestHeaderModifier:
            add:
              - name: x-routed-by
                value: gateway
      backendRefs:
        - name: stable
          port: 8080
          weight: 100
        - name: canary
          port: 8080
          weight: 0
"#
    ))
    .unwrap()
}

/// A GRPCRoute whose single rule matches one service method
pub fn grpc_route_with_method(name: &str) -> GRPCRoute {
    serde_yaml::from_str(&format!(
        r#"
apiVersion: gateway.networking.k8s.io/v1
kind: GRPCRoute
metadata:
  name: {name}
  namespace: default
  resourceVersion: "1"
spec:
  rules:
    - matches:
        - method:
            service: echo.Echo
            method: Say
      backendRefs:
        - name: stable
          port: 9090
          weight: 100
        - name: canary
          port: 9090
          weight: 0
"#
    ))
    .unwrap()
}
