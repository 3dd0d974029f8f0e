//! Canary traffic router for Kubernetes Gateway API routes
//!
//! Shapes traffic between a stable and a canary Service by rewriting backend
//! weights on HTTPRoute, GRPCRoute, TCPRoute and TLSRoute resources, and
//! injects header-matched rules for sticky canary testing.

pub mod router;
pub mod server;
