//! Header-matched managed rules
//!
//! A header route sends requests carrying given headers to the canary only.
//! It is built by cloning the rule that splits traffic between canary and
//! stable, swapping its header predicates for the requested ones and pointing
//! it at the canary alone. The new rule is appended, so its index is the last
//! one and every existing rule keeps its position.

use super::backend::find_rule_with_services;
use super::config::HeaderRoutingMatch;
use super::route::{BackendRef, Rule, RouteKind};
use super::RoutingError;
use gateway_api::apis::standard::grpcroutes::{
    GRPCRouteRules, GRPCRouteRulesMatches, GRPCRouteRulesMatchesHeaders,
    GRPCRouteRulesMatchesHeadersType,
};
use gateway_api::apis::standard::httproutes::{
    HTTPRouteRules, HTTPRouteRulesMatches, HTTPRouteRulesMatchesHeaders,
    HTTPRouteRulesMatchesHeadersType,
};

/// How a translated header predicate compares values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderMatchType {
    Exact,
    RegularExpression,
}

/// A header predicate in the shape Gateway API routes expect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderMatch {
    pub name: String,
    pub match_type: HeaderMatchType,
    pub value: String,
}

/// Translate requested header conditions into route header predicates
///
/// - exact `v` becomes an Exact match on `v`
/// - prefix `v` becomes a RegularExpression match on `v.*`
/// - regex `v` becomes a RegularExpression match on `v`
///
/// When several are set the first non-empty one in that order wins. None set is
/// `InvalidHeaderMatchType`.
pub fn translate_header_matches(
    matches: &[HeaderRoutingMatch],
) -> Result<Vec<HeaderMatch>, RoutingError> {
    matches
        .iter()
        .map(|requested| {
            let value = &requested.header_value;
            let (match_type, value) = if let Some(exact) = non_empty(&value.exact) {
                (HeaderMatchType::Exact, exact.to_string())
            } else if let Some(prefix) = non_empty(&value.prefix) {
                (HeaderMatchType::RegularExpression, format!("{prefix}.*"))
            } else if let Some(regex) = non_empty(&value.regex) {
                (HeaderMatchType::RegularExpression, regex.to_string())
            } else {
                return Err(RoutingError::InvalidHeaderMatchType {
                    header: requested.header_name.clone(),
                });
            };
            Ok(HeaderMatch {
                name: requested.header_name.clone(),
                match_type,
                value,
            })
        })
        .collect()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Rules that can carry header predicates
pub trait HeaderRule: Rule {
    /// Clone of this rule with every match entry's headers replaced by
    /// `headers`, or a single headers-only match if the rule has none
    fn with_header_matches(&self, headers: &[HeaderMatch]) -> Self;
}

impl HeaderRule for HTTPRouteRules {
    fn with_header_matches(&self, headers: &[HeaderMatch]) -> Self {
        let headers: Vec<HTTPRouteRulesMatchesHeaders> = headers
            .iter()
            .map(|header| HTTPRouteRulesMatchesHeaders {
                name: header.name.clone(),
                value: header.value.clone(),
                r#type: Some(match header.match_type {
                    HeaderMatchType::Exact => HTTPRouteRulesMatchesHeadersType::Exact,
                    HeaderMatchType::RegularExpression => {
                        HTTPRouteRulesMatchesHeadersType::RegularExpression
                    }
                }),
            })
            .collect();

        let matches = match self.matches.as_deref() {
            Some(existing) if !existing.is_empty() => existing
                .iter()
                .map(|m| HTTPRouteRulesMatches {
                    headers: Some(headers.clone()),
                    ..m.clone()
                })
                .collect(),
            _ => vec![HTTPRouteRulesMatches {
                headers: Some(headers),
                ..Default::default()
            }],
        };

        let mut rule = self.clone();
        rule.name = None;
        rule.matches = Some(matches);
        rule
    }
}

impl HeaderRule for GRPCRouteRules {
    fn with_header_matches(&self, headers: &[HeaderMatch]) -> Self {
        let headers: Vec<GRPCRouteRulesMatchesHeaders> = headers
            .iter()
            .map(|header| GRPCRouteRulesMatchesHeaders {
                name: header.name.clone(),
                value: header.value.clone(),
                r#type: Some(match header.match_type {
                    HeaderMatchType::Exact => GRPCRouteRulesMatchesHeadersType::Exact,
                    HeaderMatchType::RegularExpression => {
                        GRPCRouteRulesMatchesHeadersType::RegularExpression
                    }
                }),
            })
            .collect();

        let matches = match self.matches.as_deref() {
            Some(existing) if !existing.is_empty() => existing
                .iter()
                .map(|m| GRPCRouteRulesMatches {
                    headers: Some(headers.clone()),
                    ..m.clone()
                })
                .collect(),
            _ => vec![GRPCRouteRulesMatches {
                headers: Some(headers),
                ..Default::default()
            }],
        };

        let mut rule = self.clone();
        rule.name = None;
        rule.matches = Some(matches);
        rule
    }
}

/// Append a managed rule sending requests that match `headers` to `canary`
///
/// The template is the first rule referencing both `canary` and `stable`. The
/// new rule keeps the template's filters, routes only to the canary on the
/// same port, and leaves the weight unset. Returns the new rule's index.
pub fn inject_header_route<R: HeaderRule>(
    kind: RouteKind,
    rules: &mut Vec<R>,
    canary: &str,
    stable: &str,
    headers: &[HeaderMatch],
) -> Result<usize, RoutingError> {
    let template = &rules[find_rule_with_services(kind, rules, canary, stable)?];

    let mut canary_ref = template
        .backend_refs()
        .iter()
        .find(|backend_ref| backend_ref.name() == canary)
        .cloned()
        .ok_or_else(|| RoutingError::BackendRefNotFound {
            kind,
            service: canary.to_string(),
        })?;
    canary_ref.set_weight(None);
    canary_ref.as_plain_service();

    let mut rule = template.with_header_matches(headers);
    *rule.backend_refs_mut() = vec![canary_ref];

    rules.push(rule);
    Ok(rules.len() - 1)
}

#[cfg(test)]
#[path = "header_test.rs"]
mod tests;
