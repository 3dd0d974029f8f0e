#![allow(clippy::unwrap_used)]

use super::*;
use crate::router::config::StringMatch;
use crate::router::test_fixtures::{grpc_route_with_method, http_route_with_matches, http_rules};
use gateway_api::apis::standard::httproutes::HTTPRouteRulesMatchesPathType;

fn header(name: &str, value: StringMatch) -> HeaderRoutingMatch {
    HeaderRoutingMatch {
        header_name: name.to_string(),
        header_value: value,
    }
}

fn exact(value: &str) -> StringMatch {
    StringMatch {
        exact: Some(value.to_string()),
        ..Default::default()
    }
}

fn prefix(value: &str) -> StringMatch {
    StringMatch {
        prefix: Some(value.to_string()),
        ..Default::default()
    }
}

fn regex(value: &str) -> StringMatch {
    StringMatch {
        regex: Some(value.to_string()),
        ..Default::default()
    }
}

#[test]
fn test_translate_exact() {
    let translated = translate_header_matches(&[header("x-canary", exact("test"))]).unwrap();

    assert_eq!(
        translated,
        vec![HeaderMatch {
            name: "x-canary".to_string(),
            match_type: HeaderMatchType::Exact,
            value: "test".to_string(),
        }]
    );
}

#[test]
fn test_translate_prefix_becomes_regex() {
    let translated = translate_header_matches(&[header("x-canary", prefix("test"))]).unwrap();

    assert_eq!(translated[0].match_type, HeaderMatchType::RegularExpression);
    assert_eq!(translated[0].value, "test.*");
}

#[test]
fn test_translate_regex_is_verbatim() {
    let translated = translate_header_matches(&[header("x-canary", regex("^t.*"))]).unwrap();

    assert_eq!(translated[0].match_type, HeaderMatchType::RegularExpression);
    assert_eq!(translated[0].value, "^t.*");
}

#[test]
fn test_translate_exact_wins_over_prefix() {
    let value = StringMatch {
        exact: Some("a".to_string()),
        prefix: Some("b".to_string()),
        regex: None,
    };

    let translated = translate_header_matches(&[header("x-canary", value)]).unwrap();

    assert_eq!(translated[0].match_type, HeaderMatchType::Exact);
    assert_eq!(translated[0].value, "a");
}

#[test]
fn test_translate_none_set_is_rejected() {
    let err = translate_header_matches(&[
        header("x-ok", exact("yes")),
        header("x-broken", StringMatch::default()),
    ])
    .unwrap_err();

    assert!(
        matches!(err, RoutingError::InvalidHeaderMatchType { ref header } if header == "x-broken")
    );
}

#[test]
fn test_inject_into_single_rule_route() {
    // ARRANGE
    let mut rules = http_rules(&[&[("stable", 100), ("canary", 0)]]);
    let headers = translate_header_matches(&[header("x-canary", exact("yes"))]).unwrap();

    // ACT
    let index =
        inject_header_route(RouteKind::Http, &mut rules, "canary", "stable", &headers).unwrap();

    // ASSERT
    assert_eq!(index, 1);
    assert_eq!(rules.len(), 2);

    let injected = &rules[1];
    let refs = injected.backend_refs.as_ref().unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].name, "canary");
    assert_eq!(refs[0].port, Some(80));
    assert_eq!(refs[0].weight, None);
    assert_eq!(refs[0].kind.as_deref(), Some("Service"));
    assert_eq!(refs[0].group.as_deref(), Some(""));

    // Rule without matches gets a single headers-only match
    let matches = injected.matches.as_ref().unwrap();
    assert_eq!(matches.len(), 1);
    assert!(matches[0].path.is_none());
    let injected_headers = matches[0].headers.as_ref().unwrap();
    assert_eq!(injected_headers[0].name, "x-canary");
    assert_eq!(injected_headers[0].value, "yes");
    assert_eq!(
        injected_headers[0].r#type,
        Some(HTTPRouteRulesMatchesHeadersType::Exact)
    );

    // Original rule is untouched
    assert_eq!(rules[0].backend_refs.as_ref().unwrap().len(), 2);
    assert!(rules[0].matches.is_none());
}

#[test]
fn test_inject_clones_every_match_and_filters() {
    // ARRANGE
    let route = http_route_with_matches("web");
    let mut rules = route.spec.rules.unwrap();
    let headers = translate_header_matches(&[header("x-canary", prefix("beta"))]).unwrap();

    // ACT
    let index =
        inject_header_route(RouteKind::Http, &mut rules, "canary", "stable", &headers).unwrap();

    // ASSERT
    let injected = &rules[index];
    assert_eq!(injected.name, None, "cloned rule must not reuse the rule name");
    assert_eq!(injected.filters, rules[0].filters);

    let matches = injected.matches.as_ref().unwrap();
    assert_eq!(matches.len(), 2);

    let first_path = matches[0].path.as_ref().unwrap();
    assert_eq!(first_path.value.as_deref(), Some("/api"));
    assert_eq!(
        first_path.r#type,
        Some(HTTPRouteRulesMatchesPathType::PathPrefix)
    );
    assert_eq!(matches[0].query_params, rules[0].matches.as_ref().unwrap()[0].query_params);
    assert_eq!(
        matches[1].path.as_ref().unwrap().value.as_deref(),
        Some("/health")
    );

    for m in matches {
        let h = m.headers.as_ref().unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(h[0].value, "beta.*");
        assert_eq!(
            h[0].r#type,
            Some(HTTPRouteRulesMatchesHeadersType::RegularExpression)
        );
    }

    let refs = injected.backend_refs.as_ref().unwrap();
    assert_eq!(refs.len(), 1);
    assert_eq!(refs[0].port, Some(8080));
}

#[test]
fn test_inject_grpc_keeps_method() {
    let route = grpc_route_with_method("echo");
    let mut rules = route.spec.rules.unwrap();
    let headers = translate_header_matches(&[header("x-canary", exact("yes"))]).unwrap();

    let index =
        inject_header_route(RouteKind::Grpc, &mut rules, "canary", "stable", &headers).unwrap();

    let matches = rules[index].matches.as_ref().unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].method, rules[0].matches.as_ref().unwrap()[0].method);
    assert_eq!(
        matches[0].headers.as_ref().unwrap()[0].r#type,
        Some(GRPCRouteRulesMatchesHeadersType::Exact)
    );
    assert_eq!(rules[index].backend_refs.as_ref().unwrap()[0].name, "canary");
}

#[test]
fn test_inject_without_shared_rule_fails_without_mutation() {
    let mut rules = http_rules(&[&[("stable", 100)], &[("canary", 0)]]);
    let headers = translate_header_matches(&[header("x-canary", exact("yes"))]).unwrap();

    let err =
        inject_header_route(RouteKind::Http, &mut rules, "canary", "stable", &headers).unwrap_err();

    assert!(matches!(err, RoutingError::RouteRuleNotFound { .. }));
    assert_eq!(rules.len(), 2);
}

#[test]
fn test_reinjecting_appends_another_rule() {
    let mut rules = http_rules(&[&[("stable", 100), ("canary", 0)]]);
    let headers = translate_header_matches(&[header("x-canary", exact("yes"))]).unwrap();

    let first =
        inject_header_route(RouteKind::Http, &mut rules, "canary", "stable", &headers).unwrap();
    let second =
        inject_header_route(RouteKind::Http, &mut rules, "canary", "stable", &headers).unwrap();

    assert_eq!((first, second), (1, 2));
    assert_eq!(rules.len(), 3);
}
