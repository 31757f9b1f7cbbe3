//! Rule Parser
//!
//! Validates one [`Rule`] and normalizes it into the form the indexer
//! serializes. Also decodes whole JSON rule batches.

use dnr_core::types::{ElementType, LeftAnchor, PatternType, RightAnchor, RuleAction, RuleOptions};

use crate::rule::{ActionType, DomainType, ResourceType, Rule};

/// Smallest id a rule may carry.
pub const MIN_VALID_ID: i64 = 1;
/// Smallest priority a redirect rule may carry.
pub const MIN_VALID_PRIORITY: i64 = 1;
/// Priority used when none is given.
pub const DEFAULT_PRIORITY: u32 = 1;

/// Why a rule was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid rule id {0}, ids start at 1")]
    InvalidId(i64),
    #[error("Duplicate rule id {0}")]
    DuplicateId(u32),
    #[error("Redirect rule has no redirect url")]
    EmptyRedirectUrl,
    #[error("Redirect rule has no priority")]
    EmptyRedirectPriority,
    #[error("Invalid redirect priority {0}, priorities start at 1")]
    InvalidRedirectPriority(i64),
    #[error("Resource type '{0}' is both included and excluded")]
    ResourceTypeDuplicated(&'static str),
    #[error("Domains list is empty")]
    EmptyDomainsList,
    #[error("Resource types list is empty")]
    EmptyResourceTypesList,
    #[error("Rule can never match a request")]
    RuleNotMeaningful,
    #[error("Malformed rule: {0}")]
    MalformedInput(String),
}

/// Parsed `urlFilter`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UrlFilter {
    pub pattern_type: PatternType,
    pub left_anchor: LeftAnchor,
    pub right_anchor: RightAnchor,
    pub body: String,
}

/// A validated rule, ready for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRule {
    pub id: u32,
    pub priority: u32,
    pub action: RuleAction,
    pub options: RuleOptions,
    pub element_types: ElementType,
    pub filter: UrlFilter,
    /// Lowercase, sorted, de-duplicated
    pub domains: Vec<String>,
    /// Lowercase, sorted, de-duplicated
    pub excluded_domains: Vec<String>,
    pub redirect_url: Option<String>,
}

/// Split a `urlFilter` into anchors, pattern type and body.
///
/// `||` or `|` at the start set the left anchor; a trailing `|` sets the
/// right anchor. Any other `|` is part of the body.
pub fn parse_url_filter(filter: &str) -> UrlFilter {
    let bytes = filter.as_bytes();
    let mut start = 0;

    let left_anchor = if bytes.starts_with(b"||") {
        start = 2;
        LeftAnchor::Subdomain
    } else if bytes.starts_with(b"|") {
        start = 1;
        LeftAnchor::Boundary
    } else {
        LeftAnchor::None
    };

    let mut end = bytes.len();
    let mut pattern_type = PatternType::Substring;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if b == b'|' && i + 1 == bytes.len() {
            end = i;
            break;
        }
        if b == b'*' || b == b'^' {
            pattern_type = PatternType::Wildcarded;
        }
    }

    let right_anchor = if end < bytes.len() {
        RightAnchor::Boundary
    } else {
        RightAnchor::None
    };

    UrlFilter {
        pattern_type,
        left_anchor,
        right_anchor,
        body: filter[start..end].to_string(),
    }
}

/// Validate and normalize one rule.
pub fn parse_rule(rule: &Rule) -> Result<NormalizedRule, ParseError> {
    if rule.id < MIN_VALID_ID || rule.id > u32::MAX as i64 {
        return Err(ParseError::InvalidId(rule.id));
    }
    let id = rule.id as u32;

    let action = match rule.action.kind {
        ActionType::Block => RuleAction::Block,
        ActionType::Allow => RuleAction::Allow,
        ActionType::Redirect => RuleAction::Redirect,
    };

    let (priority, redirect_url) = if action == RuleAction::Redirect {
        let priority = rule.priority.ok_or(ParseError::EmptyRedirectPriority)?;
        if priority < MIN_VALID_PRIORITY || priority > u32::MAX as i64 {
            return Err(ParseError::InvalidRedirectPriority(priority));
        }
        let url = match rule.action.redirect_url.as_deref() {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => return Err(ParseError::EmptyRedirectUrl),
        };
        (priority as u32, Some(url))
    } else {
        let priority = rule
            .priority
            .and_then(|p| u32::try_from(p).ok())
            .filter(|&p| p as i64 >= MIN_VALID_PRIORITY)
            .unwrap_or(DEFAULT_PRIORITY);
        (priority, None)
    };

    let condition = &rule.condition;

    let domains = match &condition.domains {
        Some(list) => {
            let domains = normalize_domains(list);
            if domains.is_empty() {
                return Err(ParseError::EmptyDomainsList);
            }
            domains
        }
        None => Vec::new(),
    };
    let excluded_domains = condition
        .excluded_domains
        .as_deref()
        .map(normalize_domains)
        .unwrap_or_default();

    if condition.resource_types.as_ref().is_some_and(|list| list.is_empty()) {
        return Err(ParseError::EmptyResourceTypesList);
    }
    let element_types = element_types(
        condition.resource_types.as_deref().unwrap_or_default(),
        condition.excluded_resource_types.as_deref().unwrap_or_default(),
    )?;

    let filter = parse_url_filter(condition.url_filter.as_deref().unwrap_or_default());
    if element_types.is_empty() || (filter.body.is_empty() && domains.is_empty()) {
        return Err(ParseError::RuleNotMeaningful);
    }

    let mut options = match condition.domain_type {
        None => RuleOptions::APPLIES_TO_ANY_PARTY,
        Some(DomainType::FirstParty) => RuleOptions::APPLIES_TO_FIRST_PARTY,
        Some(DomainType::ThirdParty) => RuleOptions::APPLIES_TO_THIRD_PARTY,
    };
    if action == RuleAction::Allow {
        options |= RuleOptions::IS_ALLOW;
    }
    if condition.is_url_filter_case_sensitive.unwrap_or(false) {
        options |= RuleOptions::IS_CASE_SENSITIVE;
    }

    Ok(NormalizedRule {
        id,
        priority,
        action,
        options,
        element_types,
        filter,
        domains,
        excluded_domains,
        redirect_url,
    })
}

fn normalize_domains(list: &[String]) -> Vec<String> {
    let mut domains: Vec<String> = list
        .iter()
        .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    domains.sort();
    domains.dedup();
    domains
}

fn element_types(include: &[ResourceType], exclude: &[ResourceType]) -> Result<ElementType, ParseError> {
    if let Some(dup) = include.iter().find(|ty| exclude.contains(ty)) {
        return Err(ParseError::ResourceTypeDuplicated(dup.as_str()));
    }

    if !include.is_empty() {
        return Ok(include
            .iter()
            .fold(ElementType::empty(), |mask, ty| mask | ty.element_type()));
    }

    Ok(exclude
        .iter()
        .fold(ElementType::ALL, |mask, ty| mask - ty.element_type()))
}

/// Decode a JSON rule batch.
///
/// Each element is decoded on its own, so a shape error names the offending
/// element index.
pub fn parse_rules_json(json: &str) -> Result<Vec<Rule>, (usize, ParseError)> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)
        .map_err(|e| (0, ParseError::MalformedInput(format!("expected a JSON array of rules: {}", e))))?;

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| {
            serde_json::from_value(value).map_err(|e| (index, ParseError::MalformedInput(e.to_string())))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn rule(value: serde_json::Value) -> Rule {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn url_filter_anchors() {
        let f = parse_url_filter("||example.com");
        assert_eq!(f.left_anchor, LeftAnchor::Subdomain);
        assert_eq!(f.right_anchor, RightAnchor::None);
        assert_eq!(f.body, "example.com");
        assert_eq!(f.pattern_type, PatternType::Substring);

        let f = parse_url_filter("|http://a|");
        assert_eq!(f.left_anchor, LeftAnchor::Boundary);
        assert_eq!(f.right_anchor, RightAnchor::Boundary);
        assert_eq!(f.body, "http://a");

        let f = parse_url_filter("a|b^");
        assert_eq!(f.left_anchor, LeftAnchor::None);
        assert_eq!(f.body, "a|b^");
        assert_eq!(f.pattern_type, PatternType::Wildcarded);
    }

    #[test]
    fn url_filter_degenerate_inputs() {
        assert_eq!(parse_url_filter(""), UrlFilter::default());

        let f = parse_url_filter("|");
        assert_eq!(f.left_anchor, LeftAnchor::Boundary);
        assert_eq!(f.right_anchor, RightAnchor::None);
        assert!(f.body.is_empty());

        let f = parse_url_filter("|||");
        assert_eq!(f.left_anchor, LeftAnchor::Subdomain);
        assert_eq!(f.right_anchor, RightAnchor::Boundary);
        assert!(f.body.is_empty());
    }

    #[test]
    fn normalizes_block_rule() {
        let r = parse_rule(&rule(json!({
            "id": 7,
            "condition": {
                "urlFilter": "ads",
                "domains": ["B.example", "a.example", "b.example."],
                "excludedResourceTypes": ["script"]
            },
            "action": {"type": "block"}
        })))
        .unwrap();

        assert_eq!(r.id, 7);
        assert_eq!(r.priority, DEFAULT_PRIORITY);
        assert_eq!(r.action, RuleAction::Block);
        assert_eq!(r.options, RuleOptions::APPLIES_TO_ANY_PARTY);
        assert_eq!(r.domains, vec!["a.example", "b.example"]);
        assert_eq!(r.element_types, ElementType::ALL - ElementType::SCRIPT);
        assert_eq!(r.redirect_url, None);
    }

    #[test]
    fn options_follow_action_case_and_party() {
        let r = parse_rule(&rule(json!({
            "id": 1,
            "condition": {"urlFilter": "x", "isUrlFilterCaseSensitive": true, "domainType": "firstParty"},
            "action": {"type": "allow"}
        })))
        .unwrap();
        assert_eq!(
            r.options,
            RuleOptions::IS_ALLOW | RuleOptions::IS_CASE_SENSITIVE | RuleOptions::APPLIES_TO_FIRST_PARTY
        );
    }

    #[test]
    fn include_list_wins() {
        let r = parse_rule(&rule(json!({
            "id": 1,
            "condition": {"urlFilter": "x", "resourceTypes": ["image", "script"]},
            "action": {"type": "block"}
        })))
        .unwrap();
        assert_eq!(r.element_types, ElementType::IMAGE | ElementType::SCRIPT);
    }

    #[test]
    fn rejects_invalid_ids() {
        for id in [0, -5, u32::MAX as i64 + 1] {
            let err = parse_rule(&rule(json!({
                "id": id,
                "condition": {"urlFilter": "x"},
                "action": {"type": "block"}
            })))
            .unwrap_err();
            assert_eq!(err, ParseError::InvalidId(id));
        }
    }

    #[test]
    fn redirect_requirements() {
        let missing_priority = rule(json!({
            "id": 1,
            "condition": {"urlFilter": "x"},
            "action": {"type": "redirect", "redirectUrl": "https://r.example/"}
        }));
        assert_eq!(parse_rule(&missing_priority), Err(ParseError::EmptyRedirectPriority));

        let bad_priority = rule(json!({
            "id": 1,
            "priority": 0,
            "condition": {"urlFilter": "x"},
            "action": {"type": "redirect", "redirectUrl": "https://r.example/"}
        }));
        assert_eq!(parse_rule(&bad_priority), Err(ParseError::InvalidRedirectPriority(0)));

        let empty_url = rule(json!({
            "id": 1,
            "priority": 1,
            "condition": {"urlFilter": "x"},
            "action": {"type": "redirect", "redirectUrl": ""}
        }));
        assert_eq!(parse_rule(&empty_url), Err(ParseError::EmptyRedirectUrl));

        let ok = rule(json!({
            "id": 1,
            "priority": 5,
            "condition": {"urlFilter": "x"},
            "action": {"type": "redirect", "redirectUrl": "https://r.example/"}
        }));
        let r = parse_rule(&ok).unwrap();
        assert_eq!(r.priority, 5);
        assert_eq!(r.redirect_url.as_deref(), Some("https://r.example/"));
    }

    #[test]
    fn rejects_empty_lists() {
        let domains = rule(json!({
            "id": 1,
            "condition": {"urlFilter": "x", "domains": []},
            "action": {"type": "block"}
        }));
        assert_eq!(parse_rule(&domains), Err(ParseError::EmptyDomainsList));

        let types = rule(json!({
            "id": 1,
            "condition": {"urlFilter": "x", "resourceTypes": []},
            "action": {"type": "block"}
        }));
        assert_eq!(parse_rule(&types), Err(ParseError::EmptyResourceTypesList));
    }

    #[test]
    fn rejects_overlapping_resource_types() {
        let r = rule(json!({
            "id": 1,
            "condition": {"urlFilter": "x", "resourceTypes": ["image"], "excludedResourceTypes": ["image"]},
            "action": {"type": "block"}
        }));
        assert_eq!(parse_rule(&r), Err(ParseError::ResourceTypeDuplicated("image")));
    }

    #[test]
    fn rejects_meaningless_rules() {
        let no_filter = rule(json!({"id": 1, "condition": {}, "action": {"type": "block"}}));
        assert_eq!(parse_rule(&no_filter), Err(ParseError::RuleNotMeaningful));

        let empty_filter = rule(json!({"id": 1, "condition": {"urlFilter": ""}, "action": {"type": "block"}}));
        assert_eq!(parse_rule(&empty_filter), Err(ParseError::RuleNotMeaningful));

        for anchors_only in ["|", "||", "|||"] {
            let r = rule(json!({"id": 1, "condition": {"urlFilter": anchors_only}, "action": {"type": "block"}}));
            assert_eq!(parse_rule(&r), Err(ParseError::RuleNotMeaningful), "{anchors_only}");
        }

        let every_type_excluded = rule(json!({
            "id": 1,
            "condition": {
                "urlFilter": "x",
                "excludedResourceTypes": [
                    "main_frame", "sub_frame", "stylesheet", "script", "image", "font",
                    "object", "xmlhttprequest", "ping", "media", "websocket", "other"
                ]
            },
            "action": {"type": "block"}
        }));
        assert_eq!(parse_rule(&every_type_excluded), Err(ParseError::RuleNotMeaningful));

        let domains_only = rule(json!({
            "id": 1,
            "condition": {"domains": ["example.com"]},
            "action": {"type": "block"}
        }));
        assert!(parse_rule(&domains_only).is_ok());

        let anchored_with_domains = rule(json!({
            "id": 1,
            "condition": {"urlFilter": "||", "domains": ["example.com"]},
            "action": {"type": "block"}
        }));
        assert!(parse_rule(&anchored_with_domains).is_ok());
    }

    #[test]
    fn batch_errors_name_the_element() {
        let json = r#"[
            {"id": 1, "condition": {"urlFilter": "a"}, "action": {"type": "block"}},
            {"id": 2, "condition": {"urlFilter": "b"}, "action": {"type": "upgradeScheme"}}
        ]"#;
        let (index, err) = parse_rules_json(json).unwrap_err();
        assert_eq!(index, 1);
        assert!(matches!(err, ParseError::MalformedInput(_)));

        let (index, _) = parse_rules_json(r#"{"id": 1}"#).unwrap_err();
        assert_eq!(index, 0);

        assert_eq!(parse_rules_json("[]").unwrap().len(), 0);
    }
}
