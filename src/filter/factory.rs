//! Typed filter registry.
//!
//! # Responsibilities
//! - Map filter names onto typed argument structs
//! - Compile definitions into shared filter instances
//! - Assign chain positions to route filters
//!
//! # Design Decisions
//! - Unknown names and bad arguments fail at load time, never per request
//! - Route filters are ordered `1..=n` by position unless they declare an order

use std::sync::Arc;

use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::filter::headers::{
    AddRequestHeaderFilter, AddRequestParameterFilter, AddResponseHeaderFilter,
    RemoveNonProxyHeadersFilter, RemoveRequestHeaderFilter, RemoveResponseHeaderFilter,
    SecureHeadersFilter, SetResponseHeaderFilter,
};
use crate::filter::path::{PrefixPathFilter, RewritePathFilter, SetPathFilter};
use crate::filter::rate_limit::RequestRateLimiterFilter;
use crate::filter::retry::RetryFilter;
use crate::filter::status::{RedirectToFilter, SetStatusFilter};
use crate::filter::{GatewayFilter, OrderedFilter};
use crate::resilience::backoff::BackoffConfig;
use crate::resilience::retries::{RetryPolicy, StatusSeries};
use crate::route::definition::{de, normalize_args, DefinitionError, FilterDefinition, Shortcut};
use crate::security::headers::SECURE_HEADER_DEFAULTS;
use crate::security::key_resolver::KeyResolverSpec;
use crate::security::rate_limit::RateLimiter;

const FILTERS: &[(&str, Shortcut)] = &[
    ("AddRequestHeader", Shortcut::Fields(&["name", "value"])),
    ("AddRequestParameter", Shortcut::Fields(&["name", "value"])),
    ("AddResponseHeader", Shortcut::Fields(&["name", "value"])),
    ("SetResponseHeader", Shortcut::Fields(&["name", "value"])),
    ("RemoveRequestHeader", Shortcut::Fields(&["name"])),
    ("RemoveResponseHeader", Shortcut::Fields(&["name"])),
    ("RemoveNonProxyHeaders", Shortcut::List("headers")),
    ("SecureHeaders", Shortcut::List("disable")),
    ("PrefixPath", Shortcut::Fields(&["prefix"])),
    ("RewritePath", Shortcut::Fields(&["regexp", "replacement"])),
    ("SetPath", Shortcut::Fields(&["template"])),
    ("SetStatus", Shortcut::Fields(&["status"])),
    ("RedirectTo", Shortcut::Fields(&["status", "url"])),
    ("Retry", Shortcut::Fields(&["retries"])),
    ("RequestRateLimiter", Shortcut::Fields(&["replenish_rate", "burst_capacity"])),
];

/// Names of every registered filter kind.
pub fn filter_names() -> impl Iterator<Item = &'static str> {
    FILTERS.iter().map(|(name, _)| *name)
}

/// Shared services filters are built with.
#[derive(Debug, Clone)]
pub struct FilterContext {
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Upper bound for request bodies that have to be buffered.
    pub body_limit: usize,
}

/// Typed configuration of a filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum FilterSpec {
    AddRequestHeader(NameValueArgs),
    AddRequestParameter(NameValueArgs),
    AddResponseHeader(NameValueArgs),
    SetResponseHeader(NameValueArgs),
    RemoveRequestHeader(NameArgs),
    RemoveResponseHeader(NameArgs),
    RemoveNonProxyHeaders(NonProxyArgs),
    SecureHeaders(SecureHeadersArgs),
    PrefixPath(PrefixPathArgs),
    RewritePath(RewritePathArgs),
    SetPath(SetPathArgs),
    SetStatus(SetStatusArgs),
    RedirectTo(RedirectToArgs),
    Retry(RetryArgs),
    RequestRateLimiter(RateLimiterArgs),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameValueArgs {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NameArgs {
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NonProxyArgs {
    /// Replaces the default hop-by-hop list when given.
    #[serde(default, deserialize_with = "de::one_or_many_opt")]
    pub headers: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecureHeadersArgs {
    /// Security headers not to add.
    #[serde(default, deserialize_with = "de::one_or_many")]
    pub disable: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrefixPathArgs {
    pub prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewritePathArgs {
    pub regexp: String,
    pub replacement: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetPathArgs {
    pub template: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetStatusArgs {
    #[serde(deserialize_with = "de::text")]
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedirectToArgs {
    #[serde(deserialize_with = "de::text")]
    pub status: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryArgs {
    /// Maximum number of attempts, the first one included.
    #[serde(default, deserialize_with = "de::flexible_opt")]
    pub retries: Option<u32>,
    #[serde(default, deserialize_with = "de::one_or_many_opt")]
    pub methods: Option<Vec<String>>,
    #[serde(default)]
    pub series: Option<Vec<StatusSeries>>,
    #[serde(default)]
    pub statuses: Vec<u16>,
    #[serde(default, deserialize_with = "de::flexible_opt")]
    pub retry_on_error: Option<bool>,
    #[serde(default)]
    pub backoff: Option<BackoffConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimiterArgs {
    #[serde(deserialize_with = "de::flexible")]
    pub replenish_rate: u32,
    #[serde(deserialize_with = "de::flexible")]
    pub burst_capacity: u32,
    #[serde(default)]
    pub key_resolver: KeyResolverSpec,
    #[serde(default = "default_deny_empty_key", deserialize_with = "de::flexible")]
    pub deny_empty_key: bool,
}

fn default_deny_empty_key() -> bool {
    true
}

impl FilterSpec {
    /// Decode a raw definition; unknown names and bad arguments are errors.
    pub fn from_definition(def: &FilterDefinition) -> Result<Self, DefinitionError> {
        let shortcut = FILTERS
            .iter()
            .find(|(name, _)| *name == def.name)
            .map(|(_, shortcut)| *shortcut)
            .ok_or_else(|| DefinitionError::UnknownFilter(def.name.clone()))?;
        let args = normalize_args(&def.name, &def.args, shortcut)?;
        serde_json::from_value(json!({ "name": def.name, "args": args }))
            .map_err(|e| DefinitionError::invalid(&def.name, e))
    }

    pub fn compile(self, name: &str, ctx: &FilterContext) -> Result<Arc<dyn GatewayFilter>, DefinitionError> {
        let invalid = |reason: String| DefinitionError::invalid(name, reason);
        let filter: Arc<dyn GatewayFilter> = match self {
            FilterSpec::AddRequestHeader(args) => {
                let (header, value) = header_pair(&args).map_err(invalid)?;
                Arc::new(AddRequestHeaderFilter::new(header, value))
            }
            FilterSpec::AddRequestParameter(args) => {
                if args.name.is_empty() {
                    return Err(invalid("parameter name is empty".into()));
                }
                Arc::new(AddRequestParameterFilter::new(&args.name, &args.value))
            }
            FilterSpec::AddResponseHeader(args) => {
                let (header, value) = header_pair(&args).map_err(invalid)?;
                Arc::new(AddResponseHeaderFilter::new(header, value))
            }
            FilterSpec::SetResponseHeader(args) => {
                let (header, value) = header_pair(&args).map_err(invalid)?;
                Arc::new(SetResponseHeaderFilter::new(header, value))
            }
            FilterSpec::RemoveRequestHeader(args) => {
                Arc::new(RemoveRequestHeaderFilter::new(header_name(&args.name).map_err(invalid)?))
            }
            FilterSpec::RemoveResponseHeader(args) => {
                Arc::new(RemoveResponseHeaderFilter::new(header_name(&args.name).map_err(invalid)?))
            }
            FilterSpec::RemoveNonProxyHeaders(args) => {
                let headers = match args.headers {
                    Some(names) => Some(
                        names
                            .iter()
                            .map(|n| header_name(n))
                            .collect::<Result<Vec<_>, _>>()
                            .map_err(invalid)?,
                    ),
                    None => None,
                };
                Arc::new(RemoveNonProxyHeadersFilter::new(headers))
            }
            FilterSpec::SecureHeaders(args) => {
                for disabled in &args.disable {
                    let known = SECURE_HEADER_DEFAULTS
                        .iter()
                        .any(|(header, _)| header.eq_ignore_ascii_case(disabled));
                    if !known {
                        return Err(invalid(format!("`{disabled}` is not a secure header")));
                    }
                }
                Arc::new(SecureHeadersFilter::new(&args.disable))
            }
            FilterSpec::PrefixPath(args) => {
                if !args.prefix.starts_with('/') {
                    return Err(invalid(format!("prefix `{}` must start with `/`", args.prefix)));
                }
                Arc::new(PrefixPathFilter::new(args.prefix.trim_end_matches('/')))
            }
            FilterSpec::RewritePath(args) => {
                let regex = Regex::new(&args.regexp).map_err(|e| invalid(e.to_string()))?;
                Arc::new(RewritePathFilter::new(regex, args.replacement.replace("$\\", "$")))
            }
            FilterSpec::SetPath(args) => {
                if !args.template.starts_with('/') {
                    return Err(invalid(format!("template `{}` must start with `/`", args.template)));
                }
                Arc::new(SetPathFilter::new(&args.template).map_err(invalid)?)
            }
            FilterSpec::SetStatus(args) => {
                Arc::new(SetStatusFilter::new(parse_status(&args.status).map_err(invalid)?))
            }
            FilterSpec::RedirectTo(args) => {
                let status = parse_status(&args.status).map_err(invalid)?;
                if !status.is_redirection() {
                    return Err(invalid(format!("{status} is not a redirection status")));
                }
                let location = HeaderValue::from_str(&args.url).map_err(|e| invalid(e.to_string()))?;
                Arc::new(RedirectToFilter::new(status, location))
            }
            FilterSpec::Retry(args) => Arc::new(RetryFilter::new(retry_policy(args).map_err(invalid)?, ctx.body_limit)),
            FilterSpec::RequestRateLimiter(args) => {
                if args.burst_capacity == 0 {
                    return Err(invalid("burst_capacity must be at least 1".into()));
                }
                let resolver = args.key_resolver.build().map_err(invalid)?;
                Arc::new(RequestRateLimiterFilter::new(
                    ctx.rate_limiter.clone(),
                    resolver,
                    args.replenish_rate,
                    args.burst_capacity,
                    args.deny_empty_key,
                ))
            }
        };
        Ok(filter)
    }
}

/// Compile filter definitions, numbering them `1..=n` by position.
pub fn compile_filters(
    definitions: &[FilterDefinition],
    ctx: &FilterContext,
) -> Result<Vec<OrderedFilter>, DefinitionError> {
    definitions
        .iter()
        .enumerate()
        .map(|(i, def)| {
            let filter = FilterSpec::from_definition(def)?.compile(&def.name, ctx)?;
            let position = i32::try_from(i + 1).unwrap_or(i32::MAX);
            Ok(OrderedFilter {
                order: def.order.unwrap_or(position),
                filter,
            })
        })
        .collect()
}

fn header_name(name: &str) -> Result<HeaderName, String> {
    HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| format!("header `{name}`: {e}"))
}

fn header_pair(args: &NameValueArgs) -> Result<(HeaderName, HeaderValue), String> {
    let value = HeaderValue::from_str(&args.value).map_err(|e| format!("value `{}`: {e}", args.value))?;
    Ok((header_name(&args.name)?, value))
}

/// Accept `404` as well as `NOT_FOUND` or `not_found`.
pub fn parse_status(text: &str) -> Result<StatusCode, String> {
    let text = text.trim();
    if let Ok(code) = text.parse::<u16>() {
        return StatusCode::from_u16(code).map_err(|e| format!("status `{text}`: {e}"));
    }
    let wanted = text.replace('_', " ");
    (100u16..600)
        .filter_map(|code| StatusCode::from_u16(code).ok())
        .find(|status| {
            status
                .canonical_reason()
                .is_some_and(|reason| reason.replace('-', " ").eq_ignore_ascii_case(&wanted))
        })
        .ok_or_else(|| format!("unknown status `{text}`"))
}

fn retry_policy(args: RetryArgs) -> Result<RetryPolicy, String> {
    let mut policy = RetryPolicy::default();
    if let Some(retries) = args.retries {
        if retries == 0 {
            return Err("retries must be at least 1".to_string());
        }
        policy.max_attempts = retries;
    }
    if let Some(methods) = args.methods {
        policy.methods = methods
            .iter()
            .map(|m| {
                let method = Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes())
                    .map_err(|e| format!("method `{m}`: {e}"))?;
                if !RetryPolicy::is_idempotent(&method) {
                    return Err(format!("{method} is not idempotent and cannot be retried"));
                }
                Ok(method)
            })
            .collect::<Result<_, String>>()?;
    }
    if let Some(series) = args.series {
        policy.series = series;
    }
    policy.statuses = args
        .statuses
        .iter()
        .map(|code| StatusCode::from_u16(*code).map_err(|e| format!("status {code}: {e}")))
        .collect::<Result<_, _>>()?;
    if let Some(retry_on_error) = args.retry_on_error {
        policy.retry_on_error = retry_on_error;
    }
    if let Some(backoff) = args.backoff {
        if backoff.first_ms > backoff.max_ms {
            return Err("backoff first_ms exceeds max_ms".to_string());
        }
        policy.backoff = Some(backoff);
    }
    Ok(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::testing::context;

    fn compile(text: &str) -> Result<Arc<dyn GatewayFilter>, DefinitionError> {
        let def: FilterDefinition = text.parse()?;
        FilterSpec::from_definition(&def)?.compile(&def.name, &context())
    }

    #[test]
    fn every_registered_name_has_a_variant() {
        let samples = [
            "AddRequestHeader=X-A,1",
            "AddRequestParameter=a,1",
            "AddResponseHeader=X-A,1",
            "SetResponseHeader=X-A,1",
            "RemoveRequestHeader=X-A",
            "RemoveResponseHeader=X-A",
            "RemoveNonProxyHeaders",
            "SecureHeaders",
            "PrefixPath=/api",
            "RewritePath=/foo/(?<rest>.*),/$\\{rest}",
            "SetPath=/{segment}",
            "SetStatus=401",
            "RedirectTo=302,https://example.org",
            "Retry=3",
            "RequestRateLimiter=10,20",
        ];
        assert_eq!(samples.len(), filter_names().count());
        for sample in samples {
            let filter = compile(sample).unwrap_or_else(|e| panic!("{sample}: {e}"));
            assert!(sample.starts_with(filter.name()));
        }
    }

    #[test]
    fn unknown_filter_is_rejected() {
        assert_eq!(
            compile("Teleport=/mars").unwrap_err(),
            DefinitionError::UnknownFilter("Teleport".into())
        );
    }

    #[test]
    fn invalid_arguments_are_rejected() {
        for text in [
            "AddRequestHeader=bad header,1",
            "PrefixPath=api",
            "RewritePath=(,x",
            "SetStatus=1000",
            "SetStatus=NOT_A_STATUS",
            "RedirectTo=200,https://example.org",
            "Retry=0",
            "RequestRateLimiter=10,0",
            "SecureHeaders=x-powered-by",
        ] {
            assert!(
                matches!(compile(text), Err(DefinitionError::InvalidArguments { .. })),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn non_idempotent_retry_methods_fail_at_load_time() {
        let def = FilterDefinition::new("Retry").arg("methods", json!(["GET", "POST"]));
        let err = FilterSpec::from_definition(&def)
            .and_then(|spec| spec.compile("Retry", &context()))
            .unwrap_err();
        assert!(err.to_string().contains("POST"));
    }

    #[test]
    fn statuses_parse_by_name_or_code() {
        assert_eq!(parse_status("NOT_FOUND").unwrap(), StatusCode::NOT_FOUND);
        assert!(parse_status("im_a_teapot").is_err());
        assert_eq!(parse_status("BAD_GATEWAY").unwrap(), StatusCode::BAD_GATEWAY);
        assert_eq!(parse_status(" 418 ").unwrap(), StatusCode::IM_A_TEAPOT);
        assert_eq!(parse_status("MULTI_STATUS").unwrap(), StatusCode::MULTI_STATUS);
    }

    #[test]
    fn positions_and_explicit_orders() {
        let defs = vec![
            "PrefixPath=/a".parse::<FilterDefinition>().unwrap(),
            "AddRequestHeader=X-B,1".parse::<FilterDefinition>().unwrap().with_order(-5),
            "SetStatus=201".parse::<FilterDefinition>().unwrap(),
        ];
        let orders: Vec<i32> = compile_filters(&defs, &context())
            .unwrap()
            .iter()
            .map(|f| f.order)
            .collect();
        assert_eq!(orders, vec![1, -5, 3]);
    }

    #[test]
    fn rate_limiter_table_arguments() {
        let def = FilterDefinition::new("RequestRateLimiter")
            .arg("replenish_rate", 5)
            .arg("burst_capacity", "10")
            .arg("key_resolver", json!({ "type": "header", "name": "X-Api-Key" }))
            .arg("deny_empty_key", false);
        let spec = FilterSpec::from_definition(&def).unwrap();
        match &spec {
            FilterSpec::RequestRateLimiter(args) => {
                assert_eq!(args.burst_capacity, 10);
                assert!(!args.deny_empty_key);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(spec.compile("RequestRateLimiter", &context()).is_ok());
    }
}
