//! Path rewriting filters.
//!
//! Each filter records the URL it is about to replace, so the exchange keeps
//! the chain of original URLs for logging and diagnostics.

use async_trait::async_trait;
use regex::Regex;

use crate::error::GatewayError;
use crate::filter::{FilterChain, GatewayFilter};
use crate::http::exchange::Exchange;

fn rewrite(exchange: &mut Exchange, path: &str) -> Result<(), GatewayError> {
    exchange.record_original_url();
    tracing::trace!(from = exchange.request().path(), to = path, "Rewriting request path");
    exchange.request_mut().set_path(path)
}

/// Prepends a fixed prefix to the request path.
#[derive(Debug)]
pub struct PrefixPathFilter {
    prefix: String,
}

impl PrefixPathFilter {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }
}

#[async_trait]
impl GatewayFilter for PrefixPathFilter {
    fn name(&self) -> &str {
        "PrefixPath"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let path = format!("{}{}", self.prefix, exchange.request().path());
        rewrite(exchange, &path)?;
        chain.proceed(exchange).await
    }
}

/// Regex substitution over the request path; `${name}` refers to groups.
#[derive(Debug)]
pub struct RewritePathFilter {
    regex: Regex,
    replacement: String,
}

impl RewritePathFilter {
    pub fn new(regex: Regex, replacement: String) -> Self {
        Self { regex, replacement }
    }
}

#[async_trait]
impl GatewayFilter for RewritePathFilter {
    fn name(&self) -> &str {
        "RewritePath"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let current = exchange.request().path();
        let rewritten = self.regex.replace_all(current, self.replacement.as_str());
        if rewritten != current {
            let mut path = rewritten.into_owned();
            if path.is_empty() {
                path.push('/');
            }
            rewrite(exchange, &path)?;
        }
        chain.proceed(exchange).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TemplatePart {
    Literal(String),
    Variable(String),
}

/// Replaces the path with a template filled from the Path predicate's captures.
#[derive(Debug)]
pub struct SetPathFilter {
    parts: Vec<TemplatePart>,
}

impl SetPathFilter {
    pub fn new(template: &str) -> Result<Self, String> {
        let mut parts = Vec::new();
        let mut rest = template;
        while let Some(open) = rest.find('{') {
            if open > 0 {
                parts.push(TemplatePart::Literal(rest[..open].to_string()));
            }
            let close = rest[open..]
                .find('}')
                .ok_or_else(|| format!("unclosed variable in `{template}`"))?;
            let name = &rest[open + 1..open + close];
            if name.is_empty() {
                return Err(format!("empty variable in `{template}`"));
            }
            parts.push(TemplatePart::Variable(name.to_string()));
            rest = &rest[open + close + 1..];
        }
        if rest.contains('}') {
            return Err(format!("unbalanced `}}` in `{template}`"));
        }
        if !rest.is_empty() {
            parts.push(TemplatePart::Literal(rest.to_string()));
        }
        Ok(Self { parts })
    }

    fn expand(&self, exchange: &Exchange) -> Result<String, GatewayError> {
        let mut path = String::new();
        for part in &self.parts {
            match part {
                TemplatePart::Literal(text) => path.push_str(text),
                TemplatePart::Variable(name) => {
                    let value = exchange
                        .path_match()
                        .and_then(|m| m.variables.get(name))
                        .ok_or(GatewayError::MissingState("path template variable"))?;
                    path.push_str(value.trim_start_matches('/'));
                }
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl GatewayFilter for SetPathFilter {
    fn name(&self) -> &str {
        "SetPath"
    }

    async fn filter(&self, exchange: &mut Exchange, chain: FilterChain<'_>) -> Result<(), GatewayError> {
        let path = self.expand(exchange)?;
        rewrite(exchange, &path)?;
        chain.proceed(exchange).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::testing::{exchange, run};
    use crate::filter::OrderedFilter;
    use crate::routing::pattern::SegmentPattern;

    #[tokio::test]
    async fn prefix_keeps_query_and_records_original() {
        let mut ex = exchange("/foo/bar?x=1");
        run(vec![OrderedFilter::new(1, PrefixPathFilter::new("/prefixed"))], &mut ex)
            .await
            .unwrap();
        assert_eq!(ex.request().uri().to_string(), "/prefixed/foo/bar?x=1");
        assert_eq!(ex.original_urls()[0].to_string(), "/foo/bar?x=1");
    }

    #[tokio::test]
    async fn rewrite_uses_named_groups() {
        let mut ex = exchange("/foo/bar/baz");
        let filter = RewritePathFilter::new(Regex::new("/foo/(?<rest>.*)").unwrap(), "/${rest}".into());
        run(vec![OrderedFilter::new(1, filter)], &mut ex).await.unwrap();
        assert_eq!(ex.request().path(), "/bar/baz");
    }

    #[tokio::test]
    async fn rewrite_without_match_changes_nothing() {
        let mut ex = exchange("/other");
        let filter = RewritePathFilter::new(Regex::new("/foo/(?<rest>.*)").unwrap(), "/${rest}".into());
        run(vec![OrderedFilter::new(1, filter)], &mut ex).await.unwrap();
        assert_eq!(ex.request().path(), "/other");
        assert!(ex.original_urls().is_empty());
    }

    #[tokio::test]
    async fn set_path_fills_captures() {
        let mut ex = exchange("/users/42/profile");
        let pattern = SegmentPattern::path("/users/{id}/{*rest}").unwrap();
        ex.set_path_match(pattern.matches("/users/42/profile"));
        let filter = SetPathFilter::new("/v2/accounts/{id}/{rest}").unwrap();
        run(vec![OrderedFilter::new(1, filter)], &mut ex).await.unwrap();
        assert_eq!(ex.request().path(), "/v2/accounts/42/profile");
    }

    #[tokio::test]
    async fn set_path_without_captures_fails() {
        let mut ex = exchange("/x");
        let filter = SetPathFilter::new("/{id}").unwrap();
        let err = run(vec![OrderedFilter::new(1, filter)], &mut ex).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingState(_)));
    }

    #[test]
    fn template_parsing() {
        assert!(SetPathFilter::new("/a/{b").is_err());
        assert!(SetPathFilter::new("/a/{}").is_err());
        assert!(SetPathFilter::new("/a/b}").is_err());
        assert_eq!(SetPathFilter::new("/a/{b}/c").unwrap().parts.len(), 3);
    }
}
