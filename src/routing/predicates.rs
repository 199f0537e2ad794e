//! Predicate library.
//!
//! Each predicate kind has a typed argument struct, decoded from the raw
//! [`PredicateDefinition`] arguments, and compiles once into a
//! [`RoutePredicate`]. Regular expressions must match the whole value.

use axum::http::{HeaderName, Method};
use chrono::{DateTime, FixedOffset};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use std::net::IpAddr;

use crate::http::request::GatewayRequest;
use crate::route::definition::{de, normalize_args, DefinitionError, PredicateDefinition, Shortcut};
use crate::routing::matcher::{MatchContext, RoutePredicate};
use crate::routing::pattern::SegmentPattern;

const PREDICATES: &[(&str, Shortcut)] = &[
    ("Path", Shortcut::List("patterns")),
    ("Host", Shortcut::List("patterns")),
    ("Method", Shortcut::List("methods")),
    ("Header", Shortcut::Fields(&["header", "regexp"])),
    ("Cookie", Shortcut::Fields(&["name", "regexp"])),
    ("Query", Shortcut::Fields(&["param", "regexp"])),
    ("RemoteAddr", Shortcut::List("sources")),
    ("Before", Shortcut::Fields(&["datetime"])),
    ("After", Shortcut::Fields(&["datetime"])),
    ("Between", Shortcut::Fields(&["start", "end"])),
];

/// Names of every registered predicate kind.
pub fn predicate_names() -> impl Iterator<Item = &'static str> {
    PREDICATES.iter().map(|(name, _)| *name)
}

/// Typed configuration of a predicate.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "name", content = "args")]
pub enum PredicateSpec {
    Path(PatternArgs),
    Host(PatternArgs),
    Method(MethodArgs),
    Header(HeaderArgs),
    Cookie(CookieArgs),
    Query(QueryArgs),
    RemoteAddr(RemoteAddrArgs),
    Before(InstantArgs),
    After(InstantArgs),
    Between(BetweenArgs),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PatternArgs {
    #[serde(deserialize_with = "de::one_or_many")]
    pub patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MethodArgs {
    #[serde(deserialize_with = "de::one_or_many")]
    pub methods: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HeaderArgs {
    pub header: String,
    #[serde(default)]
    pub regexp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CookieArgs {
    pub name: String,
    pub regexp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryArgs {
    pub param: String,
    #[serde(default)]
    pub regexp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteAddrArgs {
    #[serde(deserialize_with = "de::one_or_many")]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstantArgs {
    pub datetime: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BetweenArgs {
    pub start: String,
    pub end: String,
}

impl PredicateSpec {
    /// Decode a raw definition; unknown names and bad arguments are errors.
    pub fn from_definition(def: &PredicateDefinition) -> Result<Self, DefinitionError> {
        let shortcut = PREDICATES
            .iter()
            .find(|(name, _)| *name == def.name)
            .map(|(_, shortcut)| *shortcut)
            .ok_or_else(|| DefinitionError::UnknownPredicate(def.name.clone()))?;
        let args = normalize_args(&def.name, &def.args, shortcut)?;
        serde_json::from_value(json!({ "name": def.name, "args": args }))
            .map_err(|e| DefinitionError::invalid(&def.name, e))
    }

    pub fn compile(self, name: &str) -> Result<Box<dyn RoutePredicate>, DefinitionError> {
        let invalid = |reason: String| DefinitionError::invalid(name, reason);
        Ok(match self {
            PredicateSpec::Path(args) => Box::new(PathPredicate {
                patterns: compile_patterns(&args.patterns, SegmentPattern::path).map_err(invalid)?,
            }),
            PredicateSpec::Host(args) => Box::new(HostPredicate {
                patterns: compile_patterns(&args.patterns, SegmentPattern::host).map_err(invalid)?,
            }),
            PredicateSpec::Method(args) => {
                if args.methods.is_empty() {
                    return Err(invalid("no methods given".into()));
                }
                let methods = args
                    .methods
                    .iter()
                    .map(|m| Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| invalid(e.to_string()))?;
                Box::new(MethodPredicate { methods })
            }
            PredicateSpec::Header(args) => Box::new(HeaderPredicate {
                header: HeaderName::from_bytes(args.header.as_bytes())
                    .map_err(|e| invalid(e.to_string()))?,
                regex: optional_regex(args.regexp.as_deref()).map_err(invalid)?,
            }),
            PredicateSpec::Cookie(args) => Box::new(CookiePredicate {
                name: args.name,
                regex: full_match(&args.regexp).map_err(invalid)?,
            }),
            PredicateSpec::Query(args) => Box::new(QueryPredicate {
                param: args.param,
                regex: optional_regex(args.regexp.as_deref()).map_err(invalid)?,
            }),
            PredicateSpec::RemoteAddr(args) => {
                let sources = args
                    .sources
                    .iter()
                    .map(|s| parse_source(s))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(invalid)?;
                if sources.is_empty() {
                    return Err(invalid("no sources given".into()));
                }
                Box::new(RemoteAddrPredicate { sources })
            }
            PredicateSpec::Before(args) => Box::new(TimePredicate::Before(
                parse_instant(&args.datetime).map_err(invalid)?,
            )),
            PredicateSpec::After(args) => Box::new(TimePredicate::After(
                parse_instant(&args.datetime).map_err(invalid)?,
            )),
            PredicateSpec::Between(args) => {
                let start = parse_instant(&args.start).map_err(invalid)?;
                let end = parse_instant(&args.end).map_err(invalid)?;
                if start >= end {
                    return Err(invalid(format!("start {start} is not before end {end}")));
                }
                Box::new(TimePredicate::Between(start, end))
            }
        })
    }
}

fn compile_patterns(
    raw: &[String],
    parse: fn(&str) -> Result<SegmentPattern, String>,
) -> Result<Vec<SegmentPattern>, String> {
    if raw.is_empty() {
        return Err("no patterns given".to_string());
    }
    raw.iter().map(|p| parse(p.trim())).collect()
}

fn full_match(pattern: &str) -> Result<Regex, String> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| e.to_string())
}

fn optional_regex(pattern: Option<&str>) -> Result<Option<Regex>, String> {
    match pattern {
        Some(p) if !p.is_empty() => full_match(p).map(Some),
        _ => Ok(None),
    }
}

fn parse_source(source: &str) -> Result<IpNet, String> {
    let source = source.trim();
    if let Ok(net) = source.parse::<IpNet>() {
        return Ok(net);
    }
    match source.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => Ipv4Net::new(v4, 32).map(IpNet::V4).map_err(|e| e.to_string()),
        Ok(IpAddr::V6(v6)) => Ipv6Net::new(v6, 128).map(IpNet::V6).map_err(|e| e.to_string()),
        Err(_) => Err(format!("`{source}` is neither an address nor a CIDR block")),
    }
}

fn parse_instant(text: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(text.trim()).map_err(|e| format!("`{text}`: {e}"))
}

/// Matches the request path against any of its patterns.
#[derive(Debug)]
pub struct PathPredicate {
    patterns: Vec<SegmentPattern>,
}

impl PathPredicate {
    pub fn new(patterns: Vec<SegmentPattern>) -> Self {
        Self { patterns }
    }
}

impl RoutePredicate for PathPredicate {
    fn matches(&self, request: &GatewayRequest, ctx: &mut MatchContext) -> bool {
        let path = request.path();
        for pattern in &self.patterns {
            if let Some(m) = pattern.matches(path) {
                tracing::trace!(pattern = pattern.as_str(), path, "Path predicate matched");
                ctx.path_match = Some(m);
                return true;
            }
        }
        false
    }
}

/// Matches the Host header, case-insensitive and ignoring the port.
#[derive(Debug)]
pub struct HostPredicate {
    patterns: Vec<SegmentPattern>,
}

impl RoutePredicate for HostPredicate {
    fn matches(&self, request: &GatewayRequest, _ctx: &mut MatchContext) -> bool {
        request
            .host()
            .map(|host| self.patterns.iter().any(|p| p.matches(&host).is_some()))
            .unwrap_or(false)
    }
}

#[derive(Debug)]
pub struct MethodPredicate {
    methods: Vec<Method>,
}

impl RoutePredicate for MethodPredicate {
    fn matches(&self, request: &GatewayRequest, _ctx: &mut MatchContext) -> bool {
        self.methods.contains(request.method())
    }
}

/// Header present, and when a regex is given, some value matches it.
#[derive(Debug)]
pub struct HeaderPredicate {
    header: HeaderName,
    regex: Option<Regex>,
}

impl RoutePredicate for HeaderPredicate {
    fn matches(&self, request: &GatewayRequest, _ctx: &mut MatchContext) -> bool {
        let mut values = request.headers().get_all(&self.header).iter().peekable();
        match &self.regex {
            None => values.peek().is_some(),
            Some(regex) => values
                .filter_map(|v| v.to_str().ok())
                .any(|v| regex.is_match(v)),
        }
    }
}

#[derive(Debug)]
pub struct CookiePredicate {
    name: String,
    regex: Regex,
}

impl RoutePredicate for CookiePredicate {
    fn matches(&self, request: &GatewayRequest, _ctx: &mut MatchContext) -> bool {
        request
            .cookies()
            .iter()
            .any(|(name, value)| *name == self.name && self.regex.is_match(value))
    }
}

/// Query parameter present, and when a regex is given, some value matches it.
#[derive(Debug)]
pub struct QueryPredicate {
    param: String,
    regex: Option<Regex>,
}

impl RoutePredicate for QueryPredicate {
    fn matches(&self, request: &GatewayRequest, _ctx: &mut MatchContext) -> bool {
        request
            .query_params()
            .iter()
            .filter(|(name, _)| *name == self.param)
            .any(|(_, value)| self.regex.as_ref().map_or(true, |r| r.is_match(value)))
    }
}

#[derive(Debug)]
pub struct RemoteAddrPredicate {
    sources: Vec<IpNet>,
}

impl RoutePredicate for RemoteAddrPredicate {
    fn matches(&self, request: &GatewayRequest, _ctx: &mut MatchContext) -> bool {
        match request.remote_addr() {
            Some(addr) => self.sources.iter().any(|net| net.contains(&addr.ip())),
            None => false,
        }
    }
}

#[derive(Debug)]
pub enum TimePredicate {
    Before(DateTime<FixedOffset>),
    After(DateTime<FixedOffset>),
    Between(DateTime<FixedOffset>, DateTime<FixedOffset>),
}

impl RoutePredicate for TimePredicate {
    fn matches(&self, _request: &GatewayRequest, ctx: &mut MatchContext) -> bool {
        let now = ctx.now;
        match self {
            TimePredicate::Before(limit) => now < *limit,
            TimePredicate::After(limit) => now > *limit,
            TimePredicate::Between(start, end) => now > *start && now < *end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use std::net::SocketAddr;

    fn compile(text: &str) -> Box<dyn RoutePredicate> {
        let def: PredicateDefinition = text.parse().unwrap();
        PredicateSpec::from_definition(&def).unwrap().compile(&def.name).unwrap()
    }

    fn request(builder: axum::http::request::Builder) -> GatewayRequest {
        let remote: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        GatewayRequest::from_http(builder.body(Body::empty()).unwrap(), Some(remote))
    }

    fn ctx() -> MatchContext {
        MatchContext::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap())
    }

    #[test]
    fn path_records_match() {
        let predicate = compile("Path=/foo/{id},/bar/**");
        let mut ctx = ctx();
        assert!(predicate.matches(&request(Request::builder().uri("/bar/x/y")), &mut ctx));
        assert_eq!(ctx.path_match.unwrap().remainder.as_deref(), Some("/x/y"));

        let mut ctx = self::ctx();
        assert!(predicate.matches(&request(Request::builder().uri("/foo/7")), &mut ctx));
        assert_eq!(ctx.path_match.unwrap().variables["id"], "7");

        assert!(!predicate.matches(&request(Request::builder().uri("/baz")), &mut self::ctx()));
    }

    #[test]
    fn host_ignores_case_and_port() {
        let predicate = compile("Host=**.example.org");
        let req = request(Request::builder().uri("/").header("Host", "Api.Example.org:8443"));
        assert!(predicate.matches(&req, &mut ctx()));
        let req = request(Request::builder().uri("/").header("Host", "example.com"));
        assert!(!predicate.matches(&req, &mut ctx()));
    }

    #[test]
    fn method_list() {
        let predicate = compile("Method=get,POST");
        assert!(predicate.matches(&request(Request::builder().method("POST").uri("/")), &mut ctx()));
        assert!(!predicate.matches(&request(Request::builder().method("DELETE").uri("/")), &mut ctx()));
    }

    #[test]
    fn header_regex_must_match_whole_value() {
        let predicate = compile(r"Header=X-Request-Id,\d+");
        let req = request(Request::builder().uri("/").header("X-Request-Id", "123"));
        assert!(predicate.matches(&req, &mut ctx()));
        let req = request(Request::builder().uri("/").header("X-Request-Id", "123abc"));
        assert!(!predicate.matches(&req, &mut ctx()));

        let presence = compile("Header=X-Debug");
        let req = request(Request::builder().uri("/").header("X-Debug", "anything"));
        assert!(presence.matches(&req, &mut ctx()));
        assert!(!presence.matches(&request(Request::builder().uri("/")), &mut ctx()));
    }

    #[test]
    fn cookie_value() {
        let predicate = compile("Cookie=chocolate,ch.p");
        let req = request(Request::builder().uri("/").header("Cookie", "a=b; chocolate=chip"));
        assert!(predicate.matches(&req, &mut ctx()));
        let req = request(Request::builder().uri("/").header("Cookie", "chocolate=mint"));
        assert!(!predicate.matches(&req, &mut ctx()));
    }

    #[test]
    fn query_param() {
        let predicate = compile("Query=green");
        assert!(predicate.matches(&request(Request::builder().uri("/?green=1")), &mut ctx()));
        assert!(!predicate.matches(&request(Request::builder().uri("/?red=1")), &mut ctx()));

        let predicate = compile("Query=foo,ba.");
        assert!(predicate.matches(&request(Request::builder().uri("/?foo=bar")), &mut ctx()));
        assert!(!predicate.matches(&request(Request::builder().uri("/?foo=qux")), &mut ctx()));
    }

    #[test]
    fn remote_addr_cidr_and_single_address() {
        let predicate = compile("RemoteAddr=10.0.0.0/8");
        assert!(predicate.matches(&request(Request::builder().uri("/")), &mut ctx()));
        let predicate = compile("RemoteAddr=192.168.1.10");
        assert!(!predicate.matches(&request(Request::builder().uri("/")), &mut ctx()));
    }

    #[test]
    fn time_windows() {
        let req = request(Request::builder().uri("/"));
        assert!(compile("After=2024-01-01T00:00:00Z").matches(&req, &mut ctx()));
        assert!(!compile("Before=2024-01-01T00:00:00Z").matches(&req, &mut ctx()));
        assert!(compile("Between=2024-05-01T00:00:00+02:00,2024-07-01T00:00:00+02:00")
            .matches(&req, &mut ctx()));
    }

    #[test]
    fn invalid_arguments_are_configuration_errors() {
        let bad = [
            "Between=2024-07-01T00:00:00Z,2024-05-01T00:00:00Z",
            "After=yesterday",
            "Header=X-Foo,(unclosed",
            "RemoteAddr=not-an-ip",
            "Path=no-leading-slash",
            "Method=G E T",
        ];
        for text in bad {
            let def: PredicateDefinition = text.parse().unwrap();
            let result = PredicateSpec::from_definition(&def).and_then(|s| s.compile(&def.name));
            assert!(
                matches!(result, Err(DefinitionError::InvalidArguments { .. })),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn table_form_arguments() {
        let def = PredicateDefinition::new("Path").arg("patterns", "/single");
        let predicate = PredicateSpec::from_definition(&def).unwrap().compile("Path").unwrap();
        assert!(predicate.matches(&request(Request::builder().uri("/single")), &mut ctx()));

        let def = PredicateDefinition::new("Path").arg("pattern", "/typo");
        assert!(PredicateSpec::from_definition(&def).is_err());
    }

    #[test]
    fn every_registered_kind_compiles() {
        let samples = [
            "Path=/a",
            "Host=example.org",
            "Method=GET",
            "Header=X-A",
            "Cookie=c,v",
            "Query=q",
            "RemoteAddr=10.0.0.0/8",
            "Before=2030-01-01T00:00:00Z",
            "After=2020-01-01T00:00:00Z",
            "Between=2020-01-01T00:00:00Z,2030-01-01T00:00:00Z",
        ];
        let names: Vec<String> = samples
            .iter()
            .map(|text| text.parse::<PredicateDefinition>().unwrap().name)
            .collect();
        assert_eq!(names, predicate_names().collect::<Vec<_>>());
        for text in samples {
            compile(text);
        }
    }
}
