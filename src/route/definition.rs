//! Route, predicate and filter definitions.
//!
//! Definitions are the raw, serialisable configuration of a route. They come
//! from the config file, the in-memory repository, or code, and are compiled
//! into executable [`Route`](crate::route::Route)s by the
//! [`RouteCompiler`](crate::route::RouteCompiler).
//!
//! Predicates and filters are written either as a table
//! (`{ name = "Path", args = { patterns = ["/foo/**"] } }`) or in shortcut form
//! (`"Path=/foo/**,/bar/**"`). Shortcut arguments are positional and stored
//! under generated keys until the typed registry maps them onto field names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Prefix of the keys holding positional shortcut arguments.
pub const GENERATED_KEY_PREFIX: &str = "_genkey_";

/// Errors raised while turning definitions into executable routes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    #[error("unknown predicate `{0}`")]
    UnknownPredicate(String),

    #[error("unknown filter `{0}`")]
    UnknownFilter(String),

    #[error("invalid arguments for {name}: {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("invalid shortcut definition `{text}`: {reason}")]
    InvalidShortcut { text: String, reason: String },

    #[error("invalid uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("route definition has an empty id")]
    MissingId,

    #[error("route {route_id}: {source}")]
    InRoute {
        route_id: String,
        #[source]
        source: Box<DefinitionError>,
    },
}

impl DefinitionError {
    pub(crate) fn invalid(name: impl Into<String>, reason: impl fmt::Display) -> Self {
        DefinitionError::InvalidArguments {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn in_route(self, route_id: &str) -> Self {
        DefinitionError::InRoute {
            route_id: route_id.to_string(),
            source: Box::new(self),
        }
    }
}

/// Raw configuration of one route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub id: String,

    #[serde(default)]
    pub predicates: Vec<PredicateDefinition>,

    #[serde(default)]
    pub filters: Vec<FilterDefinition>,

    /// Target URI; only scheme and authority are used when forwarding.
    pub uri: String,

    /// Lower orders are evaluated first.
    #[serde(default)]
    pub order: i32,
}

impl RouteDefinition {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            predicates: Vec::new(),
            filters: Vec::new(),
            uri: uri.into(),
            order: 0,
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn with_predicate(mut self, predicate: PredicateDefinition) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn with_filter(mut self, filter: FilterDefinition) -> Self {
        self.filters.push(filter);
        self
    }
}

/// A named predicate with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDefinition")]
pub struct PredicateDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

impl PredicateDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

impl FromStr for PredicateDefinition {
    type Err = DefinitionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (name, args) = parse_shortcut(text)?;
        Ok(Self { name, args })
    }
}

/// A named filter with its arguments and an optional explicit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDefinition")]
pub struct FilterDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
    /// Overrides the positional order of the filter within the chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
}

impl FilterDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Map::new(),
            order: None,
        }
    }

    pub fn arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }
}

impl FromStr for FilterDefinition {
    type Err = DefinitionError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let (name, args) = parse_shortcut(text)?;
        Ok(Self {
            name,
            args,
            order: None,
        })
    }
}

/// Either form accepted in configuration.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDefinition {
    Shortcut(String),
    Full {
        name: String,
        #[serde(default)]
        args: Map<String, Value>,
        #[serde(default)]
        order: Option<i32>,
    },
}

impl TryFrom<RawDefinition> for PredicateDefinition {
    type Error = DefinitionError;

    fn try_from(raw: RawDefinition) -> Result<Self, Self::Error> {
        match raw {
            RawDefinition::Shortcut(text) => text.parse(),
            RawDefinition::Full { name, args, .. } => Ok(Self { name, args }),
        }
    }
}

impl TryFrom<RawDefinition> for FilterDefinition {
    type Error = DefinitionError;

    fn try_from(raw: RawDefinition) -> Result<Self, Self::Error> {
        match raw {
            RawDefinition::Shortcut(text) => text.parse(),
            RawDefinition::Full { name, args, order } => Ok(Self { name, args, order }),
        }
    }
}

fn parse_shortcut(text: &str) -> Result<(String, Map<String, Value>), DefinitionError> {
    let (name, rest) = match text.split_once('=') {
        Some((name, rest)) => (name.trim(), Some(rest)),
        None => (text.trim(), None),
    };
    if name.is_empty() {
        return Err(DefinitionError::InvalidShortcut {
            text: text.to_string(),
            reason: "missing name".to_string(),
        });
    }

    let mut args = Map::new();
    if let Some(rest) = rest {
        for (i, value) in rest.split(',').enumerate() {
            args.insert(
                format!("{GENERATED_KEY_PREFIX}{i}"),
                Value::String(value.trim().to_string()),
            );
        }
    }
    Ok((name.to_string(), args))
}

/// How positional shortcut arguments map onto named fields.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Shortcut {
    /// The nth positional argument becomes the nth field.
    Fields(&'static [&'static str]),
    /// All positional arguments are gathered into one list field.
    List(&'static str),
}

/// Replace generated keys with the field names of the kind's shortcut.
pub(crate) fn normalize_args(
    name: &str,
    args: &Map<String, Value>,
    shortcut: Shortcut,
) -> Result<Map<String, Value>, DefinitionError> {
    let mut positional: Vec<(usize, Value)> = Vec::new();
    let mut named = Map::new();
    for (key, value) in args {
        match key.strip_prefix(GENERATED_KEY_PREFIX) {
            Some(index) => {
                let index = index
                    .parse::<usize>()
                    .map_err(|_| DefinitionError::invalid(name, format!("bad key `{key}`")))?;
                positional.push((index, value.clone()));
            }
            None => {
                named.insert(key.clone(), value.clone());
            }
        }
    }
    if positional.is_empty() {
        return Ok(named);
    }
    positional.sort_by_key(|(index, _)| *index);

    match shortcut {
        Shortcut::Fields(fields) => {
            if positional.len() > fields.len() {
                return Err(DefinitionError::invalid(
                    name,
                    format!(
                        "expected at most {} arguments, got {}",
                        fields.len(),
                        positional.len()
                    ),
                ));
            }
            for ((_, value), field) in positional.into_iter().zip(fields.iter()) {
                named.insert((*field).to_string(), value);
            }
        }
        Shortcut::List(field) => {
            let values = positional.into_iter().map(|(_, value)| value).collect();
            named.insert(field.to_string(), Value::Array(values));
        }
    }
    Ok(named)
}

/// Lenient deserializers for arguments that arrive as strings from shortcuts.
pub(crate) mod de {
    use std::fmt::Display;
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flex<T> {
        Native(T),
        Text(String),
    }

    fn resolve<T, E>(flex: Flex<T>) -> Result<T, E>
    where
        T: FromStr,
        T::Err: Display,
        E: serde::de::Error,
    {
        match flex {
            Flex::Native(value) => Ok(value),
            Flex::Text(text) => text.trim().parse().map_err(E::custom),
        }
    }

    /// Accept `10` as well as `"10"`.
    pub fn flexible<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        resolve(Flex::deserialize(deserializer)?)
    }

    pub fn flexible_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + FromStr,
        T::Err: Display,
    {
        match Option::<Flex<T>>::deserialize(deserializer)? {
            Some(flex) => resolve(flex).map(Some),
            None => Ok(None),
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    /// Accept a single string or a list of strings.
    pub fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        })
    }

    pub fn one_or_many_opt<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<OneOrMany>::deserialize(deserializer)?.map(|v| match v {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Number(i64),
    }

    /// Accept `302` as well as `"302"` or `"FOUND"`.
    pub fn text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Scalar::deserialize(deserializer)? {
            Scalar::Text(text) => text,
            Scalar::Number(number) => number.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcut_keeps_positional_arguments() {
        let def: PredicateDefinition = "Path=/foo/**, /bar/**".parse().unwrap();
        assert_eq!(def.name, "Path");
        assert_eq!(def.args["_genkey_0"], "/foo/**");
        assert_eq!(def.args["_genkey_1"], "/bar/**");
    }

    #[test]
    fn shortcut_without_arguments() {
        let def: FilterDefinition = "SecureHeaders".parse().unwrap();
        assert_eq!(def.name, "SecureHeaders");
        assert!(def.args.is_empty());
    }

    #[test]
    fn empty_shortcut_is_rejected() {
        assert!("=x".parse::<FilterDefinition>().is_err());
    }

    #[test]
    fn normalize_maps_fields_in_order() {
        let def: FilterDefinition = "AddRequestHeader=X-Foo,bar".parse().unwrap();
        let args = normalize_args(&def.name, &def.args, Shortcut::Fields(&["name", "value"])).unwrap();
        assert_eq!(args["name"], "X-Foo");
        assert_eq!(args["value"], "bar");
    }

    #[test]
    fn normalize_gathers_lists() {
        let def: PredicateDefinition = "Method=GET,POST".parse().unwrap();
        let args = normalize_args(&def.name, &def.args, Shortcut::List("methods")).unwrap();
        assert_eq!(args["methods"], serde_json::json!(["GET", "POST"]));
    }

    #[test]
    fn normalize_rejects_extra_positional_arguments() {
        let def: FilterDefinition = "PrefixPath=/a,/b".parse().unwrap();
        assert!(normalize_args(&def.name, &def.args, Shortcut::Fields(&["prefix"])).is_err());
    }

    #[test]
    fn route_definition_from_toml() {
        let def: RouteDefinition = toml::from_str(
            r#"
            id = "users"
            uri = "http://users:8080"
            order = 5
            predicates = ["Path=/users/**", { name = "Method", args = { methods = ["GET"] } }]
            filters = [{ name = "PrefixPath", args = { prefix = "/api" }, order = 10 }]
            "#,
        )
        .unwrap();
        assert_eq!(def.id, "users");
        assert_eq!(def.order, 5);
        assert_eq!(def.predicates.len(), 2);
        assert_eq!(def.predicates[1].name, "Method");
        assert_eq!(def.filters[0].order, Some(10));
    }
}
