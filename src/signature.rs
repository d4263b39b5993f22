//! Signature normalization and deterministic cache keys.
//!
//! A [`Signature`] is the declarative description of the entity a caller wants
//! to find. Inputs arrive as bare names, JSON documents, or values built with
//! the builder methods; all three end up in the same canonical form so that
//! field order and duplicate entries never change matching or the cache key.

use crate::error::DiscoveryError;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

/// Kind of code entity a signature asks for or an extractor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// Constructor-bearing type (class, struct).
    #[serde(alias = "struct", alias = "record")]
    Class,
    /// Callable value.
    #[serde(alias = "fn", alias = "method")]
    Function,
    /// Plain value (constant, object literal).
    #[serde(alias = "value", alias = "const")]
    Object,
    /// Interface, trait or protocol.
    #[serde(alias = "trait", alias = "protocol")]
    Interface,
    Enum,
    Module,
}

impl EntityKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Class => "class",
            Self::Function => "function",
            Self::Object => "object",
            Self::Interface => "interface",
            Self::Enum => "enum",
            Self::Module => "module",
        }
    }

    /// Parses a requested kind, where `any` and `*` mean "no constraint".
    pub fn parse_requested(value: &str) -> Result<Option<Self>, DiscoveryError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "any" | "*" | "" => Ok(None),
            other => other.parse().map(Some),
        }
    }
}

impl FromStr for EntityKind {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "class" | "struct" | "record" => Ok(Self::Class),
            "function" | "fn" | "method" => Ok(Self::Function),
            "object" | "value" | "const" => Ok(Self::Object),
            "interface" | "trait" | "protocol" => Ok(Self::Interface),
            "enum" => Ok(Self::Enum),
            "module" => Ok(Self::Module),
            other => Err(DiscoveryError::invalid(format!("unknown kind '{}'", other))),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a signature's name is matched.
#[derive(Debug, Clone)]
pub enum NameMatcher {
    Exact(String),
    Pattern(Regex),
}

impl NameMatcher {
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Self::Exact(name) => name == candidate,
            Self::Pattern(regex) => regex.is_match(candidate),
        }
    }

    /// The literal name, when matching exactly.
    pub fn literal(&self) -> Option<&str> {
        match self {
            Self::Exact(name) => Some(name),
            Self::Pattern(_) => None,
        }
    }

    /// Compiles a pattern, with `flags` limited to `i`, `m`, `s` and `x`.
    ///
    /// Flags are folded into the pattern as an inline group so they take part
    /// in equality and the cache key.
    pub fn pattern(source: &str, flags: &str) -> Result<Self, DiscoveryError> {
        let mut inline = String::new();
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' | 'x' if !inline.contains(flag) => inline.push(flag),
                // Global/unicode flags carry no meaning for a single-name match
                'i' | 'm' | 's' | 'x' | 'g' | 'u' => {}
                other => {
                    return Err(DiscoveryError::invalid(format!(
                        "unsupported pattern flag '{}'",
                        other
                    )));
                }
            }
        }
        let mut ordered: Vec<char> = inline.chars().collect();
        ordered.sort_unstable();
        let full = if ordered.is_empty() {
            source.to_string()
        } else {
            format!("(?{}){}", ordered.into_iter().collect::<String>(), source)
        };
        Regex::new(&full).map(Self::Pattern).map_err(|e| {
            DiscoveryError::invalid(format!("malformed name pattern '{}': {}", source, e))
        })
    }

    fn canonical(&self) -> String {
        match self {
            Self::Exact(name) => format!("exact:{}", name),
            Self::Pattern(regex) => format!("pattern:{}", regex.as_str()),
        }
    }
}

impl PartialEq for NameMatcher {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Pattern(a), Self::Pattern(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl fmt::Display for NameMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(name) => f.write_str(name),
            Self::Pattern(regex) => write!(f, "/{}/", regex.as_str()),
        }
    }
}

/// Raw signature input accepted by the engine.
#[derive(Debug, Clone)]
pub enum SignatureInput {
    /// Bare-name shorthand for `{ name }`.
    Name(String),
    /// JSON document as written in test code or config.
    Json(Value),
    /// Already-normalized signature.
    Built(Signature),
}

impl From<&str> for SignatureInput {
    fn from(value: &str) -> Self {
        Self::Name(value.to_string())
    }
}

impl From<String> for SignatureInput {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<Value> for SignatureInput {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<Signature> for SignatureInput {
    fn from(value: Signature) -> Self {
        Self::Built(value)
    }
}

impl From<&Signature> for SignatureInput {
    fn from(value: &Signature) -> Self {
        Self::Built(value.clone())
    }
}

/// Normalized description of the code entity being searched for.
///
/// Methods and properties are always sorted and de-duplicated.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    name: NameMatcher,
    kind: Option<EntityKind>,
    exports: Option<String>,
    methods: Vec<String>,
    properties: Vec<String>,
    decorators: Vec<String>,
    extends: Option<String>,
    instance_of: Option<String>,
    path_hint: Option<String>,
    internal: bool,
}

impl Signature {
    /// Creates a signature matching `name` exactly.
    pub fn named(name: impl Into<String>) -> Self {
        Self::with_matcher(NameMatcher::Exact(name.into()))
    }

    /// Creates a signature whose name is a regular expression.
    pub fn pattern(source: &str) -> Result<Self, DiscoveryError> {
        NameMatcher::pattern(source, "").map(Self::with_matcher)
    }

    fn with_matcher(name: NameMatcher) -> Self {
        Self {
            name,
            kind: None,
            exports: None,
            methods: Vec::new(),
            properties: Vec::new(),
            decorators: Vec::new(),
            extends: None,
            instance_of: None,
            path_hint: None,
            internal: false,
        }
    }

    #[must_use]
    pub const fn kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    #[must_use]
    pub fn exports(mut self, export_name: impl Into<String>) -> Self {
        self.exports = Some(export_name.into());
        self
    }

    #[must_use]
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods.extend(methods.into_iter().map(Into::into));
        sort_unique(&mut self.methods);
        self
    }

    #[must_use]
    pub fn properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties
            .extend(properties.into_iter().map(Into::into));
        sort_unique(&mut self.properties);
        self
    }

    /// Requires decorators (Python, TypeScript) or attributes (Rust) by bare name.
    #[must_use]
    pub fn decorators<I, S>(mut self, decorators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.decorators
            .extend(decorators.into_iter().map(|d| decorator_name(d.as_ref())));
        sort_unique(&mut self.decorators);
        self
    }

    #[must_use]
    pub fn extends(mut self, base: impl Into<String>) -> Self {
        self.extends = Some(base.into());
        self
    }

    #[must_use]
    pub fn instance_of(mut self, type_name: impl Into<String>) -> Self {
        self.instance_of = Some(type_name.into());
        self
    }

    #[must_use]
    pub fn path_hint(mut self, hint: impl Into<String>) -> Self {
        self.path_hint = Some(hint.into());
        self
    }

    /// Includes test, fixture and mock directories in the scan.
    #[must_use]
    pub const fn internal(mut self, internal: bool) -> Self {
        self.internal = internal;
        self
    }

    pub const fn name(&self) -> &NameMatcher {
        &self.name
    }

    pub const fn requested_kind(&self) -> Option<EntityKind> {
        self.kind
    }

    pub fn export_name(&self) -> Option<&str> {
        self.exports.as_deref()
    }

    pub fn required_methods(&self) -> &[String] {
        &self.methods
    }

    pub fn required_properties(&self) -> &[String] {
        &self.properties
    }

    pub fn required_decorators(&self) -> &[String] {
        &self.decorators
    }

    pub fn required_base(&self) -> Option<&str> {
        self.extends.as_deref()
    }

    pub fn required_instance_of(&self) -> Option<&str> {
        self.instance_of.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.path_hint.as_deref()
    }

    pub const fn is_internal(&self) -> bool {
        self.internal
    }

    /// Validates and canonicalizes raw input.
    pub fn normalize(raw: impl Into<SignatureInput>) -> Result<Self, DiscoveryError> {
        match raw.into() {
            SignatureInput::Name(name) => Self::from_name(&name),
            SignatureInput::Json(value) => Self::from_json(&value),
            SignatureInput::Built(signature) => {
                if signature.name.literal().is_some_and(|n| n.trim().is_empty()) {
                    return Err(DiscoveryError::invalid("signature name must not be empty"));
                }
                Ok(signature)
            }
        }
    }

    fn from_name(name: &str) -> Result<Self, DiscoveryError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DiscoveryError::invalid("signature name must not be empty"));
        }
        Ok(Self::with_matcher(parse_name_string(trimmed)?))
    }

    fn from_json(value: &Value) -> Result<Self, DiscoveryError> {
        let map = match value {
            Value::Null => return Err(DiscoveryError::invalid("signature must not be null")),
            Value::String(name) => return Self::from_name(name),
            Value::Object(map) => map,
            other => {
                return Err(DiscoveryError::invalid(format!(
                    "expected a signature object or name string, got {}",
                    json_type(other)
                )));
            }
        };

        let name = match map.get("name") {
            None | Some(Value::Null) => {
                return Err(DiscoveryError::invalid("signature is missing a name"));
            }
            Some(Value::String(name)) if name.trim().is_empty() => {
                return Err(DiscoveryError::invalid("signature name must not be empty"));
            }
            Some(Value::String(name)) => parse_name_string(name.trim())?,
            Some(Value::Object(pattern)) => parse_name_object(pattern)?,
            Some(other) => {
                return Err(DiscoveryError::invalid(format!(
                    "name must be a string or pattern object, got {}",
                    json_type(other)
                )));
            }
        };

        let mut signature = Self::with_matcher(name);
        if let Some(kind) = optional_string(map, &["kind", "type"])? {
            signature.kind = EntityKind::parse_requested(&kind)?;
        }
        signature.exports = optional_string(map, &["exports"])?;
        signature.extends = optional_string(map, &["extends"])?;
        signature.instance_of = optional_string(map, &["instanceOf", "instance_of"])?;
        signature.path_hint = optional_string(map, &["pathHint", "path_hint"])?;
        signature.methods = string_list(map, "methods")?;
        signature.properties = string_list(map, "properties")?;
        let mut decorators = string_list(map, "decorators")?;
        decorators.extend(string_list(map, "annotations")?);
        signature = signature.decorators(decorators);
        signature.internal = match map.get("internal") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(DiscoveryError::invalid(format!(
                    "'internal' must be a boolean, got {}",
                    json_type(other)
                )));
            }
        };

        for key in map.keys() {
            if !KNOWN_KEYS.contains(&key.as_str()) {
                tracing::debug!(key = %key, "Ignoring unknown signature field");
            }
        }

        Ok(signature)
    }

    /// Stable, order-independent encoding of every semantically relevant field.
    pub fn canonical_form(&self) -> String {
        let encoded = serde_json::json!([
            self.name.canonical(),
            self.kind.map(EntityKind::as_str),
            self.exports,
            self.methods,
            self.properties,
            self.extends,
            self.instance_of,
            self.path_hint,
            self.internal,
            self.decorators,
        ]);
        encoded.to_string()
    }

    /// Deterministic key used by the persistent cache.
    pub fn cache_key(&self) -> SignatureKey {
        SignatureKey(xxh3_64(self.canonical_form().as_bytes()))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(kind) = self.kind {
            write!(f, " ({})", kind)?;
        }
        if !self.methods.is_empty() {
            write!(f, " methods=[{}]", self.methods.join(", "))?;
        }
        if !self.properties.is_empty() {
            write!(f, " properties=[{}]", self.properties.join(", "))?;
        }
        if !self.decorators.is_empty() {
            write!(f, " decorators=[{}]", self.decorators.join(", "))?;
        }
        if let Some(base) = &self.extends {
            write!(f, " extends {}", base)?;
        }
        Ok(())
    }
}

const KNOWN_KEYS: &[&str] = &[
    "name",
    "kind",
    "type",
    "exports",
    "methods",
    "properties",
    "decorators",
    "annotations",
    "extends",
    "instanceOf",
    "instance_of",
    "pathHint",
    "path_hint",
    "internal",
];

fn sort_unique(values: &mut Vec<String>) {
    values.retain(|v| !v.trim().is_empty());
    values.sort();
    values.dedup();
}

/// Bare decorator or attribute name.
///
/// `@app.route("/")`, `#[tokio::main]` and `route` reduce to their last path
/// segment without arguments, so `@Injectable()` matches `Injectable`.
pub fn decorator_name(raw: &str) -> String {
    let raw = raw
        .trim()
        .trim_start_matches("#[")
        .trim_end_matches(']')
        .trim_start_matches('@');
    let path = raw
        .split(|c: char| c == '(' || c == '=' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    path.rsplit(['.', ':']).next().unwrap_or_default().to_string()
}

/// Accepts `Name` or a `/source/flags` regex literal.
fn parse_name_string(name: &str) -> Result<NameMatcher, DiscoveryError> {
    if let Some(body) = name.strip_prefix('/')
        && let Some(end) = body.rfind('/')
        && end > 0
    {
        return NameMatcher::pattern(&body[..end], &body[end + 1..]);
    }
    Ok(NameMatcher::Exact(name.to_string()))
}

fn parse_name_object(object: &Map<String, Value>) -> Result<NameMatcher, DiscoveryError> {
    let source = match object.get("pattern") {
        Some(Value::String(source)) if !source.is_empty() => source,
        _ => {
            return Err(DiscoveryError::invalid(
                "pattern name requires a non-empty 'pattern' string",
            ));
        }
    };
    let flags = match object.get("flags") {
        None | Some(Value::Null) => "",
        Some(Value::String(flags)) => flags.as_str(),
        Some(other) => {
            return Err(DiscoveryError::invalid(format!(
                "pattern flags must be a string, got {}",
                json_type(other)
            )));
        }
    };
    NameMatcher::pattern(source, flags)
}

fn optional_string(
    map: &Map<String, Value>,
    keys: &[&str],
) -> Result<Option<String>, DiscoveryError> {
    for key in keys {
        match map.get(*key) {
            None | Some(Value::Null) => {}
            Some(Value::String(value)) if value.trim().is_empty() => return Ok(None),
            Some(Value::String(value)) => return Ok(Some(value.trim().to_string())),
            Some(other) => {
                return Err(DiscoveryError::invalid(format!(
                    "'{}' must be a string, got {}",
                    key,
                    json_type(other)
                )));
            }
        }
    }
    Ok(None)
}

fn string_list(map: &Map<String, Value>, key: &str) -> Result<Vec<String>, DiscoveryError> {
    let mut values = match map.get(key) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(single)) => vec![single.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                other => Err(DiscoveryError::invalid(format!(
                    "'{}' entries must be strings, got {}",
                    key,
                    json_type(other)
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(DiscoveryError::invalid(format!(
                "'{}' must be a string or list of strings, got {}",
                key,
                json_type(other)
            )));
        }
    };
    sort_unique(&mut values);
    Ok(values)
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 64-bit signature key, rendered as 16 lowercase hex digits.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SignatureKey(u64);

impl SignatureKey {
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub fn as_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for SignatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl FromStr for SignatureKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != 16 {
            return Err(ParseKeyError::InvalidLength(s.len()));
        }
        u64::from_str_radix(s, 16)
            .map(SignatureKey)
            .map_err(|_| ParseKeyError::InvalidHex)
    }
}

impl Serialize for SignatureKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.as_hex())
    }
}

impl<'de> Deserialize<'de> for SignatureKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error type for signature key parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseKeyError {
    #[error("invalid hexadecimal characters in signature key")]
    InvalidHex,
    #[error("invalid signature key length: expected 16 hex characters, got {0}")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{check, let_assert};
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn bare_string_coerces_to_exact_name() {
        let signature = Signature::normalize("Calculator").unwrap();
        check!(signature.name() == &NameMatcher::Exact("Calculator".into()));
        check!(signature.requested_kind().is_none());
        check!(signature.required_methods().is_empty());
    }

    #[rstest]
    #[case(json!(null))]
    #[case(json!(42))]
    #[case(json!(true))]
    #[case(json!(["Calculator"]))]
    #[case(json!({}))]
    #[case(json!({"name": ""}))]
    #[case(json!({"name": 7}))]
    #[case(json!({"name": {"pattern": "("}}))]
    #[case(json!({"name": "X", "methods": [1, 2]}))]
    #[case(json!({"name": "X", "kind": "widget"}))]
    #[case(json!({"name": "X", "internal": "yes"}))]
    fn malformed_input_is_rejected(#[case] raw: Value) {
        let result = Signature::normalize(raw);
        let_assert!(Err(DiscoveryError::InvalidSignature { .. }) = result);
    }

    #[test]
    fn methods_are_sorted_and_deduplicated() {
        let signature = Signature::normalize(json!({
            "name": "Calculator",
            "type": "class",
            "methods": ["subtract", "add", "add", " "],
        }))
        .unwrap();
        check!(signature.required_methods() == ["add", "subtract"]);
        check!(signature.requested_kind() == Some(EntityKind::Class));
    }

    #[test]
    fn cache_key_ignores_order_and_duplicates() {
        let a = Signature::normalize(json!({
            "name": "Calculator",
            "methods": ["add", "subtract"],
            "kind": "class",
        }))
        .unwrap();
        let b = Signature::normalize(json!({
            "kind": "class",
            "methods": ["subtract", "add", "subtract"],
            "name": "Calculator",
        }))
        .unwrap();
        let built = Signature::named("Calculator")
            .kind(EntityKind::Class)
            .methods(["subtract", "add"]);

        check!(a.cache_key() == b.cache_key());
        check!(a.cache_key() == built.cache_key());
    }

    #[test]
    fn cache_key_distinguishes_semantic_fields() {
        let base = Signature::named("Calculator");
        check!(base.cache_key() != base.clone().kind(EntityKind::Class).cache_key());
        check!(base.cache_key() != base.clone().decorators(["dataclass"]).cache_key());
        check!(base.cache_key() != base.clone().internal(true).cache_key());
        check!(base.cache_key() != Signature::pattern("Calculator").unwrap().cache_key());
    }

    #[rstest]
    #[case(json!({"name": {"pattern": "^User.*Service$"}}), "UserAccountService", true)]
    #[case(json!({"name": {"pattern": "^user", "flags": "i"}}), "UserService", true)]
    #[case(json!({"name": "/Service$/"}), "OrderService", true)]
    #[case(json!({"name": "/Service$/"}), "ServiceLocator", false)]
    fn pattern_names_match(#[case] raw: Value, #[case] candidate: &str, #[case] expected: bool) {
        let signature = Signature::normalize(raw).unwrap();
        check!(signature.name().matches(candidate) == expected);
    }

    #[test]
    fn decorators_and_annotations_merge() {
        let signature = Signature::normalize(json!({
            "name": "User",
            "decorators": ["@dataclass(frozen=True)"],
            "annotations": "Entity",
        }))
        .unwrap();
        check!(signature.required_decorators() == ["Entity", "dataclass"]);
    }

    #[rstest]
    #[case("@dataclass", "dataclass")]
    #[case("@app.route('/users')", "route")]
    #[case("#[tokio::main]", "main")]
    #[case("derive(Debug, Clone)", "derive")]
    #[case("@Component({", "Component")]
    fn decorator_names_are_bare(#[case] raw: &str, #[case] expected: &str) {
        check!(decorator_name(raw) == expected);
    }

    #[rstest]
    #[case("trait", Some(EntityKind::Interface))]
    #[case("struct", Some(EntityKind::Class))]
    #[case("fn", Some(EntityKind::Function))]
    #[case("any", None)]
    #[case("*", None)]
    fn kind_aliases(#[case] raw: &str, #[case] expected: Option<EntityKind>) {
        check!(EntityKind::parse_requested(raw).unwrap() == expected);
    }

    #[test]
    fn signature_key_round_trips_through_text() {
        let key = Signature::named("Calculator").cache_key();
        let parsed: SignatureKey = key.to_string().parse().unwrap();
        check!(parsed == key);
        check!(key.to_string().len() == 16);
    }

    #[rstest]
    #[case("abc", ParseKeyError::InvalidLength(3))]
    #[case("zzzzzzzzzzzzzzzz", ParseKeyError::InvalidHex)]
    fn signature_key_rejects_garbage(#[case] input: &str, #[case] expected: ParseKeyError) {
        let_assert!(Err(err) = input.parse::<SignatureKey>());
        check!(err == expected);
    }
}
