//! Platform-independent request and response model
//!
//! Adapters validate raw input against [`PayloadLimits`] and build a
//! [`Request`]; the dispatcher answers with a [`Response`]. Both are immutable
//! once constructed.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{AgentError, ValidationError};

/// Opaque key-value payload
pub type Payload = Map<String, Value>;

/// Header carrying the caller's correlation id
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
/// Fallback header used by load balancers and service meshes
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_CORRELATION_ID_LENGTH: usize = 128;

/// Named operation the agent can perform
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
    Info,
    Health,
    Analyze,
    Metrics,
    Custom(String),
}

impl Capability {
    /// The four capabilities every agent serves
    pub fn builtin() -> [Capability; 4] {
        [
            Capability::Info,
            Capability::Health,
            Capability::Analyze,
            Capability::Metrics,
        ]
    }

    /// Map a capability name; unknown names become `Custom`
    pub fn parse(name: &str) -> Self {
        match name {
            "info" => Self::Info,
            "health" => Self::Health,
            "analyze" => Self::Analyze,
            "metrics" => Self::Metrics,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Enum discriminator name (`custom` for every custom capability)
    pub fn kind(&self) -> &str {
        match self {
            Self::Info => "info",
            Self::Health => "health",
            Self::Analyze => "analyze",
            Self::Metrics => "metrics",
            Self::Custom(_) => "custom",
        }
    }

    /// Full name, including the name of a custom capability
    pub fn name(&self) -> &str {
        match self {
            Self::Custom(name) if !name.is_empty() => name,
            other => other.kind(),
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// HTTP method this capability is invoked with
    pub fn method(&self) -> &'static str {
        match self {
            Self::Info | Self::Health | Self::Metrics => "GET",
            Self::Analyze | Self::Custom(_) => "POST",
        }
    }

    /// Resolve an HTTP-style `(method, path)` pair
    ///
    /// `/` is info, `/health`, `/analyze` and `/metrics` map to their
    /// capability, and any other single path segment is a custom capability.
    /// A wrong method is 405 on a built-in path; a custom path is only
    /// served over POST and is otherwise unsupported (400).
    pub fn from_route(method: &str, path: &str) -> Result<Self, ValidationError> {
        let trimmed = path.trim_matches('/');
        let capability = if trimmed.is_empty() {
            Self::Info
        } else if !trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ValidationError::UnsupportedCapability(trimmed.to_string()));
        } else {
            Self::parse(trimmed)
        };

        if !method.eq_ignore_ascii_case(capability.method()) {
            if let Self::Custom(name) = &capability {
                return Err(ValidationError::UnsupportedCapability(name.clone()));
            }
            return Err(ValidationError::MethodNotAllowed {
                method: method.to_ascii_uppercase(),
                capability: capability.name().to_string(),
            });
        }

        Ok(capability)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

/// Size and depth limits applied before a request is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadLimits {
    pub max_bytes: usize,
    pub max_depth: usize,
}

impl Default for PayloadLimits {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            max_depth: 32,
        }
    }
}

impl PayloadLimits {
    /// Validate a raw body and parse it into a payload
    ///
    /// An empty body yields an empty payload.
    pub fn parse_body(&self, body: &[u8]) -> Result<Payload, ValidationError> {
        if body.len() > self.max_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size: body.len(),
                limit: self.max_bytes,
            });
        }
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Payload::new());
        }

        let value: Value = serde_json::from_slice(body)
            .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
        self.check_depth(&value)?;
        into_object(value)
    }

    /// Validate a body that arrived already decoded
    pub fn check_value(&self, value: Value) -> Result<Payload, ValidationError> {
        if value.is_null() {
            return Ok(Payload::new());
        }
        let size = serde_json::to_vec(&value)
            .map(|bytes| bytes.len())
            .map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
        if size > self.max_bytes {
            return Err(ValidationError::PayloadTooLarge {
                size,
                limit: self.max_bytes,
            });
        }
        self.check_depth(&value)?;
        into_object(value)
    }

    fn check_depth(&self, value: &Value) -> Result<(), ValidationError> {
        let depth = depth_of(value);
        if depth > self.max_depth {
            return Err(ValidationError::PayloadTooDeep {
                depth,
                limit: self.max_depth,
            });
        }
        Ok(())
    }
}

fn into_object(value: Value) -> Result<Payload, ValidationError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(ValidationError::NotAnObject),
    }
}

/// Nesting depth; scalars are depth 0, `{}` is depth 1
fn depth_of(value: &Value) -> usize {
    let mut max = 0;
    let mut stack = vec![(value, 0usize)];
    while let Some((value, depth)) = stack.pop() {
        match value {
            Value::Object(map) => {
                max = max.max(depth + 1);
                stack.extend(map.values().map(|v| (v, depth + 1)));
            }
            Value::Array(items) => {
                max = max.max(depth + 1);
                stack.extend(items.iter().map(|v| (v, depth + 1)));
            }
            _ => max = max.max(depth),
        }
    }
    max
}

/// Request headers with case-insensitive names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        )
    }
}

/// Identifier tying logs, metrics and work claims to one logical request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Accept a caller-supplied id if it is safe to log and key on
    pub fn parse(s: &str) -> Option<Self> {
        let valid = !s.is_empty()
            && s.len() <= MAX_CORRELATION_ID_LENGTH
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(s.to_string()))
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Take the id from headers, generating one if none is usable
    pub fn from_headers(headers: &Headers) -> Self {
        [CORRELATION_ID_HEADER, REQUEST_ID_HEADER]
            .iter()
            .find_map(|name| headers.get(name).and_then(Self::parse))
            .unwrap_or_else(Self::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalized invocation handed to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    capability: Capability,
    payload: Payload,
    headers: Headers,
    correlation_id: CorrelationId,
}

impl Request {
    /// Build a request; the correlation id comes from headers or is generated
    pub fn new(capability: Capability, payload: Payload, headers: Headers) -> Self {
        let correlation_id = CorrelationId::from_headers(&headers);
        Self {
            capability,
            payload,
            headers,
            correlation_id,
        }
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }
}

/// Normalized reply produced for every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    status_code: u16,
    data: Value,
    headers: BTreeMap<String, String>,
}

impl Response {
    /// 200 response carrying `data`
    pub fn ok(data: Value) -> Self {
        Self::with_status(200, data)
    }

    pub fn with_status(status_code: u16, data: Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        Self {
            status_code,
            data,
            headers,
        }
    }

    /// Sanitized error response; never fails and never echoes internals
    pub fn from_error(err: &AgentError) -> Self {
        let data = match err {
            AgentError::ClaimConflict { claim_id } => serde_json::json!({
                "status": "duplicate",
                "error": err.code().as_str(),
                "message": err.public_message(),
                "claim_id": claim_id,
            }),
            _ => serde_json::json!({
                "status": "error",
                "error": err.code().as_str(),
                "message": err.public_message(),
            }),
        };
        Self::with_status(err.status_code(), data)
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// The `{status_code, data, headers}` envelope written to the wire
    pub fn envelope(&self) -> Value {
        serde_json::json!({
            "status_code": self.status_code,
            "data": self.data,
            "headers": self.headers,
        })
    }

    /// Rebuild a response from an envelope produced by [`Response::envelope`]
    pub fn from_envelope(envelope: Value) -> Option<Self> {
        serde_json::from_value(envelope).ok()
    }
}
