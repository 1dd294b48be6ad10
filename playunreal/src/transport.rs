//! Wire-level client for the Remote Control API.
//!
//! The transport is a pure request/response primitive: one blocking HTTP
//! call per invocation, no pipelining, no retries. Connection-level failures
//! surface as [`AutomationError::Connectivity`] and are never retried here;
//! retry policy belongs to the locator and planner layers.

use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::AutomationError;

const CALL_ENDPOINT: &str = "/remote/object/call";
const PROPERTY_ENDPOINT: &str = "/remote/object/property";
const DESCRIBE_ENDPOINT: &str = "/remote/object/describe";
const INFO_ENDPOINT: &str = "/remote/info";

/// How much of an error body to quote back in error messages.
const BODY_EXCERPT_LEN: usize = 200;

/// The engine seam every higher layer consumes (`Arc<dyn RemoteEngine>`),
/// so the resolver, tracker and planner can be exercised against fakes.
pub trait RemoteEngine: Send + Sync {
    /// Invoke a named remote function on an object.
    fn call_function(
        &self,
        object_path: &str,
        function_name: &str,
        parameters: Option<Value>,
    ) -> Result<Value, AutomationError>;

    /// Read a named remote property.
    fn read_property(&self, object_path: &str, property_name: &str)
        -> Result<Value, AutomationError>;

    /// Write a named remote property.
    fn write_property(
        &self,
        object_path: &str,
        property_name: &str,
        value: Value,
    ) -> Result<(), AutomationError>;

    /// Introspect an object: its functions and properties.
    fn describe_object(&self, object_path: &str) -> Result<Value, AutomationError>;

    /// Connectivity/health probe (`GET /remote/info`).
    fn info(&self) -> Result<Value, AutomationError>;
}

/// Blocking HTTP implementation of [`RemoteEngine`].
///
/// Holds no session state beyond the base URL and the per-request timeout,
/// both immutable after construction.
pub struct HttpRemoteEngine {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpRemoteEngine {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, AutomationError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AutomationError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            base_url: format!("http://{host}:{port}"),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn classify_send_error(&self, err: reqwest::Error) -> AutomationError {
        // Anything that prevented an HTTP status from coming back is a
        // connectivity problem: refused, DNS, socket timeout.
        AutomationError::Connectivity(format!(
            "cannot reach Remote Control API at {}: {err}",
            self.base_url
        ))
    }

    fn parse_body(endpoint: &str, body: &str) -> Result<Value, AutomationError> {
        if body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(body).map_err(|e| {
            AutomationError::Transport(format!(
                "malformed JSON from {endpoint}: {e} (body: {})",
                excerpt(body)
            ))
        })
    }

    fn get(&self, endpoint: &str) -> Result<Value, AutomationError> {
        let url = format!("{}{endpoint}", self.base_url);
        debug!(%url, "GET");
        let resp = self
            .client
            .get(&url)
            .send()
            .map_err(|e| self.classify_send_error(e))?;
        let status = resp.status();
        let body = resp
            .text()
            .map_err(|e| AutomationError::Transport(format!("failed reading {endpoint}: {e}")))?;
        if !status.is_success() {
            return Err(AutomationError::Transport(format!(
                "{status} on {endpoint}: {}",
                excerpt(&body)
            )));
        }
        Self::parse_body(endpoint, &body)
    }

    fn put(&self, endpoint: &str, body: &Value) -> Result<Value, AutomationError> {
        let url = format!("{}{endpoint}", self.base_url);
        debug!(%url, "PUT");
        let resp = self
            .client
            .put(&url)
            .json(body)
            .send()
            .map_err(|e| self.classify_send_error(e))?;
        let status = resp.status();
        let text = resp
            .text()
            .map_err(|e| AutomationError::Transport(format!("failed reading {endpoint}: {e}")))?;
        if !status.is_success() {
            warn!(%status, endpoint, "RC call failed");
            return Err(AutomationError::Transport(format!(
                "{status} on {endpoint}: {}",
                excerpt(&text)
            )));
        }
        Self::parse_body(endpoint, &text)
    }
}

impl RemoteEngine for HttpRemoteEngine {
    fn call_function(
        &self,
        object_path: &str,
        function_name: &str,
        parameters: Option<Value>,
    ) -> Result<Value, AutomationError> {
        let mut body = json!({
            "ObjectPath": object_path,
            "FunctionName": function_name,
        });
        if let Some(params) = parameters {
            body["Parameters"] = params;
        }
        self.put(CALL_ENDPOINT, &body)
    }

    fn read_property(
        &self,
        object_path: &str,
        property_name: &str,
    ) -> Result<Value, AutomationError> {
        let body = json!({
            "ObjectPath": object_path,
            "PropertyName": property_name,
        });
        let result = self.put(PROPERTY_ENDPOINT, &body)?;
        // The RC API wraps the value in an object keyed by the property name.
        match result.get(property_name) {
            Some(v) => Ok(v.clone()),
            None => Ok(result),
        }
    }

    fn write_property(
        &self,
        object_path: &str,
        property_name: &str,
        value: Value,
    ) -> Result<(), AutomationError> {
        let body = json!({
            "ObjectPath": object_path,
            "PropertyName": property_name,
            "Access": "WRITE_ACCESS",
            "PropertyValue": { property_name: value },
        });
        self.put(PROPERTY_ENDPOINT, &body).map(|_| ())
    }

    fn describe_object(&self, object_path: &str) -> Result<Value, AutomationError> {
        let body = json!({ "ObjectPath": object_path });
        self.put(DESCRIBE_ENDPOINT, &body)
    }

    fn info(&self) -> Result<Value, AutomationError> {
        self.get(INFO_ENDPOINT)
    }
}

/// Pull the route list out of a `GET /remote/info` response.
pub fn routes_from_info(info: &Value) -> Vec<Value> {
    info.get("Routes")
        .or_else(|| info.get("routes"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn excerpt(body: &str) -> &str {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_accepts_both_casings() {
        let upper = json!({ "Routes": [{"Path": "/remote/info"}] });
        let lower = json!({ "routes": [1, 2] });
        assert_eq!(routes_from_info(&upper).len(), 1);
        assert_eq!(routes_from_info(&lower).len(), 2);
        assert!(routes_from_info(&json!({})).is_empty());
    }

    #[test]
    fn excerpt_caps_long_bodies() {
        let long = "x".repeat(500);
        assert_eq!(excerpt(&long).len(), BODY_EXCERPT_LEN);
        assert_eq!(excerpt("short"), "short");
    }
}
