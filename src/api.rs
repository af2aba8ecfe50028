use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("API error {code}: {message}")]
    Status {
        code: u16,
        message: String,
        body: Value,
    },
    #[error("network error: {0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// True when the server could not be reached at all
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Response wrapper used by the marketplace API: `{ success, message, data }`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Envelope {
    /// Lenient decode: anything that is not an envelope reads as a failed one
    pub fn from_value(value: &Value) -> Self {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Trait for API clients to allow mocking and abstraction
pub trait ApiClient {
    fn request(&self, method: Method, body: Option<&Value>, path: &str) -> Result<Value, ApiError>;
}

pub struct HttpClient {
    base_url: String,
    agent: ureq::Agent,
}

impl HttpClient {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl ApiClient for HttpClient {
    fn request(&self, method: Method, body: Option<&Value>, path: &str) -> Result<Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        debug!(method = method.as_str(), %url, "api request");

        let req = self
            .agent
            .request(method.as_str(), &url)
            .set("Accept", "application/json");
        let resp = match body {
            Some(body) => req.send_json(body.clone()),
            None => req.call(),
        };

        match resp {
            Ok(r) => {
                let text = r
                    .into_string()
                    .map_err(|e| ApiError::Decode(e.to_string()))?;
                parse_body(&text).map_err(ApiError::Decode)
            }
            Err(ureq::Error::Status(code, resp)) => {
                let text = resp.into_string().unwrap_or_default();
                let body = parse_body(&text).unwrap_or(Value::String(text.clone()));
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or(text);
                Err(ApiError::Status {
                    code,
                    message,
                    body,
                })
            }
            Err(e) => Err(ApiError::Transport(e.to_string())),
        }
    }
}

fn parse_body(text: &str) -> Result<Value, String> {
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(text).map_err(|e| e.to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::cell::RefCell;

    /// Replays canned responses keyed by path and records every call
    #[derive(Default)]
    pub struct CannedClient {
        responses: RefCell<Vec<(String, Result<Value, ApiError>)>>,
        pub calls: RefCell<Vec<(Method, String, Option<Value>)>>,
    }

    impl CannedClient {
        pub fn with(mut self, path: &str, response: Result<Value, ApiError>) -> Self {
            self.responses
                .get_mut()
                .push((path.to_string(), response));
            self
        }
    }

    impl ApiClient for CannedClient {
        fn request(
            &self,
            method: Method,
            body: Option<&Value>,
            path: &str,
        ) -> Result<Value, ApiError> {
            self.calls
                .borrow_mut()
                .push((method, path.to_string(), body.cloned()));
            let mut responses = self.responses.borrow_mut();
            match responses.iter().position(|(p, _)| p == path) {
                Some(i) => responses.remove(i).1,
                None => Err(ApiError::Transport("connection refused".to_string())),
            }
        }
    }
}
