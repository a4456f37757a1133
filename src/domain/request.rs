//! Minimal request/response view consumed by the orchestrator.
//!
//! The host gateway owns the real request objects; it hands over only what the
//! authrep flow needs.

use std::collections::HashMap;

/// The parts of an inbound API request the authrep flow inspects.
///
/// Header names are case-insensitive and stored lowercased; query parameter
/// names are case-sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiRequest {
    api_id: String,
    method: String,
    destination: String,
    headers: HashMap<String, String>,
    query_params: HashMap<String, String>,
}

impl ApiRequest {
    /// Create a request for `api_id` with the given method and destination path.
    pub fn new(
        api_id: impl Into<String>,
        method: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            api_id: api_id.into(),
            method: method.into(),
            destination: destination.into(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn api_id(&self) -> &str {
        &self.api_id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(String::as_str)
    }
}

/// The parts of the upstream response reported alongside usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code, when known
    pub status: Option<u16>,
}

impl ApiResponse {
    pub fn with_status(status: u16) -> Self {
        Self {
            status: Some(status),
        }
    }
}
