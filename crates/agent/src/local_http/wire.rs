//! Wire envelope for the agent local HTTP surface (spec §6 "Tunnel wire
//! protocol"): each tunnel frame carries one complete request or
//! response, represented internally through the `http` crate's
//! `Request`/`Response` builders rather than hand-rolled parsing.

use std::collections::HashMap;

use http::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct WireRequest {
    #[serde(default)]
    pub id: u64,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl WireRequest {
    pub fn into_request(self) -> Result<Request<String>, http::Error> {
        let method = Method::from_bytes(self.method.as_bytes()).unwrap_or(Method::GET);
        let mut builder = Request::builder().method(method).uri(self.path.clone());
        for (key, value) in &self.headers {
            builder = builder.header(key, value);
        }
        builder.body(self.body)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WireResponse {
    pub id: u64,
    pub status: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl WireResponse {
    pub fn from_response(id: u64, response: Response<String>) -> Self {
        let status = response.status().as_u16();
        let headers = response.headers().iter().filter_map(|(key, value)| value.to_str().ok().map(|value| (key.to_string(), value.to_string()))).collect();
        Self { id, status, headers, body: response.into_body() }
    }

    pub fn json(id: u64, status: StatusCode, value: &impl Serialize) -> Self {
        let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
        Self { id, status: status.as_u16(), headers: HashMap::from([("content-type".to_string(), "application/json".to_string())]), body }
    }

    pub fn error(id: u64, status: StatusCode, message: impl Into<String>) -> Self {
        Self::json(id, status, &serde_json::json!({ "error": message.into() }))
    }

    pub fn empty(id: u64, status: StatusCode) -> Self {
        Self { id, status: status.as_u16(), headers: HashMap::new(), body: String::new() }
    }
}
