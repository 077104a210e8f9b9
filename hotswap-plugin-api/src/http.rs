//! HTTP types for plugin route declaration

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// HTTP method for route registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Options => "OPTIONS",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler invoked for a matched route
pub type RouteHandler = Arc<dyn Fn(&RouteRequest) -> RouteResponse + Send + Sync>;

/// Runs before a handler; returning `Some` short-circuits with that response
pub type Middleware = Arc<dyn Fn(&RouteRequest) -> Option<RouteResponse> + Send + Sync>;

/// A route declared by a plugin
#[derive(Clone)]
pub struct Route {
    /// HTTP method
    pub method: HttpMethod,
    /// Path pattern relative to the plugin prefix, e.g. "/notes/:id"
    pub path: String,
    pub handler: RouteHandler,
    /// Per-route middlewares, run after the plugin's default middlewares
    pub middlewares: Vec<Middleware>,
    pub auth_required: bool,
    /// Free-form metadata tags
    pub tags: Vec<String>,
    pub description: String,
}

impl Route {
    pub fn new<F>(method: HttpMethod, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&RouteRequest) -> RouteResponse + Send + Sync + 'static,
    {
        Self {
            method,
            path: path.into(),
            handler: Arc::new(handler),
            middlewares: Vec::new(),
            auth_required: false,
            tags: Vec::new(),
            description: String::new(),
        }
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn requires_auth(mut self) -> Self {
        self.auth_required = true;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middlewares", &self.middlewares.len())
            .field("auth_required", &self.auth_required)
            .field("tags", &self.tags)
            .field("description", &self.description)
            .finish()
    }
}

/// Incoming HTTP request passed to plugin handler
#[derive(Debug, Default, Clone)]
pub struct RouteRequest {
    /// Path parameters extracted from route pattern (e.g., ":id" -> "123")
    pub params: HashMap<String, String>,
    /// Query parameters
    pub query: HashMap<String, String>,
    /// Request body as bytes
    pub body: Vec<u8>,
    /// Request headers
    pub headers: HashMap<String, String>,
}

/// HTTP response from plugin handler
#[derive(Debug, Clone, PartialEq)]
pub struct RouteResponse {
    /// HTTP status code
    pub status: u16,
    /// Response body
    pub body: Vec<u8>,
    /// Content-Type header
    pub content_type: String,
}

impl RouteResponse {
    /// Create a JSON response
    pub fn json<T: Serialize>(status: u16, data: &T) -> Result<Self, PluginError> {
        Ok(Self {
            status,
            body: serde_json::to_vec(data).map_err(|e| PluginError::Json(e.to_string()))?,
            content_type: "application/json".to_string(),
        })
    }

    /// Create a plain text response
    pub fn text(status: u16, text: impl Into<String>) -> Self {
        Self {
            status,
            body: text.into().into_bytes(),
            content_type: "text/plain".to_string(),
        }
    }

    /// Create an empty response with status code
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: vec![],
            content_type: "application/json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_method_display() {
        assert_eq!(HttpMethod::Get.to_string(), "GET");
        assert_eq!(HttpMethod::Options.to_string(), "OPTIONS");
    }

    #[test]
    fn test_http_method_serializes_uppercase() {
        let json = serde_json::to_string(&HttpMethod::Delete).unwrap();
        assert_eq!(json, "\"DELETE\"");
    }

    #[test]
    fn test_route_builder() {
        let route = Route::new(HttpMethod::Post, "/notes", |_| RouteResponse::empty(201))
            .requires_auth()
            .with_tags(["notes", "write"])
            .with_description("Create a note")
            .with_middleware(Arc::new(|_: &RouteRequest| None));

        assert_eq!(route.method, HttpMethod::Post);
        assert_eq!(route.path, "/notes");
        assert!(route.auth_required);
        assert_eq!(route.tags, vec!["notes", "write"]);
        assert_eq!(route.middlewares.len(), 1);
        assert_eq!((route.handler)(&RouteRequest::default()).status, 201);
    }

    #[test]
    fn test_route_request_params() {
        let request = RouteRequest {
            params: [("id".into(), "123".into())].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(request.params.get("id"), Some(&"123".to_string()));
    }

    #[test]
    fn test_route_response_json() {
        #[derive(Serialize)]
        struct Data {
            value: i32,
        }

        let resp = RouteResponse::json(200, &Data { value: 42 }).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "application/json");
        assert!(String::from_utf8_lossy(&resp.body).contains("42"));
    }

    #[test]
    fn test_route_response_text() {
        let resp = RouteResponse::text(403, "forbidden");
        assert_eq!(resp.status, 403);
        assert_eq!(resp.body, b"forbidden");
        assert_eq!(resp.content_type, "text/plain");
    }
}
