use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use log::debug;
use webrtc_http::{RequestHandler, RpcRequest};

pub const NOT_FOUND: &str = "404 Not Found";

/// A `PATH=BODY` pair given on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub body: String,
}

impl FromStr for Route {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((path, body)) if path.starts_with('/') => Ok(Route {
                path: path.to_owned(),
                body: body.to_owned(),
            }),
            Some(_) => Err(format!("route path must start with '/': {s}")),
            None => Err(format!("expected PATH=BODY, got {s}")),
        }
    }
}

/// Static routes answered regardless of method.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: BTreeMap<String, String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        RouteTable::new([
            Route {
                path: "/".to_owned(),
                body: "Hello, World!".to_owned(),
            },
            Route {
                path: "/greet".to_owned(),
                body: "Hello from the greet route!".to_owned(),
            },
        ])
    }
}

impl RouteTable {
    pub fn new(routes: impl IntoIterator<Item = Route>) -> Self {
        RouteTable {
            routes: routes
                .into_iter()
                .map(|route| (route.path, route.body))
                .collect(),
        }
    }

    /// Later routes replace earlier ones with the same path.
    pub fn with_routes(mut self, routes: impl IntoIterator<Item = Route>) -> Self {
        self.routes
            .extend(routes.into_iter().map(|route| (route.path, route.body)));
        self
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn lookup(&self, path: &str) -> Option<&str> {
        self.routes.get(path).map(String::as_str)
    }
}

#[async_trait]
impl RequestHandler for RouteTable {
    async fn handle_request(&self, request: &RpcRequest) -> Result<String, String> {
        debug!("{} {}", request.method, request.path);
        self.lookup(&request.path)
            .map(str::to_owned)
            .ok_or_else(|| NOT_FOUND.to_owned())
    }
}
