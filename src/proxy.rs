//! HTTP surface in front of the gateway. Answers JSON, allows any origin and
//! never authenticates callers; the upstream credentials stay behind it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};
use url::Url;

use crate::canonical::{CanonicalPost, CanonicalSubreddit};
use crate::error::GatewayError;
use crate::reddit::{Gateway, RateLimit};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub subreddits: Vec<CanonicalSubreddit>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedResponse {
    pub posts: Vec<CanonicalPost>,
    pub after: Option<String>,
    pub before: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    version: &'static str,
    rate_limit: RateLimit,
}

/// Status plus JSON body for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Reply {
    fn ok<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(body) => Reply { status: 200, body },
            Err(err) => Reply::error(500, "Failed to encode response", Some(err.to_string())),
        }
    }

    fn error(status: u16, message: &str, details: Option<String>) -> Self {
        let body = ErrorBody {
            error: message.to_string(),
            details,
        };
        Reply {
            status,
            body: serde_json::to_value(body).unwrap_or(serde_json::Value::Null),
        }
    }

    /// Validation and not-found errors carry their own message; everything
    /// else is reported under `failure` with the error text as details.
    fn from_gateway(err: GatewayError, failure: &str) -> Self {
        match err.http_status() {
            400 | 404 => Reply::error(err.http_status(), &err.to_string(), None),
            status => Reply::error(status, failure, Some(err.user_message())),
        }
    }
}

/// Dispatches one request. Kept free of any socket so it can be driven
/// directly.
pub fn route(gateway: &Gateway, method: &Method, raw_url: &str) -> Reply {
    let url = match Url::parse(&format!("http://proxy{}", raw_url)) {
        Ok(url) => url,
        Err(_) => return Reply::error(400, "Malformed request", None),
    };
    let path = url.path().trim_end_matches('/');
    let known = matches!(
        path,
        "/reddit/post" | "/reddit/search" | "/reddit/subreddit/posts" | "/health"
    );
    if !known {
        return Reply::error(404, "Not found", None);
    }
    if method != &Method::Get {
        return Reply::error(405, "Method not allowed", None);
    }

    let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
    let param = |key: &str| params.get(key).map(String::as_str).unwrap_or("");

    match path {
        "/reddit/post" => match gateway.fetch_post_by_id(param("postId")) {
            Ok(post) => Reply::ok(&post),
            Err(err) => Reply::from_gateway(err, "Failed to fetch post"),
        },
        "/reddit/search" => {
            // `page` is accepted for compatibility; continuation uses `after`.
            let after = params.get("after").map(String::as_str);
            match gateway.search_subreddits(param("q"), after) {
                Ok(page) => Reply::ok(&SearchResponse {
                    subreddits: page.items,
                    after: page.after,
                    before: page.before,
                }),
                Err(err) => Reply::from_gateway(err, "Failed to search subreddits"),
            }
        }
        "/reddit/subreddit/posts" => {
            let after = params.get("after").map(String::as_str);
            match gateway.list_subreddit_feed(param("subreddit"), after) {
                Ok(page) => Reply::ok(&FeedResponse {
                    posts: page.items,
                    after: page.after,
                    before: page.before,
                }),
                Err(err) => Reply::from_gateway(err, "Failed to fetch posts"),
            }
        }
        _ => Reply::ok(&Health {
            status: "ok",
            version: crate::VERSION,
            rate_limit: gateway.rate_limit(),
        }),
    }
}

pub struct ProxyServer {
    server: Arc<Server>,
    addr: SocketAddr,
    workers: Vec<JoinHandle<()>>,
}

impl ProxyServer {
    /// Binds `addr` and starts `workers` threads that all pull from the same
    /// listener and share one gateway.
    pub fn bind(addr: &str, gateway: Arc<Gateway>, workers: usize) -> Result<Self> {
        let server = Server::http(addr).map_err(|err| anyhow!("proxy: listen on {}: {}", addr, err))?;
        let bound = server
            .server_addr()
            .to_ip()
            .ok_or_else(|| anyhow!("proxy: listener has no ip address"))?;
        let server = Arc::new(server);

        let count = workers.max(1);
        let mut handles = Vec::with_capacity(count);
        for index in 0..count {
            let server = server.clone();
            let gateway = gateway.clone();
            let handle = thread::Builder::new()
                .name(format!("proxy-worker-{}", index))
                .spawn(move || {
                    for request in server.incoming_requests() {
                        handle_request(&gateway, request);
                    }
                    debug!(worker = index, "proxy worker stopped");
                })?;
            handles.push(handle);
        }
        info!(addr = %bound, workers = count, "proxy listening");

        Ok(ProxyServer {
            server,
            addr: bound,
            workers: handles,
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Wakes every worker so it leaves its accept loop, then waits for them.
    pub fn shutdown(mut self) {
        self.stop();
    }

    /// Blocks until the workers exit.
    pub fn join(mut self) {
        self.join_workers();
    }

    fn stop(&mut self) {
        for _ in 0..self.workers.len() {
            self.server.unblock();
        }
        self.join_workers();
    }

    fn join_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("proxy worker panicked");
            }
        }
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_request(gateway: &Gateway, request: Request) {
    let started = Instant::now();
    let method = request.method().clone();
    let url = request.url().to_string();
    let reply = route(gateway, &method, &url);

    let path = url.split('?').next().unwrap_or("");
    let elapsed_ms = started.elapsed().as_millis() as u64;
    if reply.status >= 500 {
        warn!(%method, path, status = reply.status, elapsed_ms, "request failed");
    } else {
        info!(%method, path, status = reply.status, elapsed_ms, "request");
    }

    let body = reply.body.to_string();
    let mut response = Response::from_string(body).with_status_code(reply.status);
    for (name, value) in [
        ("Content-Type", "application/json; charset=utf-8"),
        ("Access-Control-Allow-Origin", "*"),
        ("Access-Control-Allow-Methods", "GET"),
    ] {
        if let Ok(header) = Header::from_bytes(name.as_bytes(), value.as_bytes()) {
            response.add_header(header);
        }
    }
    if let Err(err) = request.respond(response) {
        debug!(error = %err, "client went away before response");
    }
}
