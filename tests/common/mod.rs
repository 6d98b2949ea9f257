#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tiny_http::{Header, Response, Server};
use url::Url;

use subfeed::auth::{self, TokenCache};
use subfeed::reddit::{Gateway, GatewayConfig};

pub const TOKEN_PATH: &str = "/api/v1/access_token";

#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
}

#[derive(Default)]
struct State {
    token_calls: usize,
    token_failure: Option<(u16, String)>,
    token_delay: Duration,
    token_lifetime: Option<u64>,
    api_delay: Duration,
    reject_tokens: HashSet<String>,
    reject_all: bool,
    routes: HashMap<String, (u16, String)>,
    requests: Vec<Recorded>,
}

/// Stand-in for both the token endpoint and the content API.
pub struct FakeUpstream {
    pub base_url: String,
    state: Arc<Mutex<State>>,
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
}

impl FakeUpstream {
    pub fn start() -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind fake upstream"));
        let addr = server.server_addr().to_ip().expect("ip listener");
        let state = Arc::new(Mutex::new(State::default()));

        let handle = {
            let server = server.clone();
            let state = state.clone();
            thread::spawn(move || {
                for request in server.incoming_requests() {
                    let (status, body) = respond_to(&state, request.url(), request.headers());
                    let header =
                        Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap();
                    let _ = request.respond(
                        Response::from_string(body)
                            .with_status_code(status)
                            .with_header(header),
                    );
                }
            })
        };

        FakeUpstream {
            base_url: format!("http://{}/", addr),
            state,
            server,
            handle: Some(handle),
        }
    }

    pub fn token_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), TOKEN_PATH)
    }

    /// Serves `body` for `path`, whatever the query.
    pub fn route(&self, path: &str, status: u16, body: &str) {
        self.state
            .lock()
            .routes
            .insert(path.to_string(), (status, body.to_string()));
    }

    /// Serves `body` for `path` only when `after` equals `cursor`.
    pub fn route_after(&self, path: &str, cursor: &str, status: u16, body: &str) {
        self.state
            .lock()
            .routes
            .insert(format!("{}|{}", path, cursor), (status, body.to_string()));
    }

    pub fn fail_token(&self, status: u16, body: &str) {
        self.state.lock().token_failure = Some((status, body.to_string()));
    }

    pub fn delay_token(&self, delay: Duration) {
        self.state.lock().token_delay = delay;
    }

    /// Issues tokens that live for `secs` instead of an hour.
    pub fn token_lifetime(&self, secs: u64) {
        self.state.lock().token_lifetime = Some(secs);
    }

    pub fn delay_api(&self, delay: Duration) {
        self.state.lock().api_delay = delay;
    }

    pub fn reject_token(&self, token: &str) {
        self.state.lock().reject_tokens.insert(token.to_string());
    }

    pub fn reject_all_tokens(&self) {
        self.state.lock().reject_all = true;
    }

    pub fn token_calls(&self) -> usize {
        self.state.lock().token_calls
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.lock().requests.clone()
    }

    pub fn gateway(&self) -> Arc<Gateway> {
        self.gateway_with_credentials("client-id", "client-secret")
    }

    pub fn gateway_with_credentials(&self, id: &str, secret: &str) -> Arc<Gateway> {
        let tokens = TokenCache::new(auth::Config {
            client_id: id.into(),
            client_secret: secret.into(),
            user_agent: "subfeed-tests/0.1".into(),
            token_url: self.token_url(),
            refresh_skew: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        })
        .expect("token cache");
        let gateway = Gateway::new(
            Arc::new(tokens),
            GatewayConfig {
                user_agent: "subfeed-tests/0.1".into(),
                base_url: Some(self.base_url.clone()),
                timeout: Some(Duration::from_secs(5)),
            },
        )
        .expect("gateway");
        Arc::new(gateway)
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn respond_to(state: &Mutex<State>, raw_url: &str, headers: &[Header]) -> (u16, String) {
    let url = Url::parse(&format!("http://fake{}", raw_url)).expect("request url");
    let path = url.path().to_string();
    let query: HashMap<String, String> = url.query_pairs().into_owned().collect();

    if path == TOKEN_PATH {
        let delay = {
            let mut st = state.lock();
            st.token_calls += 1;
            st.token_delay
        };
        thread::sleep(delay);
        let st = state.lock();
        if let Some((status, body)) = st.token_failure.clone() {
            return (status, body);
        }
        let body = serde_json::json!({
            "access_token": format!("tok-{}", st.token_calls),
            "token_type": "bearer",
            "expires_in": st.token_lifetime.unwrap_or(3600),
        });
        return (200, body.to_string());
    }

    let authorization = headers
        .iter()
        .find(|h| h.field.equiv("Authorization"))
        .map(|h| h.value.as_str().to_string());
    let delay = {
        let mut st = state.lock();
        st.requests.push(Recorded {
            path: path.clone(),
            query: query.clone(),
            authorization: authorization.clone(),
        });
        st.api_delay
    };
    thread::sleep(delay);

    let st = state.lock();
    let bearer = authorization
        .as_deref()
        .and_then(|value| value.strip_prefix("Bearer "))
        .unwrap_or("");
    if bearer.is_empty() || st.reject_all || st.reject_tokens.contains(bearer) {
        return (401, r#"{"message": "Unauthorized", "error": 401}"#.to_string());
    }

    let specific = query
        .get("after")
        .and_then(|after| st.routes.get(&format!("{}|{}", path, after)));
    match specific.or_else(|| st.routes.get(&path)) {
        Some((status, body)) => (*status, body.clone()),
        None => (404, r#"{"message": "Not Found", "error": 404}"#.to_string()),
    }
}

/// Listing envelope around `children`, each given as `(kind, data)`.
pub fn listing(children: &[(&str, serde_json::Value)], after: Option<&str>) -> String {
    let children: Vec<_> = children
        .iter()
        .map(|(kind, data)| serde_json::json!({"kind": kind, "data": data}))
        .collect();
    serde_json::json!({
        "kind": "Listing",
        "data": {"after": after, "before": null, "children": children}
    })
    .to_string()
}

pub fn post(id: &str, title: &str) -> (&'static str, serde_json::Value) {
    (
        "t3",
        serde_json::json!({
            "id": id,
            "name": format!("t3_{}", id),
            "title": title,
            "author": "someone",
            "subreddit": "rust",
            "ups": 10,
            "downs": 1,
            "num_comments": 4,
            "created_utc": 1700000000.0,
            "url": format!("https://example.com/{}", id),
            "permalink": format!("/r/rust/comments/{}/x/", id),
            "thumbnail": "self",
        }),
    )
}

pub fn subreddit(name: &str, subscribers: i64) -> (&'static str, serde_json::Value) {
    (
        "t5",
        serde_json::json!({
            "id": name.to_lowercase(),
            "name": format!("t5_{}", name.to_lowercase()),
            "display_name": name,
            "public_description": format!("All about {}", name),
            "subscribers": subscribers,
            "url": format!("/r/{}/", name),
        }),
    )
}
