//! Runtime endpoint model.
//!
//! Parser records that share a `(method, path)` pair are merged into one
//! [`Endpoint`] holding an ordered list of responses. Responses are served
//! round-robin unless a request query parameter matches a record's variant
//! selector, in which case that response wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};
use parking_lot::RwLock;
use rand::Rng;
use tracing::error;

use crate::parse::{format_duration, Record};
use crate::substitute::{self, var_key};

/// One canned response. Immutable once the endpoint is built.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: StatusCode,
    pub header: HashMap<String, String>,
    pub delay: Duration,
    pub body: Vec<u8>,
}

#[derive(Debug)]
struct Inner {
    /// Round-robin cursor; `index % rotation.len()` picks the next slot.
    index: usize,
    /// `key=value` variant selectors pointing at elements of `responses`.
    local_vars: HashMap<String, Arc<MockResponse>>,
    /// Per-endpoint copy of the parser globals. Owned, so mutating one
    /// endpoint never leaks into another across reload generations.
    global_vars: HashMap<String, String>,
}

/// The merged runtime entity for one `(method, path)` pair.
#[derive(Debug)]
pub struct Endpoint {
    pub method: Method,
    pub path: String,
    responses: Vec<Arc<MockResponse>>,
    /// Indices into `responses` that round-robin cycles over: the responses
    /// without a variant selector, or all of them when every response is
    /// selector-bound.
    rotation: Vec<usize>,
    inner: RwLock<Inner>,
}

/// Request-side inputs an endpoint needs to pick and render a response.
#[derive(Debug, Default)]
pub struct RequestInfo {
    /// Path parameters extracted by the router for this endpoint's pattern.
    pub path_params: HashMap<String, String>,
    /// Query parameters in order of first appearance; repeated keys
    /// accumulate values.
    pub query: Vec<(String, Vec<String>)>,
}

impl RequestInfo {
    pub fn new(query: Option<&str>, path_params: HashMap<String, String>) -> Self {
        Self {
            path_params,
            query: parse_query(query.unwrap_or("")),
        }
    }
}

impl Endpoint {
    fn from_group(records: Vec<Record>, global_vars: HashMap<String, String>) -> Option<Self> {
        let first = records.first()?;
        let method = first.method.clone();
        let path = first.path.clone();

        let mut responses = Vec::with_capacity(records.len());
        let mut local_vars = HashMap::new();
        let mut rotation = Vec::new();

        for record in records {
            let Record {
                status,
                delay,
                header,
                body,
                selector,
                ..
            } = record;

            let response = Arc::new(MockResponse {
                status,
                header,
                delay,
                body,
            });
            let index = responses.len();
            match selector {
                Some((key, value)) => {
                    local_vars.insert(var_key(&key, &value), Arc::clone(&response));
                }
                None => rotation.push(index),
            }
            responses.push(response);
        }

        // an endpoint made only of selector-bound responses still has to
        // answer bare requests
        if rotation.is_empty() {
            rotation = (0..responses.len()).collect();
        }

        Some(Self {
            method,
            path,
            responses,
            rotation,
            inner: RwLock::new(Inner {
                index: 0,
                local_vars,
                global_vars,
            }),
        })
    }

    pub fn response_count(&self) -> usize {
        self.responses.len()
    }

    /// Overwrite one of this endpoint's global variables.
    pub fn insert_global(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.write().global_vars.insert(name.into(), value.into());
    }

    pub fn global(&self, name: &str) -> Option<String> {
        self.inner.read().global_vars.get(name).cloned()
    }

    /// Pick and render a response for one request.
    pub async fn respond(&self, info: &RequestInfo) -> Response<Full<Bytes>> {
        let (response, selector) = self.select(info);

        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }

        let vars = self.substitution_vars(info, &response, selector.as_deref());

        let mut builder = Response::builder().status(response.status);
        for (name, value) in &response.header {
            builder = builder.header(name.as_str(), substitute::substitute_str(&vars, value));
        }

        let body = substitute::substitute(&vars, &response.body);
        match builder.body(Full::new(Bytes::from(body))) {
            Ok(resp) => resp,
            Err(err) => {
                error!("failed to build response for {} {}: {err}", self.method, self.path);
                internal_server_error()
            }
        }
    }

    /// Variant-selector lookup first (in query order, random pick among
    /// repeated values), then round-robin.
    fn select(&self, info: &RequestInfo) -> (Arc<MockResponse>, Option<String>) {
        for (key, values) in &info.query {
            let value = pick(values);
            let candidate = var_key(key, value);
            let found = self.inner.read().local_vars.get(&candidate).cloned();
            if let Some(response) = found {
                return (response, Some(candidate));
            }
        }
        (self.next_response(), None)
    }

    fn next_response(&self) -> Arc<MockResponse> {
        let mut inner = self.inner.write();
        let slot = inner.index % self.rotation.len();
        inner.index += 1;
        Arc::clone(&self.responses[self.rotation[slot]])
    }

    /// Build the substitution map. Later inserts override earlier ones:
    /// globals, then path parameters, then `delay`, then query parameters
    /// (the selecting value wins over a random pick for its key).
    fn substitution_vars(
        &self,
        info: &RequestInfo,
        response: &MockResponse,
        selector: Option<&str>,
    ) -> HashMap<String, String> {
        let mut vars = self.inner.read().global_vars.clone();

        for (name, value) in &info.path_params {
            vars.insert(name.clone(), value.clone());
        }

        vars.insert("delay".to_string(), format_duration(response.delay));

        let selected = selector.and_then(|s| s.split_once('='));
        for (key, values) in &info.query {
            match selected {
                Some((sk, sv)) if sk == key.as_str() => {
                    vars.insert(key.clone(), sv.to_string());
                }
                _ => {
                    vars.insert(key.clone(), pick(values).to_string());
                }
            }
        }

        vars
    }
}

fn pick(values: &[String]) -> &str {
    match values {
        [only] => only,
        [] => "",
        many => &many[rand::thread_rng().gen_range(0..many.len())],
    }
}

fn internal_server_error() -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}

/// Group records by `(method, path)` into endpoints, preserving response
/// order within each group. Every endpoint gets its own copy of the global
/// variable map.
pub fn merge(records: Vec<Record>, globals: &HashMap<String, String>) -> Vec<Endpoint> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Record>> = HashMap::new();

    for record in records {
        let key = format!("{}:{}", record.method, record.path);
        if !groups.contains_key(&key) {
            order.push(key.clone());
        }
        groups.entry(key).or_default().push(record);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .filter_map(|group| Endpoint::from_group(group, globals.clone()))
        .collect()
}

/// Parse a query string into `(key, values)` pairs, preserving the order of
/// first appearance and decoding both components.
pub fn parse_query(query: &str) -> Vec<(String, Vec<String>)> {
    let mut out: Vec<(String, Vec<String>)> = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode(key);
        let value = decode(value);
        match out.iter_mut().find(|(name, _)| *name == key) {
            Some((_, values)) => values.push(value),
            None => out.push((key, vec![value])),
        }
    }
    out
}

fn decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| s.to_string())
}
