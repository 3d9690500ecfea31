//! Method + path dispatch table.
//!
//! One radix router per HTTP method; endpoint paths use the `{name}`
//! parameter syntax the parser already emits. A path that matches under a
//! different method yields 405 rather than 404.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Method, Response, StatusCode};
use mock_core::Endpoint;
use tracing::warn;

#[derive(Default)]
pub struct Router {
    methods: HashMap<Method, matchit::Router<usize>>,
    endpoints: Vec<Arc<Endpoint>>,
}

pub enum Route {
    Endpoint {
        endpoint: Arc<Endpoint>,
        params: HashMap<String, String>,
    },
    NotFound,
    MethodNotAllowed,
}

impl Router {
    pub fn build(endpoints: Vec<Endpoint>) -> Self {
        let mut router = Router::default();
        for endpoint in endpoints {
            let endpoint = Arc::new(endpoint);
            let index = router.endpoints.len();
            let table = router
                .methods
                .entry(endpoint.method.clone())
                .or_insert_with(matchit::Router::new);
            match table.insert(endpoint.path.clone(), index) {
                Ok(()) => router.endpoints.push(endpoint),
                Err(err) => {
                    warn!("skipping route {} {}: {err}", endpoint.method, endpoint.path);
                }
            }
        }
        router
    }

    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Route {
        if let Some(table) = self.methods.get(method) {
            if let Ok(matched) = table.at(path) {
                let params = matched
                    .params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect();
                return Route::Endpoint {
                    endpoint: Arc::clone(&self.endpoints[*matched.value]),
                    params,
                };
            }
        }

        let known_elsewhere = self
            .methods
            .iter()
            .any(|(m, table)| m != method && table.at(path).is_ok());
        if known_elsewhere {
            Route::MethodNotAllowed
        } else {
            Route::NotFound
        }
    }
}

pub fn not_found() -> Response<Full<Bytes>> {
    text_response(
        StatusCode::NOT_FOUND,
        Bytes::from_static(b"The requested resource could not be found"),
    )
}

pub fn method_not_allowed(method: &Method) -> Response<Full<Bytes>> {
    text_response(
        StatusCode::METHOD_NOT_ALLOWED,
        Bytes::from(format!(
            "The {method} method is not supported for this resource"
        )),
    )
}

pub(crate) fn text_response(status: StatusCode, body: Bytes) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
