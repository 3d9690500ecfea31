//! Request/response capture around the mock routes.
//!
//! Each exchange is condensed into a [`LogRecord`]: the JSON document pushed
//! to SSE subscribers and the source of the terminal log line.

use std::collections::HashMap;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderMap, CONTENT_TYPE};
use hyper::http::{request, response};
use hyper::{Request, Response};
use serde::Serialize;
use tracing::{info, warn};

use crate::server::MockServer;

#[derive(Debug, Serialize)]
pub struct LogRecord {
    pub request: RequestRecord,
    pub response: ResponseRecord,
}

#[derive(Debug, Serialize)]
pub struct RequestRecord {
    pub header: HashMap<String, Vec<String>>,
    pub method: String,
    pub url: String,
    /// Raw request dump: request line, headers, body.
    pub details: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct ResponseRecord {
    pub header: HashMap<String, Vec<String>>,
    pub status: u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    /// Wall-clock time of day, `HH:MM:SS`.
    pub time: String,
    /// Synthetic status-line/header/body rendering for the UI.
    pub details: String,
    pub body: String,
}

/// Collect the request, dispatch it, capture the response, then broadcast
/// the record and emit the terminal line.
pub async fn handle_logged(server: &MockServer, req: Request<Incoming>) -> Response<Full<Bytes>> {
    let (parts, body) = req.into_parts();
    let req_body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(err) => {
            warn!("failed to read request body: {err}");
            Bytes::new()
        }
    };

    let response = server.serve_routes(&parts.method, &parts.uri).await;
    let (resp_parts, resp_body) = response.into_parts();
    let resp_bytes = match resp_body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    };

    let record = LogRecord::capture(&parts, &req_body, &resp_parts, &resp_bytes);
    match serde_json::to_string(&record) {
        Ok(json) => server.events().broadcast(&json),
        Err(err) => warn!("failed to serialize log record: {err}"),
    }
    info!(
        "{:>3} | {:<7} {}",
        record.response.status, record.request.method, record.request.url
    );

    Response::from_parts(resp_parts, Full::new(resp_bytes))
}

impl LogRecord {
    pub fn capture(
        req: &request::Parts,
        req_body: &Bytes,
        resp: &response::Parts,
        resp_body: &Bytes,
    ) -> Self {
        let req_body_str = String::from_utf8_lossy(req_body).into_owned();
        let resp_body_str = String::from_utf8_lossy(resp_body).into_owned();
        let status_text = resp.status.canonical_reason().unwrap_or("").to_string();
        let content_type = resp
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        let response_details = format!(
            "{:?} {} {}\nContent-Type: {}\nDate: {}\nContent-Length: {}\n\n{}\n",
            resp.version,
            resp.status.as_u16(),
            status_text,
            content_type,
            chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT"),
            resp_body.len(),
            resp_body_str,
        );

        LogRecord {
            request: RequestRecord {
                header: header_map(&req.headers),
                method: req.method.to_string(),
                url: req.uri.to_string(),
                details: dump_request(req, &req_body_str),
                body: req_body_str,
            },
            response: ResponseRecord {
                header: header_map(&resp.headers),
                status: resp.status.as_u16(),
                status_text,
                time: chrono::Local::now().format("%H:%M:%S").to_string(),
                details: response_details,
                body: resp_body_str,
            },
        }
    }
}

fn dump_request(req: &request::Parts, body: &str) -> String {
    let mut out = format!("{} {} {:?}\r\n", req.method, req.uri, req.version);
    for (name, value) in &req.headers {
        out.push_str(&format!(
            "{}: {}\r\n",
            title_case(name.as_str()),
            value.to_str().unwrap_or("")
        ));
    }
    if !body.is_empty() {
        out.push_str("\r\n");
        out.push_str(body);
    }
    out.trim().to_string()
}

fn header_map(headers: &HeaderMap) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for (name, value) in headers {
        out.entry(title_case(name.as_str()))
            .or_default()
            .push(value.to_str().unwrap_or("").to_string());
    }
    out
}

/// `content-type` → `Content-Type`, the canonical form browsers and the Go
/// stdlib display.
fn title_case(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::{Method, StatusCode};

    fn request_parts() -> request::Parts {
        let req = Request::builder()
            .method(Method::POST)
            .uri("/users?status=active")
            .header("content-type", "application/json")
            .body(())
            .expect("request");
        req.into_parts().0
    }

    fn response_parts(status: StatusCode) -> response::Parts {
        let resp = Response::builder()
            .status(status)
            .header("content-type", "text/html; charset=utf-8")
            .body(())
            .expect("response");
        resp.into_parts().0
    }

    #[test]
    fn title_case_canonicalizes() {
        assert_eq!(title_case("content-type"), "Content-Type");
        assert_eq!(title_case("x-request-id"), "X-Request-Id");
        assert_eq!(title_case("accept"), "Accept");
    }

    #[test]
    fn record_json_shape() {
        let record = LogRecord::capture(
            &request_parts(),
            &Bytes::from_static(b"{\"a\":1}"),
            &response_parts(StatusCode::OK),
            &Bytes::from_static(b"hello"),
        );
        let value = serde_json::to_value(&record).expect("serializes");

        assert_eq!(value["request"]["method"], "POST");
        assert_eq!(value["request"]["url"], "/users?status=active");
        assert_eq!(value["request"]["body"], "{\"a\":1}");
        assert_eq!(
            value["request"]["header"]["Content-Type"][0],
            "application/json"
        );

        assert_eq!(value["response"]["status"], 200);
        assert_eq!(value["response"]["statusText"], "OK");
        assert_eq!(value["response"]["body"], "hello");
        let time = value["response"]["time"].as_str().expect("time string");
        assert_eq!(time.len(), 8);
        assert_eq!(time.as_bytes()[2], b':');
    }

    #[test]
    fn request_details_include_line_headers_and_body() {
        let record = LogRecord::capture(
            &request_parts(),
            &Bytes::from_static(b"payload"),
            &response_parts(StatusCode::OK),
            &Bytes::new(),
        );
        let details = &record.request.details;
        assert!(details.starts_with("POST /users?status=active HTTP/1.1"));
        assert!(details.contains("Content-Type: application/json"));
        assert!(details.ends_with("payload"));
    }

    #[test]
    fn response_details_carry_status_and_length() {
        let record = LogRecord::capture(
            &request_parts(),
            &Bytes::new(),
            &response_parts(StatusCode::NOT_FOUND),
            &Bytes::from_static(b"missing"),
        );
        let details = &record.response.details;
        assert!(details.starts_with("HTTP/1.1 404 Not Found"));
        assert!(details.contains("Content-Length: 7"));
        assert!(details.contains("Content-Type: text/html; charset=utf-8"));
    }
}
