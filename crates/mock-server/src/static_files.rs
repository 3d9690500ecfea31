//! Embedded observer UI asset and the directory-serving mode.

use std::path::Path;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::Response;

use crate::router;

const INDEX_HTML: &str = include_str!("../assets/index.html");

/// The request-log viewer page mounted at the log path.
pub fn index_response() -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(Bytes::from_static(INDEX_HTML.as_bytes())));
    resp.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    resp
}

/// Serve a file out of `root` for directory mode. Directory requests fall
/// back to their `index.html`; anything that escapes the root is refused.
pub async fn serve_dir(root: &Path, request_path: &str) -> Response<Full<Bytes>> {
    let decoded = urlencoding::decode(request_path)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| request_path.to_string());

    let mut target = root.to_path_buf();
    for part in decoded.split('/') {
        match part {
            "" | "." => {}
            ".." => return router::not_found(),
            part => target.push(part),
        }
    }

    if tokio::fs::metadata(&target)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
    {
        target.push("index.html");
    }

    match tokio::fs::read(&target).await {
        Ok(contents) => {
            let mime = mime_guess::from_path(&target).first_or_octet_stream();
            let mut resp = Response::new(Full::new(Bytes::from(contents)));
            if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
                resp.headers_mut().insert(CONTENT_TYPE, value);
            }
            resp
        }
        Err(_) => router::not_found(),
    }
}
