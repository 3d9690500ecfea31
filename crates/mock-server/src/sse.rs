//! Server-Sent Events fan-out.
//!
//! The broadcaster keeps one bounded queue per connected client. Sends are
//! non-blocking: a subscriber that cannot keep up loses messages instead of
//! stalling the request path.

use std::collections::HashMap;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use http_body_util::combinators::BoxBody;
use http_body_util::StreamBody;
use hyper::body::Frame;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION, CONTENT_TYPE,
};
use hyper::Response;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::server::ResponseBody;

const SUBSCRIBER_QUEUE: usize = 32;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    channels: HashMap<u64, mpsc::Sender<String>>,
}

#[derive(Default)]
pub struct EventBroadcaster {
    subscribers: Mutex<Subscribers>,
}

impl EventBroadcaster {
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let mut subs = self.subscribers.lock();
        let id = subs.next_id;
        subs.next_id += 1;
        subs.channels.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().channels.remove(&id);
    }

    /// Deliver `message` to every subscriber without waiting. Full queues
    /// drop the message; closed ones are pruned.
    pub fn broadcast(&self, message: &str) {
        let mut subs = self.subscribers.lock();
        let mut closed = Vec::new();
        for (id, tx) in &subs.channels {
            match tx.try_send(message.to_string()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }
        for id in closed {
            subs.channels.remove(&id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().channels.len()
    }
}

/// `text/event-stream` response for one SSE client. The body stream owns the
/// subscription and drops it when the client disconnects.
pub fn sse_response(events: Arc<EventBroadcaster>) -> Response<ResponseBody> {
    let (id, rx) = events.subscribe();
    debug!("sse client {id} connected");

    let stream = EventStream {
        rx,
        _guard: Subscription { id, events },
    };

    let mut resp = Response::new(BoxBody::new(StreamBody::new(stream)));
    let headers = resp.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    resp
}

struct Subscription {
    id: u64,
    events: Arc<EventBroadcaster>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        debug!("sse client {} disconnected", self.id);
        self.events.unsubscribe(self.id);
    }
}

struct EventStream {
    rx: mpsc::Receiver<String>,
    _guard: Subscription,
}

impl Stream for EventStream {
    type Item = Result<Frame<Bytes>, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(message)) => Poll::Ready(Some(Ok(Frame::data(Bytes::from(format!(
                "data: {message}\n\n"
            )))))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn broadcast_reaches_all_subscribers() {
        let events = EventBroadcaster::default();
        let (_, mut rx1) = events.subscribe();
        let (_, mut rx2) = events.subscribe();

        events.broadcast("hello");

        assert_eq!(rx1.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx2.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn slow_subscriber_never_blocks_broadcast() {
        let events = EventBroadcaster::default();
        let (_, rx) = events.subscribe();

        let start = Instant::now();
        for i in 0..(SUBSCRIBER_QUEUE + 100) {
            events.broadcast(&format!("msg {i}"));
        }
        assert!(
            start.elapsed() < Duration::from_secs(1),
            "broadcast must not wait on a full queue"
        );
        drop(rx);
    }

    #[tokio::test]
    async fn overflow_drops_rather_than_buffers() {
        let events = EventBroadcaster::default();
        let (_, mut rx) = events.subscribe();

        for i in 0..(SUBSCRIBER_QUEUE + 10) {
            events.broadcast(&format!("msg {i}"));
        }

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_QUEUE);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let events = EventBroadcaster::default();
        let (_, rx) = events.subscribe();
        assert_eq!(events.subscriber_count(), 1);

        drop(rx);
        events.broadcast("anyone there?");
        assert_eq!(events.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_ends_the_stream() {
        let events = EventBroadcaster::default();
        let (id, mut rx) = events.subscribe();
        events.unsubscribe(id);
        assert_eq!(rx.recv().await, None);
    }
}
