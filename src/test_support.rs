use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use crate::error::TransportError;
use crate::http::{ByteStream, HttpClient, HttpResponse};

/// Canned behaviour for one URL
#[derive(Clone, Debug)]
pub(crate) enum MockRoute {
    Body {
        chunks: Vec<Vec<u8>>,
        content_length: Option<u64>,
        /// Never finish the stream after the chunks are sent
        stall: bool,
    },
    Timeout,
    Status(u16),
}

/// In-memory HTTP client keyed by URL. Unknown URLs answer 404.
#[derive(Clone, Default)]
pub(crate) struct MockHttpClient {
    routes: Arc<Mutex<HashMap<String, MockRoute>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockHttpClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_route(self, url: &str, route: MockRoute) -> Self {
        self.routes.lock().unwrap().insert(url.to_string(), route);
        self
    }

    pub(crate) fn with_body(self, url: &str, body: impl Into<Vec<u8>>) -> Self {
        let body = body.into();
        let len = body.len() as u64;
        self.with_route(
            url,
            MockRoute::Body {
                chunks: vec![body],
                content_length: Some(len),
                stall: false,
            },
        )
    }

    pub(crate) fn with_chunks(self, url: &str, chunks: Vec<Vec<u8>>) -> Self {
        let len = chunks.iter().map(|c| c.len() as u64).sum();
        self.with_route(
            url,
            MockRoute::Body {
                chunks,
                content_length: Some(len),
                stall: false,
            },
        )
    }

    pub(crate) fn requests_for(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|u| *u == url)
            .count()
    }

    pub(crate) fn total_requests(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn route(&self, url: &str) -> Option<MockRoute> {
        self.requests.lock().unwrap().push(url.to_string());
        self.routes.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_bytes(&self, url: &str) -> Result<Bytes, TransportError> {
        match self.route(url) {
            Some(MockRoute::Body { chunks, .. }) => Ok(Bytes::from(chunks.concat())),
            Some(MockRoute::Timeout) => Err(TransportError::Timeout),
            Some(MockRoute::Status(status)) => Err(TransportError::Status(status)),
            None => Err(TransportError::Status(404)),
        }
    }

    async fn get_stream(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let (status, content_length, chunks, stall) = match self.route(url) {
            Some(MockRoute::Body {
                chunks,
                content_length,
                stall,
            }) => (200, content_length, chunks, stall),
            Some(MockRoute::Timeout) => return Err(TransportError::Timeout),
            Some(MockRoute::Status(status)) => (status, None, Vec::new(), false),
            None => (404, None, Vec::new(), false),
        };

        let sent = futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))));
        let body: ByteStream = if stall {
            Box::pin(sent.chain(futures::stream::pending()))
        } else {
            Box::pin(sent)
        };

        Ok(HttpResponse {
            status,
            content_length,
            body,
        })
    }
}

/// An RSS document with one item per `(title, enclosure url)` pair
pub(crate) fn rss_document(title: &str, items: &[(&str, Option<&str>)]) -> String {
    let items: String = items
        .iter()
        .map(|(item_title, enclosure)| {
            let enclosure = enclosure
                .map(|url| format!(r#"<enclosure url="{url}" type="audio/mpeg"/>"#))
                .unwrap_or_default();
            format!(
                "<item><title>{item_title}</title><link>http://e.test/{item_title}</link>\
                 <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>{enclosure}</item>"
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rss version="2.0"><channel><title>{title}</title><description>d</description>{items}</channel></rss>"#
    )
}
