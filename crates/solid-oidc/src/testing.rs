//! Shared mock HTTP client for module tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::http_client::HttpClient;

/// Queue-backed mock: tests push responses in the order the code under test
/// will issue requests, and can inspect what was sent.
#[derive(Clone, Default)]
pub(crate) struct MockClient {
    responses: Arc<Mutex<VecDeque<http::Response<Vec<u8>>>>>,
    requests: Arc<Mutex<Vec<(http::request::Parts, Vec<u8>)>>>,
}

impl MockClient {
    pub fn push_response(&self, status: u16, body: Vec<u8>) {
        let response = http::Response::builder()
            .status(status)
            .body(body)
            .unwrap();
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn push_json(&self, status: u16, body: serde_json::Value) {
        self.push_response(status, serde_json::to_vec(&body).unwrap());
    }

    pub fn with_json(status: u16, body: serde_json::Value) -> Self {
        let client = Self::default();
        client.push_json(status, body);
        client
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> (http::request::Parts, Vec<u8>) {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("no request was sent")
    }

    pub fn last_body_string(&self) -> String {
        String::from_utf8(self.last_request().1).unwrap()
    }
}

impl HttpClient for MockClient {
    type Error = std::convert::Infallible;

    async fn send_http(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> core::result::Result<http::Response<Vec<u8>>, Self::Error> {
        let (parts, body) = request.into_parts();
        self.requests.lock().unwrap().push((parts, body));
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("mock response queue is empty"))
    }
}
