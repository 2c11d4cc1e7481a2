//! Mock implementations for testing
//!
//! Provides a mock [`Transport`] and a mock [`HttpFetch`] so sessions and the
//! time source can be exercised without a broker or a network. Both mocks are
//! cheap to clone; clones share state, so a test can keep a handle while the
//! session owns the transport.

use crate::time::{FetchError, HttpFetch, HttpResponse};
use crate::transport::{ConnectParams, QoS, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A message handed to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub qos: QoS,
}

/// Which transport calls should fail
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockFailures {
    pub connect: bool,
    pub disconnect: bool,
    pub publish: bool,
    pub subscribe: bool,
    pub pump: bool,
}

/// Mock transport for testing
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    pub events: Arc<Mutex<VecDeque<Vec<TransportEvent>>>>,
    pub connect_calls: Arc<Mutex<Vec<ConnectParams>>>,
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    pub subscriptions: Arc<Mutex<Vec<(String, QoS)>>>,
    pub disconnect_calls: Arc<AtomicUsize>,
    pub pump_calls: Arc<AtomicUsize>,
    pub failures: Arc<Mutex<MockFailures>>,
    /// Acknowledgment queued automatically by each `connect`
    pub connack_on_connect: Arc<Mutex<Option<u8>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose broker accepts every connection
    pub fn accepting() -> Self {
        Self::acknowledging(0)
    }

    /// A transport whose broker answers every connection with `code`
    pub fn acknowledging(code: u8) -> Self {
        Self {
            connack_on_connect: Arc::new(Mutex::new(Some(code))),
            ..Self::default()
        }
    }

    pub fn with_failures(failures: MockFailures) -> Self {
        Self {
            failures: Arc::new(Mutex::new(failures)),
            ..Self::default()
        }
    }

    /// Queue a batch returned by one future `pump`
    pub async fn push_events(&self, batch: Vec<TransportEvent>) {
        self.events.lock().await.push_back(batch);
    }

    pub async fn set_failures(&self, failures: MockFailures) {
        *self.failures.lock().await = failures;
    }

    pub async fn get_connect_calls(&self) -> Vec<ConnectParams> {
        self.connect_calls.lock().await.clone()
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub async fn get_subscriptions(&self) -> Vec<(String, QoS)> {
        self.subscriptions.lock().await.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    pub fn pump_count(&self) -> usize {
        self.pump_calls.load(Ordering::SeqCst)
    }

    pub async fn clear_history(&self) {
        self.connect_calls.lock().await.clear();
        self.published_messages.lock().await.clear();
        self.subscriptions.lock().await.clear();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, params: &ConnectParams) -> Result<(), TransportError> {
        self.connect_calls.lock().await.push(params.clone());
        if self.failures.lock().await.connect {
            return Err(TransportError::ConnectionFailed(
                "Mock connect failure".to_string(),
            ));
        }
        if let Some(code) = *self.connack_on_connect.lock().await {
            self.events
                .lock()
                .await
                .push_back(vec![TransportEvent::ConnAck(code)]);
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.lock().await.disconnect {
            return Err(TransportError::DisconnectFailed(
                "Mock disconnect failure".to_string(),
            ));
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
    ) -> Result<(), TransportError> {
        if self.failures.lock().await.publish {
            return Err(TransportError::PublishFailed(
                "Mock publish failure".to_string(),
            ));
        }
        self.published_messages.lock().await.push(PublishedMessage {
            topic: topic.to_string(),
            payload,
            qos,
        });
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        if self.failures.lock().await.subscribe {
            return Err(TransportError::SubscribeFailed(
                "Mock subscribe failure".to_string(),
            ));
        }
        self.subscriptions.lock().await.push((topic.to_string(), qos));
        Ok(())
    }

    async fn pump(&mut self) -> Result<Vec<TransportEvent>, TransportError> {
        self.pump_calls.fetch_add(1, Ordering::SeqCst);
        if self.failures.lock().await.pump {
            return Err(TransportError::ConnectionLost("Mock pump failure".to_string()));
        }
        Ok(self.events.lock().await.pop_front().unwrap_or_default())
    }
}

/// Response produced by [`MockFetch`]
#[derive(Debug)]
pub struct MockResponse {
    body: String,
    closes: Arc<AtomicUsize>,
}

impl HttpResponse for MockResponse {
    fn text(&self) -> &str {
        &self.body
    }

    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock HTTP fetch answering from a queue
#[derive(Debug, Clone, Default)]
pub struct MockFetch {
    pub responses: Arc<std::sync::Mutex<VecDeque<Result<String, FetchError>>>>,
    pub requested_urls: Arc<std::sync::Mutex<Vec<String>>>,
    pub closes: Arc<AtomicUsize>,
}

impl MockFetch {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fetch whose next response has `body`
    pub fn with_body(body: impl Into<String>) -> Self {
        let fetch = Self::new();
        fetch.push_response(Ok(body.into()));
        fetch
    }

    pub fn push_response(&self, response: Result<String, FetchError>) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    pub fn requested_urls(&self) -> Vec<String> {
        self.requested_urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HttpFetch for MockFetch {
    type Response = MockResponse;

    async fn get(&self, url: &str) -> Result<MockResponse, FetchError> {
        self.requested_urls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(url.to_string());

        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Request("No mock response queued".to_string())));

        next.map(|body| MockResponse {
            body,
            closes: self.closes.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ConnectParams {
        ConnectParams {
            client_id: "client".to_string(),
            username: "unused".to_string(),
            password: "token".to_string(),
            keep_alive: std::time::Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn test_mock_transport_records_calls() {
        let handle = MockTransport::accepting();
        let mut transport = handle.clone();

        transport.connect(&params()).await.unwrap();
        assert_eq!(
            transport.pump().await.unwrap(),
            vec![TransportEvent::ConnAck(0)]
        );
        assert!(transport.pump().await.unwrap().is_empty());

        transport
            .publish("a/b", b"x".to_vec(), QoS::AtMostOnce)
            .await
            .unwrap();
        transport.subscribe("a/c", QoS::AtLeastOnce).await.unwrap();
        transport.disconnect().await.unwrap();

        assert_eq!(handle.get_connect_calls().await.len(), 1);
        assert_eq!(handle.get_published_messages().await[0].topic, "a/b");
        assert_eq!(
            handle.get_subscriptions().await,
            vec![("a/c".to_string(), QoS::AtLeastOnce)]
        );
        assert_eq!(handle.disconnect_count(), 1);
        assert_eq!(handle.pump_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_transport_failures() {
        let mut transport = MockTransport::with_failures(MockFailures {
            publish: true,
            ..Default::default()
        });

        assert!(transport
            .publish("t", Vec::new(), QoS::AtMostOnce)
            .await
            .is_err());
        assert!(transport.subscribe("t", QoS::AtMostOnce).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_fetch_queue_and_close_tracking() {
        let fetch = MockFetch::with_body("hello");
        fetch.push_response(Err(FetchError::Status(429)));

        let mut response = fetch.get("http://one").await.unwrap();
        assert_eq!(response.text(), "hello");
        response.close();
        assert_eq!(fetch.close_count(), 1);

        assert_eq!(
            fetch.get("http://two").await.unwrap_err(),
            FetchError::Status(429)
        );
        assert!(fetch.get("http://three").await.is_err());
        assert_eq!(fetch.requested_urls().len(), 3);
    }
}
