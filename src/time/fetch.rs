//! HTTP fetch collaborator used by the time service
//!
//! Responses are scoped resources: the body buffer is released through
//! [`HttpResponse::close`], and [`ScopedResponse`] guarantees that call on
//! every exit path.

use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use thiserror::Error;

/// HTTP fetch errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Request(String),
    #[error("HTTP status {0}")]
    Status(u16),
}

/// A fetched response whose buffers are released by `close`
pub trait HttpResponse: Send {
    fn text(&self) -> &str;

    fn close(&mut self);
}

/// Minimal GET capability
#[async_trait]
pub trait HttpFetch: Send + Sync {
    type Response: HttpResponse;

    async fn get(&self, url: &str) -> Result<Self::Response, FetchError>;
}

/// Closes the wrapped response when dropped
pub struct ScopedResponse<R: HttpResponse> {
    inner: R,
}

impl<R: HttpResponse> ScopedResponse<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: HttpResponse> Deref for ScopedResponse<R> {
    type Target = R;

    fn deref(&self) -> &R {
        &self.inner
    }
}

impl<R: HttpResponse> DerefMut for ScopedResponse<R> {
    fn deref_mut(&mut self) -> &mut R {
        &mut self.inner
    }
}

impl<R: HttpResponse> Drop for ScopedResponse<R> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Fully buffered response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedResponse {
    body: String,
}

impl BufferedResponse {
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

impl HttpResponse for BufferedResponse {
    fn text(&self) -> &str {
        &self.body
    }

    fn close(&mut self) {
        self.body = String::new();
    }
}

/// reqwest backed fetch
#[derive(Debug, Clone)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetch {
    type Response = BufferedResponse;

    async fn get(&self, url: &str) -> Result<BufferedResponse, FetchError> {
        // The URL carries the service key, strip it from error messages.
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Request(e.without_url().to_string()))?;

        Ok(BufferedResponse::new(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingResponse {
        closes: Arc<AtomicUsize>,
    }

    impl HttpResponse for CountingResponse {
        fn text(&self) -> &str {
            "body"
        }

        fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_scoped_response_closes_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let scoped = ScopedResponse::new(CountingResponse {
                closes: closes.clone(),
            });
            assert_eq!(scoped.text(), "body");
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scoped_response_closes_on_early_return() {
        fn read(scoped: ScopedResponse<CountingResponse>) -> Result<(), &'static str> {
            if scoped.text() == "body" {
                return Err("bail out");
            }
            Ok(())
        }

        let closes = Arc::new(AtomicUsize::new(0));
        let result = read(ScopedResponse::new(CountingResponse {
            closes: closes.clone(),
        }));
        assert!(result.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_buffered_response_close_releases_body() {
        let mut response = BufferedResponse::new("2024-01-01 00:00:00.000 1 1");
        assert!(!response.text().is_empty());
        response.close();
        assert_eq!(response.text(), "");
    }
}
