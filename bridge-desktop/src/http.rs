//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{HttpClient, HttpMethod, HttpRequest, HttpResponse},
};
use reqwest::Client;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::io;
use std::time::Duration;
use tracing::{debug, warn};

/// Reqwest-based HTTP client implementation
///
/// Performs exactly one attempt per call. Transport failures (refused or
/// dropped connections, timeouts, truncated bodies) are reported as
/// `BridgeError::ConnectionLost` so the pipeline's retry wrapper can tell
/// them apart from protocol errors.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a new HTTP client with default configuration
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(60))
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .user_agent(concat!("imgflow/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                BridgeError::NotAvailable(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self { client })
    }

    /// Create a new HTTP client with custom configuration
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// Convert bridge HttpMethod to reqwest Method
    fn convert_method(method: HttpMethod) -> Result<reqwest::Method> {
        match method {
            HttpMethod::Get => Ok(reqwest::Method::GET),
            HttpMethod::Put => Ok(reqwest::Method::PUT),
            HttpMethod::Delete => Ok(reqwest::Method::DELETE),
            HttpMethod::Head => Ok(reqwest::Method::HEAD),
            extension => reqwest::Method::from_bytes(extension.as_str().as_bytes()).map_err(|e| {
                BridgeError::OperationFailed(format!("Invalid HTTP method {}: {}", extension, e))
            }),
        }
    }

    /// Build reqwest request from bridge request
    fn build_request(&self, request: HttpRequest) -> Result<reqwest::RequestBuilder> {
        let method = Self::convert_method(request.method)?;
        let mut req = self.client.request(method, &request.url);

        for (key, value) in request.headers {
            req = req.header(key, value);
        }

        if let Some(body) = request.body {
            req = req.body(body);
        }

        if let Some(timeout) = request.timeout {
            req = req.timeout(timeout);
        }

        Ok(req)
    }

    /// Classify a reqwest error
    fn map_error(e: reqwest::Error) -> BridgeError {
        if Self::is_transport_failure(&e) {
            BridgeError::ConnectionLost(e.to_string())
        } else {
            BridgeError::OperationFailed(e.to_string())
        }
    }

    fn is_transport_failure(e: &reqwest::Error) -> bool {
        if e.is_connect() || e.is_timeout() {
            return true;
        }
        if !(e.is_request() || e.is_body()) {
            return false;
        }

        let mut source = e.source();
        while let Some(cause) = source {
            if let Some(hyper_err) = cause.downcast_ref::<hyper::Error>() {
                if hyper_err.is_closed() || hyper_err.is_incomplete_message() {
                    return true;
                }
            }
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                if matches!(
                    io_err.kind(),
                    io::ErrorKind::ConnectionReset
                        | io::ErrorKind::ConnectionAborted
                        | io::ErrorKind::BrokenPipe
                        | io::ErrorKind::UnexpectedEof
                ) {
                    return true;
                }
            }
            source = cause.source();
        }
        false
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let method = request.method;
        let url = request.url.clone();
        debug!(method = %method, url = %url, "Executing HTTP request");

        let response = self.build_request(request)?.send().await.map_err(|e| {
            warn!(method = %method, url = %url, error = %e, "HTTP request failed");
            Self::map_error(e)
        })?;

        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let body = response.bytes().await.map_err(|e| {
            warn!(method = %method, url = %url, error = %e, "Failed to read response body");
            Self::map_error(e)
        })?;

        debug!(method = %method, status = status, size = body.len(), "HTTP request completed");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_method_conversion() {
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Get).unwrap(),
            reqwest::Method::GET
        );
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Propfind)
                .unwrap()
                .as_str(),
            "PROPFIND"
        );
        assert_eq!(
            ReqwestHttpClient::convert_method(HttpMethod::Move)
                .unwrap()
                .as_str(),
            "MOVE"
        );
    }

    #[tokio::test]
    async fn test_refused_connection_is_connection_lost() {
        // Bind then drop to obtain a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = ReqwestHttpClient::new().unwrap();
        let result = client
            .execute(HttpRequest::new(HttpMethod::Get, format!("http://{}/", addr)))
            .await;

        assert!(matches!(result, Err(BridgeError::ConnectionLost(_))));
    }

    #[tokio::test]
    async fn test_dropped_connection_is_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            drop(socket);
        });

        let client = ReqwestHttpClient::new().unwrap();
        let result = client
            .execute(HttpRequest::new(HttpMethod::Get, format!("http://{}/x", addr)))
            .await;

        assert!(
            matches!(result, Err(BridgeError::ConnectionLost(_))),
            "got {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_truncated_body_is_connection_lost() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\npartial")
                .await
                .unwrap();
        });

        let client = ReqwestHttpClient::new().unwrap();
        let result = client
            .execute(HttpRequest::new(HttpMethod::Get, format!("http://{}/x", addr)))
            .await;

        assert!(
            matches!(result, Err(BridgeError::ConnectionLost(_))),
            "got {:?}",
            result
        );
    }

    #[tokio::test]
    async fn test_error_status_is_returned_as_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 4\r\nConnection: close\r\n\r\ngone")
                .await
                .unwrap();
        });

        let client = ReqwestHttpClient::new().unwrap();
        let response = client
            .execute(HttpRequest::new(
                HttpMethod::Propfind,
                format!("http://{}/remote.php/dav/files/u/x", addr),
            ))
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert!(response.is_client_error());
        assert_eq!(response.text().unwrap(), "gone");
    }
}
