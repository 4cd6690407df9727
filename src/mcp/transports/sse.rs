//! Server-Sent Events (SSE) transport for MCP servers.
//!
//! Generalized to actually speak
//! JSON-RPC over HTTP: each outbound request is a POST whose response is
//! either a single JSON body or a `text/event-stream` of `data:` lines.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::errors::TransportError;
use crate::mcp::codec::{
    decode_frame, InboundFrame, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
};
use crate::mcp::transports::{BaseTransport, TransportType};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// SSE transport for connecting to remote MCP servers.
///
/// Connects to MCP servers using Server-Sent Events for
/// real-time streaming communication.
pub struct SSETransport {
    /// Server URL (e.g., "https://api.example.com/mcp/sse").
    pub url: String,
    /// Optional HTTP headers.
    pub headers: HashMap<String, String>,
    is_connected: Mutex<bool>,
    client: reqwest::Client,
    notifications_tx: broadcast::Sender<JsonRpcNotification>,
}

impl SSETransport {
    /// Create a new SSETransport.
    ///
    /// # Arguments
    /// * `url` - Server URL.
    /// * `headers` - Optional HTTP headers.
    pub fn new(url: &str, headers: Option<HashMap<String, String>>) -> Self {
        let (notifications_tx, _) = broadcast::channel(256);
        Self {
            url: url.to_string(),
            headers: headers.unwrap_or_default(),
            is_connected: Mutex::new(false),
            client: reqwest::Client::new(),
            notifications_tx,
        }
    }

    fn build_headers(&self) -> reqwest::header::HeaderMap {
        let mut map = reqwest::header::HeaderMap::new();
        for (k, v) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                reqwest::header::HeaderName::from_bytes(k.as_bytes()),
                reqwest::header::HeaderValue::from_str(v),
            ) {
                map.insert(name, value);
            }
        }
        map
    }

    /// Perform one POST attempt; no retry here.
    async fn post_once(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        let resp = self
            .client
            .post(&self.url)
            .headers(self.build_headers())
            .json(request)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;

        let status = resp.status();
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Protocol {
                status: status.as_u16(),
                message: body,
            });
        }
        if status.is_server_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Transient {
                message: format!("HTTP {}: {}", status.as_u16(), body),
            });
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            self.read_event_stream(resp, &request.id).await
        } else {
            let body = resp.text().await.map_err(|e| TransportError::Transient {
                message: e.to_string(),
            })?;
            match decode_frame(&body)? {
                InboundFrame::Response(r) => Ok(r),
                InboundFrame::Notification(n) => {
                    let _ = self.notifications_tx.send(n);
                    Err(TransportError::Transient {
                        message: "server sent only a notification for a request".to_string(),
                    })
                }
            }
        }
    }

    /// Read a `text/event-stream` body, forwarding interleaved notifications
    /// and returning once the response matching `id` arrives.
    async fn read_event_stream(
        &self,
        resp: reqwest::Response,
        id: &crate::mcp::codec::RequestId,
    ) -> Result<JsonRpcResponse, TransportError> {
        use futures::StreamExt;

        let mut stream = resp.bytes_stream();
        let mut buf = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TransportError::Transient {
                message: e.to_string(),
            })?;
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim_end_matches('\r').to_string();
                buf.drain(..=pos);

                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }

                match decode_frame(data)? {
                    InboundFrame::Response(r) if &r.id == id => return Ok(r),
                    InboundFrame::Response(_) => continue,
                    InboundFrame::Notification(n) => {
                        let _ = self.notifications_tx.send(n);
                    }
                }
            }
        }

        Err(TransportError::Transient {
            message: "event stream ended before matching response arrived".to_string(),
        })
    }
}

fn classify_reqwest_error(e: &reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Transient {
            message: format!("request timed out: {e}"),
        }
    } else if e.is_connect() {
        TransportError::Unavailable {
            message: format!("connection failed: {e}"),
        }
    } else {
        TransportError::Transient {
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl BaseTransport for SSETransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Sse
    }

    fn connected(&self) -> bool {
        *self.is_connected.lock()
    }

    async fn connect(&mut self) -> Result<(), anyhow::Error> {
        if self.connected() {
            return Ok(());
        }
        log::info!("SSE transport connecting to: {}", self.url);
        *self.is_connected.lock() = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), anyhow::Error> {
        if !self.connected() {
            return Ok(());
        }
        log::info!("SSE transport disconnecting from: {}", self.url);
        *self.is_connected.lock() = false;
        Ok(())
    }

    fn server_identifier(&self) -> String {
        format!("sse:{}", self.url)
    }

    async fn send_request(
        &self,
        request: JsonRpcRequest,
    ) -> Result<JsonRpcResponse, TransportError> {
        let mut attempt = 0u32;
        loop {
            match self.post_once(&request).await {
                Ok(r) => return Ok(r),
                Err(TransportError::Transient { message }) if attempt + 1 < MAX_ATTEMPTS => {
                    let delay = std::cmp::min(Duration::from_secs(1 << attempt.min(5)), BACKOFF_CAP);
                    log::warn!(
                        "SSE transport transient failure (attempt {}/{}): {} — retrying in {:?}",
                        attempt + 1,
                        MAX_ATTEMPTS,
                        message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_notification(
        &self,
        notification: JsonRpcNotification,
    ) -> Result<(), TransportError> {
        let resp = self
            .client
            .post(&self.url)
            .headers(self.build_headers())
            .json(&notification)
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| classify_reqwest_error(&e))?;
        if resp.status().is_server_error() {
            return Err(TransportError::Transient {
                message: format!("HTTP {} sending notification", resp.status()),
            });
        }
        Ok(())
    }

    fn subscribe_notifications(&self) -> broadcast::Receiver<JsonRpcNotification> {
        self.notifications_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_identifier_format() {
        let t = SSETransport::new("https://example.com/sse", None);
        assert_eq!(t.server_identifier(), "sse:https://example.com/sse");
    }

    #[tokio::test]
    async fn connect_marks_connected() {
        let mut t = SSETransport::new("https://example.com/sse", None);
        assert!(!t.connected());
        t.connect().await.unwrap();
        assert!(t.connected());
        t.disconnect().await.unwrap();
        assert!(!t.connected());
    }
}
