use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::{HttpExecutor, PushConnection, PushConnector};
use crate::capabilities::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpResult, PushError,
    MAX_RESPONSE_BODY_SIZE,
};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct ReqwestExecutor {
    client: reqwest::Client,
}

impl ReqwestExecutor {
    pub fn new() -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| HttpError::InvalidRequest {
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }

    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn classify(error: &reqwest::Error, request: &HttpRequest) -> HttpError {
        if error.is_timeout() {
            HttpError::Timeout {
                timeout_ms: request.timeout_ms(),
                request_id: request.request_id().to_string(),
            }
        } else {
            HttpError::Connection {
                host: request.url().host().to_string(),
                message: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl HttpExecutor for ReqwestExecutor {
    async fn execute(&self, request: HttpRequest) -> HttpResult {
        let request_id = request.request_id().to_string();
        let method = match request.method() {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        };

        let mut builder = self
            .client
            .request(method, request.url().as_str())
            .timeout(Duration::from_millis(request.timeout_ms()))
            .header(REQUEST_ID_HEADER, &request_id);
        for (name, value) in request.headers().iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body() {
            builder = builder.body(body.to_vec());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(&e, &request))?;

        let status = response.status().as_u16();
        if let Some(length) = response.content_length() {
            let size = usize::try_from(length).unwrap_or(usize::MAX);
            if size > MAX_RESPONSE_BODY_SIZE {
                return Err(HttpError::ResponseTooLarge {
                    size,
                    max: MAX_RESPONSE_BODY_SIZE,
                });
            }
        }

        let mut headers = HttpHeaders::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            if let Err(e) = headers.insert(name.as_str(), value) {
                debug!(%request_id, error = %e, "dropping response header");
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Self::classify(&e, &request))?;
        if body.len() > MAX_RESPONSE_BODY_SIZE {
            return Err(HttpError::ResponseTooLarge {
                size: body.len(),
                max: MAX_RESPONSE_BODY_SIZE,
            });
        }

        debug!(%request_id, status, bytes = body.len(), "response received");
        Ok(HttpResponse::new(status, headers, body.to_vec(), request_id))
    }
}

#[derive(Debug, Clone)]
pub struct TungsteniteConnector {
    connect_timeout: Duration,
}

impl Default for TungsteniteConnector {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl TungsteniteConnector {
    #[must_use]
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl PushConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PushConnection>, PushError> {
        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| PushError::Timeout)?
            .map_err(|e| PushError::Connect {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        debug!(%url, status = %response.status(), "push handshake complete");
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl PushConnection for TungsteniteConnection {
    async fn next_frame(&mut self) -> Option<Result<String, PushError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(PushError::transport(e.to_string()))),
            };

            match message {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => debug!("skipping non-UTF-8 binary frame"),
                },
                Message::Close(_) => return None,
                // tungstenite answers pings itself
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "push socket close failed");
        }
    }
}
