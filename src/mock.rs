//! Local stand-in for a model server.
//!
//! Every request is answered by a responder closure and recorded on a
//! channel so callers can inspect what was sent.

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use http::{header, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
    Request, Response,
};
use hyper_util::rt::TokioIo;
use serde_json::Value;
use tokio::{
    net::TcpListener,
    task::{JoinError, JoinHandle},
};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

impl RecordedRequest {
    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: String,
}

impl MockReply {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn ok_json(body: &Value) -> Self {
        Self::new(StatusCode::OK, body.to_string())
    }
}

/// Answer in the shape of Ollama's `/api/generate`.
pub fn ollama_reply(model: &str, text: &str) -> MockReply {
    MockReply::ok_json(&serde_json::json!({
        "model": model,
        "response": text,
        "done": true,
    }))
}

/// Answer in the shape of an OpenAI-style chat completion.
pub fn open_webui_reply(model: &str, text: &str) -> MockReply {
    MockReply::ok_json(&serde_json::json!({
        "id": format!("chatcmpl-{}", rand::random::<u32>()),
        "object": "chat.completion",
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop",
        }],
    }))
}

pub struct MockServer {
    addr: SocketAddr,
    requests: flume::Receiver<RecordedRequest>,
    handle: JoinHandle<()>,
}

impl MockServer {
    /// Serve on an ephemeral localhost port.
    pub async fn start<F>(responder: F) -> std::io::Result<Self>
    where
        F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
    {
        Self::bind(SocketAddr::from(([127, 0, 0, 1], 0)), responder).await
    }

    pub async fn bind<F>(addr: SocketAddr, responder: F) -> std::io::Result<Self>
    where
        F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let (tx, rx) = flume::unbounded();
        let handle = tokio::spawn(accept_loop(listener, Arc::new(responder), tx));
        tracing::info!("mock model server listening on {}", addr);
        Ok(Self {
            addr,
            requests: rx,
            handle,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Endpoint to use as `URL_GENERATE`.
    pub fn url(&self) -> String {
        format!("http://{}/api/generate", self.addr)
    }

    pub fn requests(&self) -> &flume::Receiver<RecordedRequest> {
        &self.requests
    }

    /// Block until the accept loop ends.
    pub async fn serve_forever(mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn accept_loop<F>(
    listener: TcpListener,
    responder: Arc<F>,
    recorder: flume::Sender<RecordedRequest>,
) where
    F: Fn(&RecordedRequest) -> MockReply + Send + Sync + 'static,
{
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::warn!("accept failed: {}", e);
                continue;
            }
        };
        let responder = responder.clone();
        let recorder = recorder.clone();
        tokio::spawn(async move {
            let service = service_fn(move |request: Request<Incoming>| {
                let responder = responder.clone();
                let recorder = recorder.clone();
                async move { handle(request, responder.as_ref(), &recorder).await }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!("connection closed: {}", e);
            }
        });
    }
}

async fn handle<F>(
    request: Request<Incoming>,
    responder: &F,
    recorder: &flume::Sender<RecordedRequest>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    F: Fn(&RecordedRequest) -> MockReply,
{
    let (parts, body) = request.into_parts();
    let header_value = |name: header::HeaderName| {
        parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let authorization = header_value(header::AUTHORIZATION);
    let content_type = header_value(header::CONTENT_TYPE);
    let method = parts.method.to_string();
    let path = parts.uri.path().to_string();

    let body = match body.collect().await {
        Ok(collected) => String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
        Err(e) => {
            tracing::warn!("failed to read request body: {}", e);
            String::new()
        }
    };

    let recorded = RecordedRequest {
        method,
        path,
        authorization,
        content_type,
        body,
    };
    let reply = responder(&recorded);
    // nobody listening is fine
    let _ = recorder.send(recorded);

    let response = Response::builder()
        .status(reply.status)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(reply.body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())));
    Ok(response)
}
