use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::decoder::FrameDecoder;
use super::state::{Action, Conversation, RequestId, TurnEvent};
use crate::client::ClientError;
use crate::relay::{StreamRequest, StreamVariant};

const EVENT_BUFFER: usize = 64;

/// Starts chat turns against a relay.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: Client,
    base_url: String,
    overall_timeout: Duration,
}

/// One running turn request.
///
/// Dropping the handle cancels the request.
#[derive(Debug)]
pub struct StreamHandle {
    id: RequestId,
    events: mpsc::Receiver<TurnEvent>,
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Next event of the turn, `None` once the request task has finished.
    pub async fn next_event(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    /// Abort the request; the relay sees the connection close.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Feed events into `conversation` until this turn stops being active.
    pub async fn drive(&mut self, conversation: &mut Conversation) {
        while conversation.active_id() == Some(self.id) {
            let Some(event) = self.next_event().await else {
                break;
            };
            conversation.dispatch(Action::Event { id: self.id, event });
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl StreamClient {
    pub fn new(base_url: impl Into<String>, overall_timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self::with_http(Client::builder().build()?, base_url, overall_timeout))
    }

    pub fn with_http(http: Client, base_url: impl Into<String>, overall_timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            overall_timeout,
        }
    }

    /// Send the request on a background task and return its handle.
    pub fn start(&self, request: &StreamRequest, variant: StreamVariant) -> StreamHandle {
        let id = RequestId::new();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();

        let http = self.http.clone();
        let url = format!("{}{}", self.base_url, variant.path());
        let request = request.clone();
        let timeout = self.overall_timeout;
        let token = cancel.clone();

        tokio::spawn(async move {
            let work = run_request(&http, &url, &request, &tx);
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Turn {} cancelled", id);
                }
                finished = tokio::time::timeout(timeout, work) => {
                    if finished.is_err() {
                        debug!("Turn {} exceeded {:?}", id, timeout);
                        let _ = tx.send(TurnEvent::TimedOut).await;
                    }
                }
            }
        });

        StreamHandle {
            id,
            events: rx,
            cancel,
        }
    }
}

async fn run_request(
    http: &Client,
    url: &str,
    request: &StreamRequest,
    tx: &mpsc::Sender<TurnEvent>,
) {
    let response = match http.post(url).json(request).send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = tx.send(TurnEvent::TransportFailed(e.to_string())).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v.get("detail").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(body);
        let _ = tx
            .send(TurnEvent::Rejected {
                status: status.as_u16(),
                detail,
            })
            .await;
        return;
    }

    let mut decoder = FrameDecoder::new();
    let mut body = response.bytes_stream();
    while let Some(read) = body.next().await {
        match read {
            Ok(bytes) => {
                for event in decoder.push(&bytes) {
                    if forward(tx, event).await {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(TurnEvent::TransportFailed(e.to_string())).await;
                return;
            }
        }
    }

    for event in decoder.finish() {
        if forward(tx, event).await {
            return;
        }
    }
    let _ = tx.send(TurnEvent::Closed).await;
}

/// Send one frame; true when the turn is over or nobody listens.
async fn forward(tx: &mpsc::Sender<TurnEvent>, event: crate::frame::StreamEvent) -> bool {
    let terminal = event.is_terminal();
    tx.send(TurnEvent::Frame(event)).await.is_err() || terminal
}
