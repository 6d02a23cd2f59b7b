use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::error::BackendError;
use crate::types::{AccountInfo, AccountUtxo, FeeEstimate, TransactionData};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Responder = oneshot::Sender<Result<Value, BackendError>>;
type PendingTable = Arc<Mutex<HashMap<String, Responder>>>;

/// Normalise a backend URL: websocket URLs are kept, anything else is taken
/// as the Blockbook web endpoint and mapped to `wss://<host><path>/websocket`.
pub fn websocket_url(url: &str) -> String {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        return url.to_string();
    }
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    format!("wss://{}/websocket", rest.trim_end_matches('/'))
}

#[derive(Deserialize)]
struct Response {
    id: String,
    #[serde(default)]
    data: Value,
}

/// Handles to an open connection.
struct Link {
    outgoing: mpsc::Sender<Message>,
    closed: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

#[derive(Default)]
struct ConnectionState {
    refs: usize,
    link: Option<Link>,
}

/// Multiplexed Blockbook websocket client.
///
/// A reader task owns the receiving half of the socket and resolves pending
/// requests by id; a writer task owns the sending half. Callers only touch
/// the pending table and the outgoing queue.
pub struct BlockbookClient {
    url: String,
    config: ClientConfig,
    state: tokio::sync::Mutex<ConnectionState>,
    pending: PendingTable,
    next_id: AtomicU64,
}

fn lock(pending: &PendingTable) -> MutexGuard<'_, HashMap<String, Responder>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fail_pending(pending: &PendingTable, error: BackendError) {
    let drained: Vec<_> = lock(pending).drain().collect();
    if !drained.is_empty() {
        debug!(count = drained.len(), %error, "failing pending requests");
    }
    for (_, responder) in drained {
        let _ = responder.send(Err(error.clone()));
    }
}

fn dispatch(pending: &PendingTable, text: &str) {
    let response: Response = match serde_json::from_str(text) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "discarding undecodable frame");
            return;
        }
    };
    let Some(responder) = lock(pending).remove(&response.id) else {
        warn!(id = %response.id, "response for unknown request");
        return;
    };
    let result = match response.data.get("error") {
        Some(error) if !error.is_null() => {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| error.to_string(), str::to_string);
            Err(BackendError::Rpc(message))
        }
        _ => Ok(response.data),
    };
    // The caller may have timed out and gone away.
    let _ = responder.send(result);
}

async fn read_loop(mut read: SplitStream<WsStream>, pending: PendingTable, closed: Arc<AtomicBool>) {
    let mut error = BackendError::ConnectionClosed;
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => dispatch(&pending, &text),
            Ok(Message::Close(frame)) => {
                debug!(?frame, "remote closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "websocket read failed");
                error = BackendError::Transport(e.to_string());
                break;
            }
        }
    }
    closed.store(true, Ordering::SeqCst);
    fail_pending(&pending, error);
}

async fn write_loop(mut write: SplitSink<WsStream, Message>, mut outgoing: mpsc::Receiver<Message>) {
    while let Some(message) = outgoing.recv().await {
        let closing = matches!(message, Message::Close(_));
        if let Err(e) = write.send(message).await {
            debug!(error = %e, "websocket write failed");
            break;
        }
        if closing {
            break;
        }
    }
}

impl BlockbookClient {
    pub fn new(url: &str) -> Self {
        Self::with_config(url, ClientConfig::default())
    }

    pub fn with_config(url: &str, config: ClientConfig) -> Self {
        Self {
            url: websocket_url(url),
            config,
            state: tokio::sync::Mutex::new(ConnectionState::default()),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the connection, or join the one already open. A link the server
    /// has closed is replaced without resetting the nesting count.
    pub async fn connect(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if state.refs > 0 {
            let live = state
                .link
                .as_ref()
                .is_some_and(|link| !link.closed.load(Ordering::SeqCst));
            if !live {
                if let Some(stale) = state.link.take() {
                    stale.reader.abort();
                    stale.writer.abort();
                }
                warn!(url = %self.url, "connection lost, reopening");
                state.link = Some(self.open_link().await?);
            }
            state.refs += 1;
            debug!(refs = state.refs, "reusing open connection");
            return Ok(());
        }

        state.link = Some(self.open_link().await?);
        state.refs = 1;
        info!(url = %self.url, "connected to blockbook");
        Ok(())
    }

    async fn open_link(&self) -> Result<Link, BackendError> {
        let (ws, _) = tokio::time::timeout(self.config.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| BackendError::Connect {
                url: self.url.clone(),
                reason: "handshake timed out".into(),
            })?
            .map_err(|e| BackendError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        let (write, read) = ws.split();

        let (outgoing, outgoing_rx) = mpsc::channel::<Message>(64);
        let closed = Arc::new(AtomicBool::new(false));
        let writer = tokio::spawn(write_loop(write, outgoing_rx));
        let reader = tokio::spawn(read_loop(read, self.pending.clone(), closed.clone()));

        Ok(Link {
            outgoing,
            closed,
            reader,
            writer,
        })
    }

    /// Leave the connection. The last caller out closes it and fails every
    /// request still waiting for a response.
    pub async fn disconnect(&self) {
        let mut state = self.state.lock().await;
        match state.refs {
            0 => return,
            1 => state.refs = 0,
            _ => {
                state.refs -= 1;
                debug!(refs = state.refs, "connection still in use");
                return;
            }
        }

        if let Some(link) = state.link.take() {
            link.reader.abort();
            let _ = link.outgoing.send(Message::Close(None)).await;
            let writer = link.writer.abort_handle();
            if tokio::time::timeout(self.config.connect_timeout, link.writer)
                .await
                .is_err()
            {
                warn!("websocket writer did not finish, aborting");
                writer.abort();
            }
        }
        fail_pending(&self.pending, BackendError::ConnectionClosed);
        info!(url = %self.url, "disconnected from blockbook");
    }

    pub async fn is_connected(&self) -> bool {
        let state = self.state.lock().await;
        state
            .link
            .as_ref()
            .is_some_and(|link| !link.closed.load(Ordering::SeqCst))
    }

    /// Number of nested `connect` calls currently holding the connection.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.refs
    }

    /// Send one request and wait for the response carrying the same id.
    pub async fn fetch_json(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        let (outgoing, closed) = {
            let state = self.state.lock().await;
            let link = state.link.as_ref().ok_or(BackendError::NotConnected)?;
            (link.outgoing.clone(), link.closed.clone())
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
        let (responder, response) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), responder);
        if closed.load(Ordering::SeqCst) {
            lock(&self.pending).remove(&id);
            return Err(BackendError::ConnectionClosed);
        }

        let request = json!({ "id": id, "method": method, "params": params });
        debug!(%id, method, "sending request");
        if outgoing.send(Message::Text(request.to_string())).await.is_err() {
            lock(&self.pending).remove(&id);
            return Err(BackendError::ConnectionClosed);
        }
        drop(outgoing);

        match tokio::time::timeout(self.config.request_timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BackendError::ConnectionClosed),
            Err(_) => {
                lock(&self.pending).remove(&id);
                Err(BackendError::Timeout {
                    method: method.to_string(),
                    secs: self.config.request_timeout.as_secs(),
                })
            }
        }
    }

    async fn fetch<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, BackendError> {
        let data = self.fetch_json(method, params).await?;
        serde_json::from_value(data).map_err(|e| BackendError::Protocol(format!("{method}: {e}")))
    }
}

#[async_trait]
impl Backend for BlockbookClient {
    async fn connect(&self) -> Result<(), BackendError> {
        BlockbookClient::connect(self).await
    }

    async fn disconnect(&self) {
        BlockbookClient::disconnect(self).await
    }

    async fn get_address_data(&self, address: &str) -> Result<AccountInfo, BackendError> {
        self.fetch(
            "getAccountInfo",
            json!({ "descriptor": address, "details": "basic" }),
        )
        .await
    }

    async fn get_utxos(&self, address: &str) -> Result<Vec<AccountUtxo>, BackendError> {
        self.fetch("getAccountUtxo", json!({ "descriptor": address }))
            .await
    }

    async fn get_transaction(&self, txid: &str) -> Result<TransactionData, BackendError> {
        self.fetch("getTransactionSpecific", json!({ "txid": txid }))
            .await
    }

    async fn estimate_fee(&self, blocks: u32) -> Result<u64, BackendError> {
        let estimates: Vec<FeeEstimate> = self
            .fetch("estimateFee", json!({ "blocks": [blocks] }))
            .await?;
        estimates
            .first()
            .map(|estimate| estimate.fee_per_unit)
            .ok_or_else(|| BackendError::Protocol("estimateFee: empty answer".into()))
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String, BackendError> {
        let data = self.fetch_json("sendTransaction", json!({ "hex": tx_hex })).await?;
        data.get("result")
            .and_then(Value::as_str)
            .or_else(|| data.as_str())
            .map(str::to_string)
            .ok_or_else(|| BackendError::Protocol(format!("sendTransaction: {data}")))
    }
}
