// SPDX-License-Identifier: MIT
//! Bidirectional, line-delimited JSON-RPC 2.0 over a writable and a readable
//! byte stream.
//!
//! The critical routing rule: for every inbound frame, `method` is tested
//! **before** `id`. A frame carrying both is an inbound request from the
//! peer, not a response to one of ours — routing by `id` first silently
//! drops inbound requests, the well-known hazard of bidirectional JSON-RPC.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, trace, warn};

/// JSON-RPC error taxonomy (§7): parse/method/params failures are
/// non-retriable protocol errors; connection failures are retriable in
/// principle but this transport never auto-reconnects.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    #[error("rpc error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("connection closed")]
    ConnectionClosed,
}

type MethodHandlerFn = Box<
    dyn Fn(String, Value, Option<Value>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

struct Inner {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<Value, RpcError>>>>,
    writer: Mutex<Pin<Box<dyn AsyncWrite + Send>>>,
    handler: Mutex<Option<MethodHandlerFn>>,
    closed: std::sync::atomic::AtomicBool,
}

/// A connected JSON-RPC transport. Cheap to clone (shares one connection).
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl Transport {
    /// Spawn the reader task over `reader`/`writer` and return a handle.
    /// `OnMethod` must be called once, before any inbound frame needing
    /// routing arrives.
    pub fn spawn<R, W>(reader: R, writer: W) -> Self
    where
        R: tokio::io::AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let inner = Arc::new(Inner {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            writer: Mutex::new(Box::pin(writer)),
            handler: Mutex::new(None),
            closed: std::sync::atomic::AtomicBool::new(false),
        });
        let transport = Transport { inner: inner.clone() };

        tokio::spawn(read_loop(inner, reader));

        transport
    }

    /// Register the sole sink for incoming method-bearing messages. Expected
    /// to be called once at construction.
    pub async fn on_method<F, Fut>(&self, handler: F)
    where
        F: Fn(String, Value, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: MethodHandlerFn = Box::new(move |method, params, id| Box::pin(handler(method, params, id)));
        *self.inner.handler.lock().await = Some(boxed);
    }

    /// Allocates the next id, registers a completion slot, writes one line,
    /// and blocks until the slot receives a result, an error, or the
    /// transport closes.
    pub async fn send(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().await.insert(id, tx);

        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        if let Err(e) = self.write_line(&frame).await {
            self.inner.pending.lock().await.remove(&id);
            warn!(error = %e, "write failed, abandoning pending call");
            return Err(RpcError::ConnectionClosed);
        }

        rx.await.unwrap_or(Err(RpcError::ConnectionClosed))
    }

    /// Writes one line with no id; never blocks for a response.
    pub async fn notify(&self, method: &str, params: Value) {
        let frame = serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params });
        if let Err(e) = self.write_line(&frame).await {
            warn!(error = %e, "notify write failed");
        }
    }

    /// Writes a response frame correlated to an inbound request.
    pub async fn respond(&self, id: Value, result: Value) {
        let frame = serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result });
        if let Err(e) = self.write_line(&frame).await {
            warn!(error = %e, "respond write failed");
        }
    }

    /// Writes an RPC-error response frame correlated to an inbound request.
    pub async fn respond_error(&self, id: Value, code: i64, message: &str) {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        });
        if let Err(e) = self.write_line(&frame).await {
            warn!(error = %e, "respond_error write failed");
        }
    }

    /// Unblocks every pending `send` with a connection-closed error. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut pending = self.inner.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(RpcError::ConnectionClosed));
        }
    }

    /// Test-only hook: writes a raw line verbatim, bypassing JSON framing,
    /// to exercise the reader's tolerance of non-JSON noise.
    #[cfg(test)]
    async fn write_raw_line(&self, line: &str) {
        let mut w = self.inner.writer.lock().await;
        let _ = w.write_all(line.as_bytes()).await;
        let _ = w.write_all(b"\n").await;
        let _ = w.flush().await;
    }

    async fn write_line(&self, frame: &Value) -> std::io::Result<()> {
        let mut line = serde_json::to_string(frame)?;
        line.push('\n');
        let mut w = self.inner.writer.lock().await;
        w.write_all(line.as_bytes()).await?;
        w.flush().await
    }
}

async fn read_loop<R>(inner: Arc<Inner>, reader: R)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(l)) => l,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "transport read error");
                break;
            }
        };
        let trimmed = line.trim_start();
        if !trimmed.starts_with('{') {
            // Tolerates non-JSON diagnostic output interleaved by subprocesses.
            continue;
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, "skipping malformed inbound frame");
                continue;
            }
        };
        handle_frame(&inner, value).await;
    }

    let transport = Transport { inner: inner.clone() };
    transport.close().await;
}

async fn handle_frame(inner: &Arc<Inner>, value: Value) {
    let method = value.get("method").and_then(|m| m.as_str()).map(str::to_string);
    let id = value.get("id").cloned();

    // Critical routing rule: test `method` before `id`.
    if let Some(method) = method {
        let params = value.get("params").cloned().unwrap_or(Value::Null);
        debug!(method = %method, is_request = id.is_some(), "inbound frame routed to method handler");
        let handler = inner.handler.lock().await;
        if let Some(h) = handler.as_ref() {
            h(method, params, id).await;
        }
        return;
    }

    let Some(id) = id.and_then(|v| v.as_i64()) else {
        trace!("skipping frame with neither method nor a numeric id");
        return;
    };

    let mut pending = inner.pending.lock().await;
    let Some(tx) = pending.remove(&id) else {
        trace!(id, "response for unknown/already-resolved id");
        return;
    };
    drop(pending);

    if let Some(error) = value.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = error.get("message").and_then(|m| m.as_str()).unwrap_or("").to_string();
        let _ = tx.send(Err(RpcError::Remote { code, message }));
    } else {
        let result = value.get("result").cloned().unwrap_or(Value::Null);
        let _ = tx.send(Ok(result));
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Build a transport pair where writes to `a` are readable from `b` and
    /// vice versa, simulating a peer connection in-process.
    fn connect() -> (Transport, Transport) {
        let (a_write, b_read) = duplex(8192);
        let (b_write, a_read) = duplex(8192);
        let a = Transport::spawn(a_read, a_write);
        let b = Transport::spawn(b_read, b_write);
        (a, b)
    }

    #[tokio::test]
    async fn s1_round_trip_echo() {
        let (client, peer) = connect();
        peer.on_method(move |method, params, id| {
            let peer = peer.clone();
            async move {
                if method == "test/echo" {
                    if let Some(id) = id {
                        peer.respond(id, serde_json::json!({"echoed": true})).await;
                    }
                }
                let _ = params;
            }
        })
        .await;

        let result = client.send("test/echo", serde_json::json!({"msg": "hello"})).await.unwrap();
        assert_eq!(result, serde_json::json!({"echoed": true}));
    }

    #[tokio::test]
    async fn s1_concurrent_requests_route_by_id_not_order() {
        let (client, peer) = connect();
        // Peer answers method_B before method_A, reversed from request order.
        peer.on_method(move |method, params, id| {
            let peer = peer.clone();
            async move {
                let Some(id) = id else { return };
                let tag = if method == "method_A" { "A" } else { "B" };
                if method == "method_B" {
                    peer.respond(id, serde_json::json!({"from": tag})).await;
                } else {
                    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                    peer.respond(id, serde_json::json!({"from": tag})).await;
                }
                let _ = params;
            }
        })
        .await;

        let a = client.send("method_A", Value::Null);
        let b = client.send("method_B", Value::Null);
        let (ra, rb) = tokio::join!(a, b);
        assert_eq!(ra.unwrap()["from"], "A");
        assert_eq!(rb.unwrap()["from"], "B");
    }

    #[tokio::test]
    async fn inbound_request_routes_to_handler_not_response_dispatcher() {
        // Invariant 3: a frame with both `method` and `id` must route to the
        // method handler, never be mistaken for a response to one of our own
        // sends (which would happen if `id` were tested before `method`).
        let (client, peer) = connect();
        let seen: Arc<tokio::sync::Mutex<Vec<(String, Option<Value>)>>> =
            Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        client
            .on_method(move |method, _params, id| {
                let seen2 = seen2.clone();
                async move {
                    seen2.lock().await.push((method, id));
                }
            })
            .await;

        // peer's `send` writes a frame with both `method` and a real `id`.
        let forward = tokio::spawn(async move { peer.send("peer/request", serde_json::json!({"n": 1})).await });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let recorded = seen.lock().await;
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "peer/request");
        assert!(recorded[0].1.is_some());
        drop(recorded);
        drop(client);

        // client never answered, so the peer's own send is left pending; abort it.
        forward.abort();
    }

    #[tokio::test]
    async fn malformed_frame_does_not_break_the_reader_loop() {
        let (client, peer) = connect();
        let seen = Arc::new(tokio::sync::Mutex::new(false));
        let seen2 = seen.clone();
        client
            .on_method(move |_method, _params, _id| {
                let seen2 = seen2.clone();
                async move {
                    *seen2.lock().await = true;
                }
            })
            .await;

        peer.write_raw_line("not json at all").await;
        peer.write_raw_line("   ").await;
        peer.notify("valid/after/garbage", Value::Null).await;

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(*seen.lock().await, "reader loop must keep processing frames after skipping junk lines");
    }

    #[tokio::test]
    async fn send_after_close_surfaces_connection_closed() {
        let (client, peer) = connect();
        drop(peer);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let result = client.send("anything", Value::Null).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn remote_error_is_surfaced_verbatim() {
        let (client, peer) = connect();
        peer.on_method(move |_method, _params, id| {
            let peer = peer.clone();
            async move {
                if let Some(id) = id {
                    peer.respond_error(id, -32601, "method not found").await;
                }
            }
        })
        .await;

        let err = client.send("bad/method", Value::Null).await.unwrap_err();
        match err {
            RpcError::Remote { code, message } => {
                assert_eq!(code, -32601);
                assert_eq!(message, "method not found");
            }
            other => panic!("expected Remote error, got {other:?}"),
        }
    }
}
