//! Response collector: the single reader of the worker's stdout.
//!
//! Drains worker messages as they arrive and publishes every response into
//! the pending table. Reading is event-driven; there is no poll interval.
//!
//! - The first `Ready` message completes the startup handshake
//! - Each `Response` is inserted under its key
//! - EOF or a broken stream closes the table, failing all waiters

use std::sync::Arc;

use tokio::io::{AsyncBufRead, BufReader};
use tokio::process::ChildStdout;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::read_frame;
use crate::broker::pending::{InsertOutcome, PendingTable};
use crate::envelope::WorkerMessage;

/// What the worker announced in its `Ready` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReadyInfo {
    pub(crate) pid: u32,
    pub(crate) methods: Vec<String>,
}

/// Handle to a running collector task.
///
/// Dropping the handle cancels the task.
pub(crate) struct CollectorHandle {
    _join_handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl CollectorHandle {
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn the collector task reading from `stdout`.
///
/// `ready_tx` fires once with the worker's `Ready` message. If the worker
/// exits first, the table is closed before `ready_tx` is dropped, so the
/// waiting side can report the close reason.
pub(crate) fn spawn_collector_task(
    stdout: ChildStdout,
    table: Arc<PendingTable>,
    ready_tx: oneshot::Sender<ReadyInfo>,
) -> CollectorHandle {
    let cancel_token = CancellationToken::new();
    let join_handle = tokio::spawn(collector_loop(
        BufReader::new(stdout),
        table,
        ready_tx,
        cancel_token.clone(),
    ));

    CollectorHandle {
        _join_handle: join_handle,
        cancel_token,
    }
}

async fn collector_loop<R>(
    mut reader: R,
    table: Arc<PendingTable>,
    ready_tx: oneshot::Sender<ReadyInfo>,
    cancel_token: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut ready_tx = Some(ready_tx);

    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                log::debug!(
                    target: "offload::transport::collector",
                    "Collector task cancelled, shutting down"
                );
                return;
            }

            result = read_frame::<_, WorkerMessage>(&mut reader) => {
                match result {
                    Ok(Some(message)) => handle_message(message, &table, &mut ready_tx),
                    Ok(None) => {
                        log::warn!(
                            target: "offload::transport::collector",
                            "Worker closed its output"
                        );
                        table.close("worker process closed its output");
                        return;
                    }
                    Err(e) if e.is_recoverable() => {
                        log::warn!(
                            target: "offload::transport::collector",
                            "Skipping malformed worker message: {}",
                            e
                        );
                    }
                    Err(e) => {
                        log::warn!(
                            target: "offload::transport::collector",
                            "Reader error: {}, failing pending calls",
                            e
                        );
                        table.close(format!("failed to read from worker: {}", e));
                        return;
                    }
                }
            }
        }
    }
}

fn handle_message(
    message: WorkerMessage,
    table: &PendingTable,
    ready_tx: &mut Option<oneshot::Sender<ReadyInfo>>,
) {
    match message {
        WorkerMessage::Ready { pid, methods } => match ready_tx.take() {
            Some(tx) => {
                let _ = tx.send(ReadyInfo { pid, methods });
            }
            None => {
                log::warn!(
                    target: "offload::transport::collector",
                    "Ignoring repeated ready message from worker {}",
                    pid
                );
            }
        },
        WorkerMessage::Response(response) => {
            let key = response.key();
            match table.insert(response) {
                InsertOutcome::Stored => {
                    log::trace!(
                        target: "offload::transport::collector",
                        "Collected response {}",
                        key
                    );
                }
                InsertOutcome::Duplicate => {
                    log::warn!(
                        target: "offload::transport::collector",
                        "Dropping duplicate response for {}",
                        key
                    );
                }
                InsertOutcome::Abandoned => {
                    log::debug!(
                        target: "offload::transport::collector",
                        "Dropping late response for abandoned call {}",
                        key
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{CallKey, Response};
    use crate::transport::codec::encode;
    use serde_json::json;

    fn frames(messages: &[WorkerMessage]) -> Vec<u8> {
        messages.iter().flat_map(|m| encode(m).unwrap()).collect()
    }

    fn ready() -> WorkerMessage {
        WorkerMessage::Ready {
            pid: 7,
            methods: vec!["echo".to_string()],
        }
    }

    #[tokio::test]
    async fn publishes_responses_and_reports_ready() {
        let key = CallKey::new();
        let bytes = frames(&[ready(), WorkerMessage::Response(Response::ok(key, json!("hi")))]);
        let table = Arc::new(PendingTable::new());
        let (ready_tx, ready_rx) = oneshot::channel();

        collector_loop(&bytes[..], table.clone(), ready_tx, CancellationToken::new()).await;

        let info = ready_rx.await.expect("ready should be reported");
        assert_eq!(info.pid, 7);
        assert_eq!(info.methods, vec!["echo"]);
        assert_eq!(table.claim(key).unwrap().result(), Some(&json!("hi")));
    }

    #[tokio::test]
    async fn eof_closes_table() {
        let table = Arc::new(PendingTable::new());
        let (ready_tx, ready_rx) = oneshot::channel();

        collector_loop(&b""[..], table.clone(), ready_tx, CancellationToken::new()).await;

        assert!(ready_rx.await.is_err(), "ready sender dropped without a message");
        let reason = table.closed_reason().expect("table should be closed");
        assert!(reason.contains("closed its output"), "got: {}", reason);
    }

    #[tokio::test]
    async fn malformed_message_is_skipped() {
        let key = CallKey::new();
        let mut bytes = b"Content-Length: 13\r\n\r\n{\"type\":\"x\"}\n".to_vec();
        bytes.extend(frames(&[WorkerMessage::Response(Response::ok(key, json!(1)))]));
        let table = Arc::new(PendingTable::new());
        let (ready_tx, _ready_rx) = oneshot::channel();

        collector_loop(&bytes[..], table.clone(), ready_tx, CancellationToken::new()).await;

        assert!(table.claim(key).is_some(), "frame after the bad one is collected");
    }

    #[tokio::test]
    async fn broken_framing_closes_table() {
        let table = Arc::new(PendingTable::new());
        let (ready_tx, _ready_rx) = oneshot::channel();

        collector_loop(
            &b"garbage\r\n"[..],
            table.clone(),
            ready_tx,
            CancellationToken::new(),
        )
        .await;

        let reason = table.closed_reason().expect("table should be closed");
        assert!(reason.contains("failed to read"), "got: {}", reason);
    }

    #[tokio::test]
    async fn repeated_ready_is_ignored() {
        let key = CallKey::new();
        let bytes = frames(&[
            ready(),
            ready(),
            WorkerMessage::Response(Response::ok(key, json!(null))),
        ]);
        let table = Arc::new(PendingTable::new());
        let (ready_tx, _ready_rx) = oneshot::channel();

        collector_loop(&bytes[..], table.clone(), ready_tx, CancellationToken::new()).await;

        assert!(table.claim(key).is_some());
    }
}
