//! Writer task for the worker's stdin.
//!
//! Dispatchers never touch the pipe directly: they push calls into a bounded
//! queue and this single task writes them one frame at a time, so concurrent
//! sends can never interleave bytes. Calls reach the worker in queue order.

use std::sync::Arc;

use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::codec::write_frame;
use crate::broker::pending::PendingTable;
use crate::envelope::Call;

/// Handle to a running writer task.
///
/// Dropping the handle cancels the task.
pub(crate) struct WriterTaskHandle {
    _join_handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl WriterTaskHandle {
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for WriterTaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn the writer task consuming `rx`.
///
/// A write failure means the worker's stdin is gone: the pending table is
/// closed so every waiter fails instead of waiting forever.
pub(crate) fn spawn_writer_task(
    stdin: ChildStdin,
    rx: mpsc::Receiver<Call>,
    table: Arc<PendingTable>,
) -> WriterTaskHandle {
    let cancel_token = CancellationToken::new();
    let join_handle = tokio::spawn(writer_loop(stdin, rx, table, cancel_token.clone()));

    WriterTaskHandle {
        _join_handle: join_handle,
        cancel_token,
    }
}

async fn writer_loop<W>(
    mut stdin: W,
    mut rx: mpsc::Receiver<Call>,
    table: Arc<PendingTable>,
    cancel_token: CancellationToken,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                log::debug!(
                    target: "offload::transport::writer",
                    "Writer task cancelled, shutting down"
                );
                return;
            }

            call = rx.recv() => {
                let Some(call) = call else {
                    log::debug!(
                        target: "offload::transport::writer",
                        "Outbound queue closed, writer exiting"
                    );
                    return;
                };

                if let Err(e) = write_frame(&mut stdin, &call).await {
                    log::warn!(
                        target: "offload::transport::writer",
                        "Write error for call {}: {}, closing channel",
                        call.key(),
                        e
                    );
                    table.close(format!("failed to write to worker: {}", e));
                    return;
                }
                log::trace!(
                    target: "offload::transport::writer",
                    "Sent call {} ({})",
                    call.key(),
                    call.target_method()
                );
            }
        }
    }
}
