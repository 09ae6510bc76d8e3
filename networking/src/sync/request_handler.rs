/// One-shot block request to a single peer.
///
/// The handler sends a `GetBlocksRequest` carrying the start height and a
/// random nonce, then waits for the matching response. The timeout is armed
/// before the send. Responses with another nonce belong to an earlier request
/// and are dropped.
use std::sync::Arc;
use std::time::Duration;

use containers::Height;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::req_resp::{AccountingMessage, GetBlocksRequest, GetBlocksResponse};
use crate::types::{NodeAddress, P2pTransport};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestFault {
    #[error("sending GetBlocksRequest to {peer} failed: {reason}")]
    SendFailed { peer: NodeAddress, reason: String },

    #[error("no response from {peer} for blocks from height {start_height} after {timeout:?}")]
    Timeout {
        peer: NodeAddress,
        start_height: Height,
        timeout: Duration,
    },

    #[error("request to {peer} was cancelled")]
    Cancelled { peer: NodeAddress },
}

impl RequestFault {
    /// Metric label.
    pub fn reason(&self) -> &'static str {
        match self {
            RequestFault::SendFailed { .. } => "send_failed",
            RequestFault::Timeout { .. } => "timeout",
            RequestFault::Cancelled { .. } => "cancelled",
        }
    }
}

pub struct BlockRequestHandler<T: P2pTransport> {
    transport: Arc<T>,
    peer: NodeAddress,
    start_height: Height,
    nonce: u32,
    timeout: Duration,
    responses: mpsc::UnboundedReceiver<GetBlocksResponse>,
}

impl<T: P2pTransport> BlockRequestHandler<T> {
    /// Returns the handler and the sender inbound responses from `peer` are
    /// delivered to.
    pub fn new(
        transport: Arc<T>,
        peer: NodeAddress,
        start_height: Height,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedSender<GetBlocksResponse>) {
        let (responses_tx, responses) = mpsc::unbounded_channel();
        let handler = Self {
            transport,
            peer,
            start_height,
            nonce: rand::random(),
            timeout,
            responses,
        };
        (handler, responses_tx)
    }

    pub fn nonce(&self) -> u32 {
        self.nonce
    }

    pub async fn request_blocks(mut self) -> Result<GetBlocksResponse, RequestFault> {
        let timeout = tokio::time::sleep(self.timeout);
        tokio::pin!(timeout);

        let request = AccountingMessage::GetBlocksRequest(GetBlocksRequest {
            from_height: self.start_height,
            nonce: self.nonce,
        });

        debug!(
            peer = %self.peer,
            start_height = self.start_height,
            nonce = self.nonce,
            "Requesting blocks"
        );

        tokio::select! {
            biased;
            _ = &mut timeout => return Err(self.timeout_fault()),
            result = self.transport.send(&self.peer, request) => {
                result.map_err(|err| RequestFault::SendFailed {
                    peer: self.peer.clone(),
                    reason: err.to_string(),
                })?;
            }
        }

        loop {
            tokio::select! {
                _ = &mut timeout => return Err(self.timeout_fault()),
                response = self.responses.recv() => match response {
                    Some(response) if response.nonce == self.nonce => {
                        debug!(
                            peer = %self.peer,
                            start_height = self.start_height,
                            num_blocks = response.blocks.len(),
                            "Received requested blocks"
                        );
                        return Ok(response);
                    }
                    Some(response) => {
                        warn!(
                            peer = %self.peer,
                            expected = self.nonce,
                            received = response.nonce,
                            "Dropping response with unexpected nonce"
                        );
                    }
                    None => {
                        return Err(RequestFault::Cancelled {
                            peer: self.peer.clone(),
                        })
                    }
                },
            }
        }
    }

    fn timeout_fault(&self) -> RequestFault {
        RequestFault::Timeout {
            peer: self.peer.clone(),
            start_height: self.start_height,
            timeout: self.timeout,
        }
    }
}

/// Outcome of a spawned request, tagged with the id of its handle.
#[derive(Debug)]
pub struct RequestCompletion {
    pub id: u64,
    pub peer: NodeAddress,
    pub start_height: Height,
    pub result: Result<GetBlocksResponse, RequestFault>,
}

/// Owner-side handle of a spawned `BlockRequestHandler`.
#[derive(Debug)]
pub struct RequestHandle {
    id: u64,
    peer: NodeAddress,
    start_height: Height,
    responses: mpsc::UnboundedSender<GetBlocksResponse>,
    task: JoinHandle<()>,
}

impl RequestHandle {
    /// Run `handler` on its own task and hand the completion to `on_complete`.
    pub fn spawn<T, F>(
        id: u64,
        peer: NodeAddress,
        start_height: Height,
        handler: BlockRequestHandler<T>,
        responses: mpsc::UnboundedSender<GetBlocksResponse>,
        on_complete: F,
    ) -> Self
    where
        T: P2pTransport,
        F: FnOnce(RequestCompletion) + Send + 'static,
    {
        let task_peer = peer.clone();
        let task = tokio::spawn(async move {
            let result = handler.request_blocks().await;
            on_complete(RequestCompletion {
                id,
                peer: task_peer,
                start_height,
                result,
            });
        });

        Self {
            id,
            peer,
            start_height,
            responses,
            task,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &NodeAddress {
        &self.peer
    }

    pub fn start_height(&self) -> Height {
        self.start_height
    }

    /// Hand an inbound response to the handler. Ignored once it has finished.
    pub fn deliver(&self, response: GetBlocksResponse) {
        let _ = self.responses.send(response);
    }

    /// Cancel the request. Safe to call repeatedly and after completion.
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RequestHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
