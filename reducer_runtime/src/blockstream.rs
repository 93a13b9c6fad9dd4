//! Block ingestion.
//!
//! A `BlockSource` streams raw blocks strictly after a starting block hash
//! (or from head). Items flow over a bounded tokio channel; the runner
//! drains it one item at a time, so at most one block is in flight.

use std::future::Future;
use std::sync::Arc;

use reducer_kernel::RawBlock;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::StreamError;

/// One item produced by a block source.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// A new block. `syncing` is set while the source is catching up to head.
    Block { raw: RawBlock, syncing: bool },
    /// A previously delivered block left the canonical chain.
    Retract { block_hash: String },
}

/// Upstream block feed.
pub trait BlockSource {
    /// Start streaming after `from` (exclusive), or from head when `None`.
    fn start(
        &mut self,
        from: Option<&str>,
    ) -> impl Future<Output = Result<mpsc::Receiver<StreamItem>, StreamError>> + Send;

    /// Stop streaming. Idempotent.
    fn stop(&mut self) -> impl Future<Output = ()> + Send;
}

/// Cooperative stop signal shared between a runner and its callers.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Ask the runner to stop after the block in flight.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub(crate) fn clear(&self) {
        self.tx.send_replace(false);
    }
}

/// Fixed, scripted chain. Serves test and replay scenarios.
///
/// `start(None)` serves the last block only (head); `start(Some(h))`
/// serves every item after block `h`.
#[derive(Debug)]
pub struct StaticChain {
    items: Vec<StreamItem>,
    buffer: usize,
    task: Option<JoinHandle<()>>,
}

impl StaticChain {
    pub fn new(blocks: Vec<RawBlock>) -> Self {
        let last = blocks.len().saturating_sub(1);
        let items = blocks
            .into_iter()
            .enumerate()
            .map(|(i, raw)| StreamItem::Block { raw, syncing: i < last })
            .collect();
        Self {
            items,
            buffer: 64,
            task: None,
        }
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Append a block to the script.
    pub fn push_block(&mut self, raw: RawBlock) {
        self.items.push(StreamItem::Block { raw, syncing: false });
    }

    /// Append a retraction of `block_hash` to the script.
    pub fn push_retract(&mut self, block_hash: impl Into<String>) {
        self.items.push(StreamItem::Retract {
            block_hash: block_hash.into(),
        });
    }

    fn start_index(&self, from: Option<&str>) -> Result<usize, StreamError> {
        match from {
            None => Ok(self
                .items
                .iter()
                .rposition(|item| matches!(item, StreamItem::Block { .. }))
                .unwrap_or(self.items.len())),
            Some(hash) => self
                .items
                .iter()
                .position(|item| matches!(item, StreamItem::Block { raw, .. } if raw.hash == hash))
                .map(|i| i + 1)
                .ok_or_else(|| StreamError::UnknownBlock(hash.to_string())),
        }
    }
}

impl BlockSource for StaticChain {
    async fn start(
        &mut self,
        from: Option<&str>,
    ) -> Result<mpsc::Receiver<StreamItem>, StreamError> {
        self.stop().await;
        let start = self.start_index(from)?;
        let items = self.items[start..].to_vec();
        let (tx, rx) = mpsc::channel(self.buffer);
        tracing::debug!(
            from = from.unwrap_or("HEAD"),
            items = items.len(),
            "block stream started"
        );
        self.task = Some(tokio::spawn(async move {
            for item in items {
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        }));
        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
