//! Resume orchestrator: drives one reducer over a block source.
//!
//! Per block, in order:
//!   1. normalize the raw block
//!   2. open a transaction named by the block hash and call the reducer
//!   3. commit, then persist each operation tagged with the patch id
//!
//! A reducer error rolls the block back and aborts the run. A storage
//! error also rolls the block back in memory (and voids any operations
//! already written), so the tree never runs ahead of what is durable.
//!
//! Resumption: `TimeVarying` and `Atomic` reducers rebuild their tree from
//! the latest checkpoint before streaming; `Idempotent` reducers always
//! start from head without consulting the store.

use reducer_kernel::{
    canonical_hash, Block, RawBlock, Reducer, ReducerKind, Recording, TrackedTree,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::Instrument;

use crate::blockstream::{BlockSource, StopHandle, StreamItem};
use crate::error::{RuntimeError, StorageError};
use crate::replay;
use crate::store::CheckpointStore;

/// Outcome of one `run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Block the stream started after; `None` means head.
    pub start_point: Option<String>,
    pub processed: usize,
    pub retracted: usize,
    pub last_block: Option<String>,
    pub state_hash: String,
}

pub struct ReducerRunner<R, S, B> {
    reducer: R,
    store: S,
    source: B,
    tree: TrackedTree,
    should_resume: bool,
    stop: StopHandle,
    stop_rx: watch::Receiver<bool>,
}

impl<R, S, B> ReducerRunner<R, S, B>
where
    R: Reducer,
    S: CheckpointStore,
    B: BlockSource,
{
    pub fn new(reducer: R, store: S, source: B) -> Self {
        let tree = TrackedTree::new(reducer.initial_state());
        let (stop, stop_rx) = StopHandle::new();
        Self {
            reducer,
            store,
            source,
            tree,
            should_resume: true,
            stop,
            stop_rx,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> &Value {
        self.tree.state()
    }

    pub fn reducer(&self) -> &R {
        &self.reducer
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn source_mut(&mut self) -> &mut B {
        &mut self.source
    }

    /// Whether the next `run` resumes from the checkpoint.
    pub fn should_resume(&self) -> bool {
        self.should_resume
    }

    pub fn into_parts(self) -> (R, S, B) {
        (self.reducer, self.store, self.source)
    }

    /// `true`: tear the reducer's storage down and set it up again; the
    /// next run starts from `from_block` or head. `false`: set up only; the
    /// next run resumes. Either way the choice applies to one run.
    pub fn reset(&mut self, should_reset: bool) -> Result<(), StorageError> {
        let key = self.reducer.config().key.clone();
        self.should_resume = !should_reset;
        if should_reset {
            self.store.setdown(&key)?;
        }
        self.store.setup(&key)?;
        tracing::debug!(reducer = %key, should_reset, "storage reset");
        Ok(())
    }

    /// Ingest blocks until the source ends or `stop` is requested.
    ///
    /// `from_block` is only honoured right after `reset(true)`.
    pub async fn run(&mut self, from_block: Option<&str>) -> Result<RunSummary, RuntimeError> {
        let span = tracing::info_span!("runner", reducer = %self.reducer.config().key);
        self.run_inner(from_block).instrument(span).await
    }

    async fn run_inner(&mut self, from_block: Option<&str>) -> Result<RunSummary, RuntimeError> {
        let resume = std::mem::replace(&mut self.should_resume, true);
        self.tree.reset(self.reducer.initial_state())?;

        let start_point = self.start_point(resume, from_block)?;
        tracing::info!(start = start_point.as_deref().unwrap_or("HEAD"), resume, "run started");

        let mut rx = self.source.start(start_point.as_deref()).await?;
        let mut summary = RunSummary {
            start_point,
            processed: 0,
            retracted: 0,
            last_block: None,
            state_hash: String::new(),
        };
        let drained = self.drain(&mut rx, &mut summary).await;

        self.source.stop().await;
        self.stop.clear();
        self.stop_rx.borrow_and_update();
        drained?;

        summary.state_hash = canonical_hash(self.tree.state());
        tracing::info!(
            processed = summary.processed,
            retracted = summary.retracted,
            state_hash = %summary.state_hash,
            "run finished"
        );
        Ok(summary)
    }

    /// Decide where the stream starts, rehydrating the tree if resuming.
    fn start_point(
        &mut self,
        resume: bool,
        from_block: Option<&str>,
    ) -> Result<Option<String>, RuntimeError> {
        let key = self.reducer.config().key.clone();
        match self.reducer.config().kind {
            ReducerKind::Idempotent => {
                tracing::debug!("idempotent reducer, starting from head");
                Ok(None)
            }
            ReducerKind::TimeVarying | ReducerKind::Atomic => {
                if !resume {
                    tracing::debug!(from = from_block.unwrap_or("HEAD"), "explicitly starting");
                    return Ok(from_block.map(str::to_string));
                }
                match self.store.latest_checkpoint(&key)? {
                    None => {
                        tracing::debug!("no checkpoint, starting from head");
                        Ok(None)
                    }
                    Some(checkpoint) => {
                        tracing::debug!(
                            block_hash = %checkpoint.block_hash,
                            "reloading state from checkpoint"
                        );
                        self.store
                            .resume_from_event_id(&key, &checkpoint.block_hash, &mut self.tree)?;
                        Ok(Some(checkpoint.block_hash))
                    }
                }
            }
        }
    }

    async fn drain(
        &mut self,
        rx: &mut mpsc::Receiver<StreamItem>,
        summary: &mut RunSummary,
    ) -> Result<(), RuntimeError> {
        loop {
            if *self.stop_rx.borrow_and_update() {
                tracing::debug!("stop requested");
                return Ok(());
            }
            let item = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => continue,
                item = rx.recv() => item,
            };
            match item {
                None => return Ok(()),
                Some(StreamItem::Block { raw, syncing }) => {
                    let hash = self.process_block(raw, syncing).await?;
                    summary.processed += 1;
                    summary.last_block = Some(hash);
                }
                Some(StreamItem::Retract { block_hash }) => {
                    if self.retract(&block_hash)? {
                        summary.retracted += 1;
                    }
                }
            }
        }
    }

    async fn process_block(
        &mut self,
        raw: RawBlock,
        syncing: bool,
    ) -> Result<String, RuntimeError> {
        let block = Block::normalize(raw)?;
        let key = self.reducer.config().key.clone();
        tracing::debug!(number = block.number, hash = %block.hash, syncing, "reducing block");

        let mut action = self.tree.transaction(&block.hash);
        let reduced = self.reducer.reduce(&mut action, &block).await;
        if let Err(source) = reduced {
            action.rollback()?;
            return Err(RuntimeError::Reducer {
                block_hash: block.hash,
                source,
            });
        }
        let Some(Recording { forward, inverse }) = action.commit() else {
            return Ok(block.hash);
        };

        for (index, op) in forward.operations.iter().enumerate() {
            if let Err(err) = self.store.write_operation(&key, &block.hash, &forward.id, op) {
                tracing::warn!(
                    block_hash = %block.hash,
                    index,
                    error = %err,
                    "write failed, rolling block back"
                );
                self.tree.replay(&inverse)?;
                if index > 0 {
                    if let Err(discard) = self.store.discard_block(&key, &block.hash) {
                        tracing::warn!(
                            block_hash = %block.hash,
                            error = %discard,
                            "partial block left in store"
                        );
                    }
                }
                return Err(err.into());
            }
            tracing::trace!(
                scope = op.path().scope(),
                op = ?op.kind(),
                path = %op.path(),
                "persisted"
            );
        }
        Ok(block.hash)
    }

    /// Revert a retracted block. `Ok(false)` if the store never saw it.
    fn retract(&mut self, block_hash: &str) -> Result<bool, RuntimeError> {
        let key = self.reducer.config().key.clone();
        let records = self.store.block_operations(&key, block_hash)?;
        if records.is_empty() {
            tracing::debug!(block_hash, "retraction of unknown block ignored");
            return Ok(false);
        }
        for patch in replay::patches(&records).iter().rev() {
            self.tree.replay(&patch.invert())?;
        }
        self.store.discard_block(&key, block_hash)?;
        tracing::info!(block_hash, operations = records.len(), "block retracted");
        Ok(true)
    }
}
