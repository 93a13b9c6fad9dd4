//! Reducer kernel: mutation interceptor.
//!
//! `TrackedTree` owns a state tree and is the only way to mutate it. Every
//! mutation happens inside a bracketed action:
//!
//! ```text
//!   Idle --begin--> Recording <--suspend/resume--> Suspended
//!                      |
//!          commit -> Committed (forward + inverse patch returned)
//!        rollback -> RolledBack (inverse applied, nothing returned)
//! ```
//!
//! Recording is not reentrant. An action begun while another one is open is
//! a *shadow*: its mutations fold into the active recording, its commit
//! never finalizes a patch, and its rollback reverts and drops everything
//! recorded since it began. While the recording is `Suspended` every
//! mutation is refused, so nothing reaches the tree without reaching a patch.
//!
//! Outside an action the tree is read-only: mutation needs an open
//! `ActionId` token, and tokens are consumed by commit/rollback. Finishing
//! the owning action also closes its shadows.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::error::InterceptError;
use crate::operation::{Operation, Patch};
use crate::path::Path;
use crate::tree::{self, Mutation};

/// Forward and inverse patch produced by one committed action.
///
/// `inverse` is ready to apply: inverse operations in reverse order.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub forward: Patch,
    pub inverse: Patch,
}

/// Token for one action invocation.
#[derive(Debug, PartialEq, Eq)]
pub struct ActionId {
    serial: u64,
    patch_id: String,
}

impl ActionId {
    /// Id the patch carries if this action owns the recording.
    pub fn patch_id(&self) -> &str {
        &self.patch_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Recording,
    Suspended,
}

#[derive(Debug)]
struct ActiveRecording {
    serial: u64,
    patch_id: String,
    phase: Phase,
    operations: Vec<Operation>,
}

/// A state tree whose every mutation is captured as an invertible operation.
#[derive(Debug)]
pub struct TrackedTree {
    root: Value,
    active: Option<ActiveRecording>,
    /// Open action serials, each with the length of the active recording
    /// when it began.
    open: BTreeMap<u64, usize>,
    next_serial: u64,
    occurrences: HashMap<String, u64>,
}

impl TrackedTree {
    pub fn new(root: Value) -> Self {
        Self {
            root,
            active: None,
            open: BTreeMap::new(),
            next_serial: 0,
            occurrences: HashMap::new(),
        }
    }

    /// Read-only view of the whole tree.
    pub fn state(&self) -> &Value {
        &self.root
    }

    pub fn get(&self, path: &Path) -> Option<&Value> {
        tree::get(&self.root, path)
    }

    /// `true` while an action owns the recording (recording or suspended).
    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn into_state(self) -> Value {
        self.root
    }

    /// Replace the whole tree. Refused while an action is open.
    pub fn reset(&mut self, root: Value) -> Result<(), InterceptError> {
        self.ensure_idle()?;
        self.root = root;
        Ok(())
    }

    /// Begin an action named `name`. The patch id is `name#n`, where `n`
    /// counts invocations of `name` on this tree.
    pub fn begin(&mut self, name: &str) -> ActionId {
        let occurrence = self.occurrences.entry(name.to_string()).or_insert(0);
        *occurrence += 1;
        let patch_id = format!("{}#{}", name, occurrence);
        self.open_action(patch_id)
    }

    /// Begin an action whose patch carries `tx_id` verbatim, e.g. the hash of
    /// the upstream block being reduced.
    pub fn begin_transaction(&mut self, tx_id: &str) -> ActionId {
        self.open_action(tx_id.to_string())
    }

    fn open_action(&mut self, patch_id: String) -> ActionId {
        self.next_serial += 1;
        let serial = self.next_serial;
        let mark = self.active.as_ref().map_or(0, |a| a.operations.len());
        self.open.insert(serial, mark);

        if self.active.is_none() {
            tracing::trace!(patch_id = %patch_id, "recording started");
            self.active = Some(ActiveRecording {
                serial,
                patch_id: patch_id.clone(),
                phase: Phase::Recording,
                operations: Vec::new(),
            });
        } else {
            tracing::trace!(patch_id = %patch_id, "shadow action, folded into active recording");
        }

        ActionId { serial, patch_id }
    }

    fn owns_recording(&self, id: &ActionId) -> bool {
        self.active.as_ref().map(|a| a.serial) == Some(id.serial)
    }

    fn ensure_idle(&self) -> Result<(), InterceptError> {
        match &self.active {
            Some(active) => Err(InterceptError::ActionInFlight(active.patch_id.clone())),
            None => Ok(()),
        }
    }

    /// Perform `mutation` on behalf of action `id`.
    pub fn mutate(&mut self, id: &ActionId, mutation: Mutation) -> Result<(), InterceptError> {
        if !self.open.contains_key(&id.serial) {
            return Err(InterceptError::StaleAction(id.patch_id.clone()));
        }
        let Some(active) = self.active.as_mut() else {
            return Err(InterceptError::StaleAction(id.patch_id.clone()));
        };
        if active.phase == Phase::Suspended {
            return Err(InterceptError::Suspended(active.patch_id.clone()));
        }
        let op = tree::plan(&self.root, mutation)?;
        tree::apply(&mut self.root, &op)?;
        tracing::trace!(action = %id.patch_id, op = ?op.kind(), path = %op.path(), "mutation");
        active.operations.push(op);
        Ok(())
    }

    /// Pause recording for `id` (e.g. while the action awaits I/O).
    /// Until `resume`, mutations by any action are refused.
    pub fn suspend(&mut self, id: &ActionId) {
        if let Some(active) = self.active.as_mut().filter(|a| a.serial == id.serial) {
            active.phase = Phase::Suspended;
        }
    }

    pub fn resume(&mut self, id: &ActionId) {
        if let Some(active) = self.active.as_mut().filter(|a| a.serial == id.serial) {
            active.phase = Phase::Recording;
        }
    }

    /// Finish action `id` successfully. Returns the recording if `id` owned
    /// it; shadow and stale ids return `None`.
    pub fn commit(&mut self, id: ActionId) -> Option<Recording> {
        if !self.owns_recording(&id) {
            self.open.remove(&id.serial);
            return None;
        }
        self.open.clear();
        let active = self.active.take()?;
        let forward = Patch::new(active.patch_id, active.operations);
        let inverse = forward.invert();
        tracing::debug!(patch_id = %forward.id, operations = forward.len(), "action committed");
        Some(Recording { forward, inverse })
    }

    /// Finish action `id` with failure. The tree is restored to its state at
    /// `begin`. For a shadow, the operations recorded since it began are
    /// reverted and dropped from the active recording.
    pub fn rollback(&mut self, id: ActionId) -> Result<(), InterceptError> {
        let Some(mark) = self.open.remove(&id.serial) else {
            return Ok(());
        };
        if !self.owns_recording(&id) {
            return self.rollback_shadow(&id, mark);
        }
        self.open.clear();
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        let forward = Patch::new(active.patch_id, active.operations);
        tracing::debug!(patch_id = %forward.id, operations = forward.len(), "action rolled back");
        self.apply_patch(&forward.invert())
    }

    fn rollback_shadow(&mut self, id: &ActionId, mark: usize) -> Result<(), InterceptError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        let tail = active.operations.split_off(mark.min(active.operations.len()));
        if tail.is_empty() {
            return Ok(());
        }
        let undone = Patch::new(id.patch_id.clone(), tail);
        tracing::debug!(
            patch_id = %undone.id,
            operations = undone.len(),
            "shadow action rolled back"
        );
        self.apply_patch(&undone.invert())
    }

    /// Apply `patch` without recording it. Used for undo, redo and
    /// rehydration from a persisted log.
    ///
    /// Atomic: if an operation fails, the operations already applied are
    /// reverted and the tree is left as it was.
    pub fn replay(&mut self, patch: &Patch) -> Result<(), InterceptError> {
        self.ensure_idle()?;
        self.apply_patch(patch)
    }

    fn apply_patch(&mut self, patch: &Patch) -> Result<(), InterceptError> {
        for (index, op) in patch.operations.iter().enumerate() {
            if let Err(source) = tree::apply(&mut self.root, op) {
                for done in patch.operations[..index].iter().rev() {
                    // inverse of an op that just succeeded always applies
                    let _ = tree::apply(&mut self.root, &done.invert());
                }
                return Err(InterceptError::Replay {
                    patch_id: patch.id.clone(),
                    index,
                    source,
                });
            }
        }
        Ok(())
    }

    /// Open an action and wrap it in a guard.
    pub fn action(&mut self, name: &str) -> Action<'_> {
        let id = self.begin(name);
        Action { tree: self, id: Some(id) }
    }

    /// Open a transaction action (patch id = `tx_id`) and wrap it in a guard.
    pub fn transaction(&mut self, tx_id: &str) -> Action<'_> {
        let id = self.begin_transaction(tx_id);
        Action { tree: self, id: Some(id) }
    }
}

/// Guard over one open action. Mutation methods record through the owning
/// `TrackedTree`; dropping the guard without `commit` rolls the action back.
#[derive(Debug)]
pub struct Action<'a> {
    tree: &'a mut TrackedTree,
    id: Option<ActionId>,
}

impl Action<'_> {
    pub fn patch_id(&self) -> &str {
        self.id.as_ref().map(ActionId::patch_id).unwrap_or_default()
    }

    pub fn state(&self) -> &Value {
        self.tree.state()
    }

    pub fn get(&self, path: &Path) -> Option<&Value> {
        self.tree.get(path)
    }

    pub fn mutate(&mut self, mutation: Mutation) -> Result<(), InterceptError> {
        let Action { tree, id } = self;
        // only None after commit/rollback, which consume the guard
        let id = id
            .as_ref()
            .ok_or_else(|| InterceptError::StaleAction(String::from("<finished>")))?;
        tree.mutate(id, mutation)
    }

    pub fn set(&mut self, path: &Path, value: Value) -> Result<(), InterceptError> {
        self.mutate(Mutation::Set { path: path.clone(), value })
    }

    pub fn insert(&mut self, path: &Path, value: Value) -> Result<(), InterceptError> {
        self.mutate(Mutation::Insert { path: path.clone(), value })
    }

    pub fn push(&mut self, path: &Path, value: Value) -> Result<(), InterceptError> {
        self.mutate(Mutation::Push { path: path.clone(), value })
    }

    pub fn remove(&mut self, path: &Path) -> Result<(), InterceptError> {
        self.mutate(Mutation::Remove { path: path.clone() })
    }

    pub fn replace(&mut self, path: &Path, value: Value) -> Result<(), InterceptError> {
        self.mutate(Mutation::Replace { path: path.clone(), value })
    }

    /// Open a nested action. It is a shadow of this one: its mutations land
    /// in this action's patch, its commit finalizes nothing, and dropping it
    /// uncommitted reverts only what it did.
    pub fn nested(&mut self, name: &str) -> Action<'_> {
        self.tree.action(name)
    }

    pub fn suspend(&mut self) {
        if let Some(id) = self.id.as_ref() {
            self.tree.suspend(id);
        }
    }

    pub fn resume(&mut self) {
        if let Some(id) = self.id.as_ref() {
            self.tree.resume(id);
        }
    }

    pub fn commit(mut self) -> Option<Recording> {
        let id = self.id.take()?;
        self.tree.commit(id)
    }

    pub fn rollback(mut self) -> Result<(), InterceptError> {
        match self.id.take() {
            Some(id) => self.tree.rollback(id),
            None => Ok(()),
        }
    }
}

impl Drop for Action<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            let patch_id = id.patch_id.clone();
            if let Err(err) = self.tree.rollback(id) {
                tracing::warn!(
                    patch_id = %patch_id,
                    error = %err,
                    "rollback of dropped action failed"
                );
            } else {
                tracing::debug!(patch_id = %patch_id, "action dropped without commit, rolled back");
            }
        }
    }
}
