//! Reducer kernel: undo/redo manager.
//!
//! Owns a `TrackedTree` and a linear history of (forward, inverse) patch
//! pairs addressed by a cursor:
//!
//! ```text
//!   history:  [e0] [e1] [e2] [e3]
//!                        ^ undo_index = 2
//!   e0, e1 applied; e2, e3 redoable. A new action drops e2 and e3.
//! ```
//!
//! All flags (`skipping`, `grouping`, `replaying`) live on the manager
//! instance, never shared between trees.

use std::ops::{AsyncFnOnce, Deref, DerefMut};

use serde_json::Value;

use crate::error::{ConfigurationError, InterceptError};
use crate::interceptor::{Action, Recording, TrackedTree};
use crate::operation::Patch;

/// One undoable step.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub forward: Patch,
    /// Ready-to-apply inverse of `forward`.
    pub inverse: Patch,
}

impl From<Recording> for HistoryEntry {
    fn from(rec: Recording) -> Self {
        Self {
            forward: rec.forward,
            inverse: rec.inverse,
        }
    }
}

/// Patches accumulated while a group is open.
#[derive(Debug, Default)]
struct GroupBuffer {
    forward: Patch,
    inverse: Patch,
}

impl GroupBuffer {
    /// Forward operations are appended in emission order. Each recording's
    /// inverse goes in front of what is already there, so the stored inverse
    /// undoes the last action first.
    fn absorb(&mut self, rec: Recording) {
        self.forward.operations.extend(rec.forward.operations);
        let mut inverse = rec.inverse.operations;
        inverse.append(&mut self.inverse.operations);
        self.inverse.operations = inverse;
    }

    fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Builder for [`UndoManager`]. A target tree is mandatory.
#[derive(Debug, Default)]
pub struct UndoManagerBuilder {
    target: Option<TrackedTree>,
}

impl UndoManagerBuilder {
    pub fn target(mut self, tree: TrackedTree) -> Self {
        self.target = Some(tree);
        self
    }

    /// Attach the manager to its target.
    pub fn build(self) -> Result<UndoManager, ConfigurationError> {
        let tree = self.target.ok_or(ConfigurationError::MissingTarget)?;
        if tree.is_recording() {
            // attaching mid-action would record half an action
            tracing::warn!("undo manager attached while an action is open");
        }
        Ok(UndoManager {
            tree,
            history: Vec::new(),
            undo_index: 0,
            skipping: false,
            grouping: false,
            replaying: false,
            group: GroupBuffer::default(),
            groups_closed: 0,
        })
    }
}

/// Linear undo/redo history over one tracked tree.
#[derive(Debug)]
pub struct UndoManager {
    tree: TrackedTree,
    history: Vec<HistoryEntry>,
    undo_index: usize,
    skipping: bool,
    grouping: bool,
    replaying: bool,
    group: GroupBuffer,
    groups_closed: u64,
}

impl UndoManager {
    pub fn builder() -> UndoManagerBuilder {
        UndoManagerBuilder::default()
    }

    /// Detach from the tree and hand it back. History is discarded.
    pub fn detach(self) -> TrackedTree {
        self.tree
    }

    pub fn state(&self) -> &Value {
        self.tree.state()
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn undo_index(&self) -> usize {
        self.undo_index
    }

    pub fn can_undo(&self) -> bool {
        self.undo_index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.undo_index < self.history.len()
    }

    pub fn is_grouping(&self) -> bool {
        self.grouping
    }

    /// Run `f` as one action named `name`.
    ///
    /// On `Ok` the action commits and its patches go to history (or to the
    /// open group). On `Err` the tree is rolled back and the error returned.
    pub fn perform<T, E, F>(&mut self, name: &str, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Action<'_>) -> Result<T, E>,
        E: From<InterceptError>,
    {
        let mut action = self.tree.action(name);
        match f(&mut action) {
            Ok(value) => {
                if let Some(rec) = action.commit() {
                    self.record(rec);
                }
                Ok(value)
            }
            Err(err) => {
                action.rollback()?;
                Err(err)
            }
        }
    }

    /// Async form of [`perform`](Self::perform). `f` may suspend the action
    /// around its awaits and resume it before mutating again; the recording
    /// stays attached to this action across the suspension.
    pub async fn perform_async<T, E, F>(&mut self, name: &str, f: F) -> Result<T, E>
    where
        F: AsyncFnOnce(&mut Action<'_>) -> Result<T, E>,
        E: From<InterceptError>,
    {
        let mut action = self.tree.action(name);
        let outcome = f(&mut action).await;
        match outcome {
            Ok(value) => {
                if let Some(rec) = action.commit() {
                    self.record(rec);
                }
                Ok(value)
            }
            Err(err) => {
                action.rollback()?;
                Err(err)
            }
        }
    }

    fn record(&mut self, rec: Recording) {
        if self.skipping {
            tracing::trace!(patch_id = %rec.forward.id, "not recorded (without_undo)");
            return;
        }
        if rec.forward.is_empty() {
            return;
        }
        if self.grouping {
            self.group.absorb(rec);
            return;
        }
        self.add_undo_state(rec.into());
    }

    /// Append `entry`, discarding any redo branch first.
    fn add_undo_state(&mut self, entry: HistoryEntry) {
        if self.replaying {
            return;
        }
        self.history.truncate(self.undo_index);
        self.history.push(entry);
        self.undo_index = self.history.len();
    }

    /// Revert the most recent applied entry. `Ok(false)` if there is none.
    pub fn undo(&mut self) -> Result<bool, InterceptError> {
        if !self.can_undo() {
            return Ok(false);
        }
        let index = self.undo_index - 1;
        self.replaying = true;
        let result = self.tree.replay(&self.history[index].inverse);
        self.replaying = false;
        result?;
        self.undo_index = index;
        tracing::debug!(patch_id = %self.history[index].forward.id, undo_index = index, "undo");
        Ok(true)
    }

    /// Re-apply the next redoable entry. `Ok(false)` if there is none.
    pub fn redo(&mut self) -> Result<bool, InterceptError> {
        if !self.can_redo() {
            return Ok(false);
        }
        let index = self.undo_index;
        self.replaying = true;
        let result = self.tree.replay(&self.history[index].forward);
        self.replaying = false;
        result?;
        self.undo_index = index + 1;
        tracing::debug!(patch_id = %self.history[index].forward.id, undo_index = index + 1, "redo");
        Ok(true)
    }

    /// Run `f` with recording switched off. The previous setting is restored
    /// however `f` exits, unwinding included.
    pub fn without_undo<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let mut scope = self.skip_scope();
        let result = f(&mut *scope);
        drop(scope);
        result
    }

    /// Async form of [`without_undo`](Self::without_undo). The setting is
    /// also restored if the returned future is dropped before completing.
    pub async fn without_undo_async<R>(&mut self, f: impl AsyncFnOnce(&mut Self) -> R) -> R {
        let mut scope = self.skip_scope();
        let result = f(&mut *scope).await;
        drop(scope);
        result
    }

    /// Run `f` so every action it performs becomes a single history entry.
    /// The group is closed however `f` exits.
    pub fn with_group<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        self.start_group();
        let mut scope = Scope {
            manager: self,
            release: Release::Group,
        };
        let result = f(&mut *scope);
        drop(scope);
        result
    }

    fn skip_scope(&mut self) -> Scope<'_> {
        let previous = std::mem::replace(&mut self.skipping, true);
        Scope {
            manager: self,
            release: Release::Skipping(previous),
        }
    }

    pub fn start_group(&mut self) {
        self.grouping = true;
    }

    /// Close the open group and push it as one entry. Empty groups add
    /// nothing.
    pub fn stop_group(&mut self) {
        if !self.grouping {
            return;
        }
        self.grouping = false;
        let group = std::mem::take(&mut self.group);
        if group.is_empty() {
            return;
        }
        self.groups_closed += 1;
        let id = format!("group#{}", self.groups_closed);
        self.add_undo_state(HistoryEntry {
            forward: Patch::new(id.clone(), group.forward.operations),
            inverse: Patch::new(id, group.inverse.operations),
        });
    }
}

enum Release {
    Skipping(bool),
    Group,
}

/// Borrow of the manager that releases a flag when dropped.
struct Scope<'a> {
    manager: &'a mut UndoManager,
    release: Release,
}

impl Deref for Scope<'_> {
    type Target = UndoManager;

    fn deref(&self) -> &UndoManager {
        self.manager
    }
}

impl DerefMut for Scope<'_> {
    fn deref_mut(&mut self) -> &mut UndoManager {
        self.manager
    }
}

impl Drop for Scope<'_> {
    fn drop(&mut self) {
        match self.release {
            Release::Skipping(previous) => self.manager.skipping = previous,
            Release::Group => self.manager.stop_group(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;
    use serde_json::json;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn manager(root: Value) -> UndoManager {
        UndoManager::builder().target(TrackedTree::new(root)).build().unwrap()
    }

    fn set(m: &mut UndoManager, name: &str, path: &str, value: Value) {
        m.perform(name, |a| a.set(&p(path), value)).unwrap();
    }

    #[test]
    fn missing_target_is_a_configuration_error() {
        let err = UndoManager::builder().build().unwrap_err();
        assert_eq!(err, ConfigurationError::MissingTarget);
    }

    #[test]
    fn undo_redo_scenario() {
        let mut m = manager(json!({}));
        set(&mut m, "add_x", "/x", json!(1));
        assert_eq!(m.history().len(), 1);
        assert_eq!(m.undo_index(), 1);
        assert_eq!(m.history()[0].inverse.operations[0].kind(), crate::operation::OpKind::Remove);

        assert!(m.undo().unwrap());
        assert_eq!(m.state(), &json!({}));
        assert_eq!(m.undo_index(), 0);

        assert!(m.redo().unwrap());
        assert_eq!(m.state(), &json!({"x": 1}));
        assert_eq!(m.undo_index(), 1);
    }

    #[test]
    fn undo_and_redo_at_the_ends_are_no_ops() {
        let mut m = manager(json!({}));
        assert!(!m.undo().unwrap());
        assert!(!m.redo().unwrap());
        set(&mut m, "a", "/a", json!(1));
        assert!(!m.redo().unwrap());
        assert_eq!(m.undo_index(), 1);
    }

    #[test]
    fn new_action_truncates_redo_branch() {
        let mut m = manager(json!({}));
        for (i, key) in ["/a", "/b", "/c", "/d"].iter().enumerate() {
            set(&mut m, "step", key, json!(i));
        }
        m.undo().unwrap();
        m.undo().unwrap();
        m.undo().unwrap();
        assert_eq!(m.undo_index(), 1);

        set(&mut m, "branch", "/z", json!(true));
        assert_eq!(m.history().len(), 2);
        assert_eq!(m.undo_index(), 2);
        assert_eq!(m.history()[1].forward.id, "branch#1");
        assert_eq!(m.state(), &json!({"a": 0, "z": true}));
    }

    #[test]
    fn group_is_one_entry() {
        let mut m = manager(json!({"n": 0}));
        set(&mut m, "before", "/pre", json!(1));
        let before = m.state().clone();

        m.with_group(|m| {
            set(m, "a", "/n", json!(1));
            set(m, "b", "/n", json!(2));
            m.perform("c", |a| a.insert(&p("/list"), json!([]))).unwrap();
        });

        assert_eq!(m.history().len(), 2);
        assert_eq!(m.history()[1].forward.len(), 3);
        assert_eq!(m.state(), &json!({"n": 2, "pre": 1, "list": []}));

        m.undo().unwrap();
        assert_eq!(m.state(), &before);
        m.redo().unwrap();
        assert_eq!(m.state(), &json!({"n": 2, "pre": 1, "list": []}));
    }

    #[test]
    fn start_stop_group_and_empty_group() {
        let mut m = manager(json!({}));
        m.start_group();
        assert!(m.is_grouping());
        set(&mut m, "a", "/a", json!(1));
        set(&mut m, "b", "/b", json!(2));
        m.stop_group();
        assert_eq!(m.history().len(), 1);
        assert_eq!(m.history()[0].forward.id, "group#1");

        m.with_group(|_| ());
        assert_eq!(m.history().len(), 1);
    }

    #[test]
    fn without_undo_is_not_recorded() {
        let mut m = manager(json!({}));
        set(&mut m, "tracked", "/t", json!(1));
        let out = m.without_undo(|m| {
            set(m, "hidden", "/h", json!(1));
            m.perform("nested", |a| {
                a.set(&p("/h2"), json!(2))?;
                let mut inner = a.nested("inner");
                inner.set(&p("/h3"), json!(3))?;
                inner.commit();
                Ok::<_, InterceptError>(7)
            })
            .unwrap()
        });
        assert_eq!(out, 7);
        assert_eq!(m.history().len(), 1);
        assert_eq!(m.undo_index(), 1);
        assert_eq!(m.state(), &json!({"t": 1, "h": 1, "h2": 2, "h3": 3}));

        set(&mut m, "after", "/after", json!(0));
        assert_eq!(m.history().len(), 2);
    }

    #[test]
    fn failed_action_rolls_back_and_records_nothing() {
        let mut m = manager(json!({"x": 1}));
        let result: Result<(), InterceptError> = m.perform("fails", |a| {
            a.set(&p("/x"), json!(99))?;
            a.remove(&p("/absent"))
        });
        assert!(result.is_err());
        assert_eq!(m.state(), &json!({"x": 1}));
        assert!(m.history().is_empty());
    }

    #[tokio::test]
    async fn async_action_is_recorded_across_a_suspension() {
        let mut m = manager(json!({"n": 0}));
        m.perform_async("fetch", async |a: &mut Action<'_>| {
            a.replace(&p("/n"), json!(1))?;
            a.suspend();
            tokio::task::yield_now().await;
            let refused = a.set(&p("/during"), json!(0));
            assert!(matches!(refused, Err(InterceptError::Suspended(_))));
            a.resume();
            a.set(&p("/fetched"), json!(true))?;
            Ok::<_, InterceptError>(())
        })
        .await
        .unwrap();

        assert_eq!(m.history().len(), 1);
        assert_eq!(m.history()[0].forward.id, "fetch#1");
        assert_eq!(m.history()[0].forward.len(), 2);
        assert_eq!(m.state(), &json!({"n": 1, "fetched": true}));
        m.undo().unwrap();
        assert_eq!(m.state(), &json!({"n": 0}));
        m.redo().unwrap();

        m.without_undo_async(async |m: &mut UndoManager| {
            m.perform_async("quiet", async |a: &mut Action<'_>| a.set(&p("/q"), json!(1)))
                .await
        })
        .await
        .unwrap();
        assert_eq!(m.history().len(), 1);
        assert_eq!(m.state(), &json!({"n": 1, "fetched": true, "q": 1}));

        set(&mut m, "after", "/after", json!(0));
        assert_eq!(m.history().len(), 2);
    }

    #[tokio::test]
    async fn failed_async_action_rolls_back() {
        let mut m = manager(json!({"x": 1}));
        let result = m
            .perform_async("fails", async |a: &mut Action<'_>| {
                a.set(&p("/x"), json!(2))?;
                tokio::task::yield_now().await;
                a.remove(&p("/absent"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(m.state(), &json!({"x": 1}));
        assert!(m.history().is_empty());
    }

    #[test]
    fn flags_are_released_when_the_closure_panics() {
        let mut m = manager(json!({}));
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            m.without_undo(|m| {
                set(m, "hidden", "/h", json!(1));
                panic!("abandoned");
            })
        }));
        assert!(outcome.is_err());
        set(&mut m, "seen", "/s", json!(1));
        assert_eq!(m.history().len(), 1);

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            m.with_group(|m| {
                set(m, "a", "/a", json!(1));
                panic!("abandoned");
            })
        }));
        assert!(outcome.is_err());
        assert!(!m.is_grouping());
        assert_eq!(m.history().len(), 2);
        set(&mut m, "b", "/b", json!(2));
        assert_eq!(m.history().len(), 3);
    }

    #[test]
    fn detach_returns_tree() {
        let mut m = manager(json!({}));
        set(&mut m, "a", "/a", json!(1));
        let tree = m.detach();
        assert_eq!(tree.state(), &json!({"a": 1}));
    }
}
