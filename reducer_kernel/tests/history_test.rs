/// End-to-end history tests: actions against a tracked tree, driven
/// through the undo manager, checked by canonical hash.
///
/// The key property is that any walk through history (undo k steps, redo
/// some of them, branch) lands on exactly the state an equivalent linear
/// sequence of actions would produce.

use reducer_kernel::{
    canonical_hash, InterceptError, Path, TrackedTree, UndoManager,
};
use serde_json::{json, Value};

fn p(s: &str) -> Path {
    Path::parse(s).unwrap()
}

fn manager() -> UndoManager {
    UndoManager::builder()
        .target(TrackedTree::new(json!({"accounts": {}, "log": []})))
        .build()
        .unwrap()
}

fn credit(m: &mut UndoManager, who: &str, amount: i64) {
    m.perform("credit", |a| {
        let path = p(&format!("/accounts/{}", who));
        let current = a.get(&path).and_then(Value::as_i64).unwrap_or(0);
        a.set(&path, json!(current + amount))?;
        a.push(&p("/log"), json!({"who": who, "amount": amount}))
    })
    .unwrap();
}

#[test]
fn undo_all_returns_to_initial_hash() {
    let mut m = manager();
    let initial = canonical_hash(m.state());

    credit(&mut m, "alice", 10);
    credit(&mut m, "bob", 5);
    credit(&mut m, "alice", -3);
    assert_eq!(m.state()["accounts"], json!({"alice": 7, "bob": 5}));

    while m.undo().unwrap() {}
    assert_eq!(m.undo_index(), 0);
    assert_eq!(canonical_hash(m.state()), initial);

    while m.redo().unwrap() {}
    assert_eq!(m.undo_index(), 3);
    assert_eq!(m.state()["accounts"], json!({"alice": 7, "bob": 5}));
}

#[test]
fn branching_matches_linear_replay() {
    let mut branched = manager();
    credit(&mut branched, "alice", 1);
    credit(&mut branched, "alice", 2);
    credit(&mut branched, "alice", 4);
    branched.undo().unwrap();
    branched.undo().unwrap();
    credit(&mut branched, "carol", 9);

    let mut linear = manager();
    credit(&mut linear, "alice", 1);
    credit(&mut linear, "carol", 9);

    assert_eq!(branched.history().len(), 2);
    assert_eq!(canonical_hash(branched.state()), canonical_hash(linear.state()));
}

#[test]
fn grouped_and_ungrouped_paths_reach_same_state() {
    let mut grouped = manager();
    grouped.with_group(|m| {
        credit(m, "alice", 3);
        credit(m, "bob", 4);
    });
    let mut plain = manager();
    credit(&mut plain, "alice", 3);
    credit(&mut plain, "bob", 4);

    assert_eq!(grouped.history().len(), 1);
    assert_eq!(plain.history().len(), 2);
    assert_eq!(canonical_hash(grouped.state()), canonical_hash(plain.state()));

    grouped.undo().unwrap();
    plain.undo().unwrap();
    plain.undo().unwrap();
    assert_eq!(canonical_hash(grouped.state()), canonical_hash(plain.state()));
}

#[test]
fn failed_action_leaves_history_and_state_alone() {
    let mut m = manager();
    credit(&mut m, "alice", 1);
    let before = canonical_hash(m.state());

    let err = m
        .perform("overdraw", |a| {
            a.set(&p("/accounts/alice"), json!(-100))?;
            a.replace(&p("/accounts/nobody"), json!(0))
        })
        .unwrap_err();
    assert!(matches!(err, InterceptError::Tree(_)));
    assert_eq!(canonical_hash(m.state()), before);
    assert_eq!(m.history().len(), 1);
}

#[test]
fn detached_tree_keeps_replaying() {
    let mut m = manager();
    credit(&mut m, "alice", 1);
    let entry = m.history()[0].clone();
    let mut tree = m.detach();

    tree.replay(&entry.inverse).unwrap();
    assert_eq!(tree.state(), &json!({"accounts": {}, "log": []}));
    tree.replay(&entry.forward).unwrap();
    assert_eq!(tree.state()["accounts"]["alice"], 1);
}
