//! Shared helpers for the integration suites.
#![allow(dead_code)]

use livetree_core::{Document, LiveValue, Op};
use std::sync::{Arc, Mutex};

/// Broadcast capture: each committed op list is recorded as one entry.
pub type OpLog = Arc<Mutex<Vec<Vec<Op>>>>;

pub fn op_log() -> OpLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn recording(log: &OpLog) -> impl FnMut(&[Op]) + Send + Sync + 'static {
    let log = Arc::clone(log);
    move |ops: &[Op]| log.lock().unwrap().push(ops.to_vec())
}

pub fn doc_with_log(root: LiveValue, actor: u64) -> (Document, OpLog) {
    let log = op_log();
    let doc =
        Document::from_root(root, actor, recording(&log)).expect("root object must be accepted");
    (doc, log)
}

/// Last committed op list.
pub fn last_commit(log: &OpLog) -> Vec<Op> {
    log.lock()
        .unwrap()
        .last()
        .cloned()
        .expect("a commit was broadcast")
}

pub fn commit_count(log: &OpLog) -> usize {
    log.lock().unwrap().len()
}

/// Deterministic generator for seeded cases.
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.state
    }

    pub fn range(&mut self, n: u64) -> u64 {
        if n == 0 {
            0
        } else {
            self.next_u64() % n
        }
    }
}
