//! Staged multi-tree writes.
//!
//! A handler's critical section stages every row it intends to write —
//! uniqueness checked and bincode-encoded up front — and commits in one
//! step. Nothing touches a tree until the whole set is staged, so a
//! failure while staging (a violated unique key, a poisoned event log)
//! leaves the store untouched.

/// Tree a staged operation targets. Mirrors the named trees of `StoreDb`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TreeId {
    Entities,
    Accounts,
    AccountCodes,
    Transactions,
    TxExternalIds,
    Postings,
    Snapshots,
    Obligations,
    ObligationKeys,
    Proposals,
    ProposalKeys,
    Decisions,
    DecisionKeys,
    Periods,
    EventLog,
    Meta,
}

/// An ordered set of encoded inserts awaiting commit.
#[derive(Default)]
pub struct StagedWrite {
    pub(crate) ops: Vec<(TreeId, Vec<u8>, Vec<u8>)>,
}

impl StagedWrite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn push(&mut self, tree: TreeId, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push((tree, key, value));
    }

    /// Latest staged value for `key` in `tree`, if any. Staged rows shadow
    /// the persisted ones during lookups inside the same critical section.
    pub(crate) fn get(&self, tree: TreeId, key: &[u8]) -> Option<&[u8]> {
        self.ops
            .iter()
            .rev()
            .find(|(t, k, _)| *t == tree && k == key)
            .map(|(_, _, v)| v.as_slice())
    }

    pub(crate) fn contains(&self, tree: TreeId, key: &[u8]) -> bool {
        self.get(tree, key).is_some()
    }
}
