//! Operation state machine
//!
//! Each step of a transaction is an [`OpKind`]. A step is *called* (issues
//! its handler/log work), polled until *finished*, then asked for its
//! *next* step, which may replace it on the call stack. Steps that fan out
//! (one child per read or write entry) push their children on the stack
//! and finish once every child is *cascade finished*: finished, moved on,
//! and done with whatever it chained into.
//!
//! Per-step state lives in [`OperationNodes`]. Fan-out pools grow on demand
//! and are reused across transactions.

mod abort;
mod access;
mod commit;

use crate::error::Result;
use crate::types::{Key, Record, TableName, Timestamp, TxnId};
use crate::versiondb::{HandlerResult, TxnEntry, VersionEntry};

use super::context::ExecutorContext;
use super::execution::TransactionExecution;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    InitTxn,
    ReadOutside,
    ReadDataStore,
    Insert,
    Upsert,
    Update,
    Delete,
    Upload,
    UploadEntry(usize),
    SetCommitTs,
    Validate,
    ValidateEntry(usize),
    PushLowerBound(usize),
    WriteToLog,
    CommitStatus,
    CommitPostProcess,
    CommitEntry(usize),
    AbortPostProcess,
    AbortEntry(usize),
    ReleaseReadCounters,
    ReleaseEntry(usize),
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NodeFlags {
    /// `next` ran since the last `call`
    pub moved_to_next: bool,
    /// The last `next` chained into another step
    pub has_next: bool,
}

#[derive(Default)]
pub(crate) struct Node<S> {
    pub flags: NodeFlags,
    pub state: S,
}

/// A step that spawns one child per selected set entry
#[derive(Default)]
pub(crate) struct FanOut {
    pub flags: NodeFlags,
    /// Read or write set index handled by child `i`
    pub targets: Vec<usize>,
}

/// Table, key and record of the request being executed
#[derive(Debug, Default)]
pub(crate) struct OpArgs {
    pub table: TableName,
    pub key: Option<Key>,
    pub record: Option<Record>,
}

#[derive(Default)]
pub(crate) struct ReadOutsideState {
    /// Read set slot the result goes to
    pub slot: usize,
    /// Notify the requester (a standalone read) or only stage the result
    pub deliver: bool,
    pub done: HandlerResult<[VersionEntry; 2]>,
}

#[derive(Default)]
pub(crate) struct ReadDataStoreState {
    pub need_to_read: bool,
    pub from_cache: bool,
    pub done: HandlerResult<Option<Record>>,
}

#[derive(Default)]
pub(crate) struct PushState {
    pub conflict_txn: TxnId,
    pub done: HandlerResult<TxnEntry>,
}

#[derive(Default)]
pub(crate) struct AbortStatusState {
    /// A failure was already logged
    pub reported: bool,
    pub done: HandlerResult<()>,
}

#[derive(Default)]
pub(crate) struct LogAppendState {
    /// The log refused the append; retry on the next pass
    pub busy: bool,
    pub done: HandlerResult<()>,
}

/// All step state of one execution
#[derive(Default)]
pub(crate) struct OperationNodes {
    pub init_txn: Node<HandlerResult<()>>,
    pub read_outside: Node<ReadOutsideState>,
    pub read_datastore: Node<ReadDataStoreState>,
    /// Insert/Upsert resolved against the write set, no read issued
    pub insert: Node<bool>,
    pub upsert: Node<bool>,
    pub update: NodeFlags,
    pub delete: NodeFlags,
    pub upload: FanOut,
    pub upload_entries: Vec<Node<HandlerResult<Timestamp>>>,
    pub set_commit_ts: Node<HandlerResult<Timestamp>>,
    pub validate: FanOut,
    pub validate_entries: Vec<Node<HandlerResult<VersionEntry>>>,
    pub push_lower_bound: Vec<Node<PushState>>,
    pub write_to_log: Node<LogAppendState>,
    pub commit_status: Node<HandlerResult<()>>,
    pub commit_post: FanOut,
    pub commit_entries: Vec<Node<HandlerResult<()>>>,
    pub abort_post: FanOut,
    pub abort_entries: Vec<Node<HandlerResult<()>>>,
    pub release: FanOut,
    pub release_entries: Vec<Node<HandlerResult<()>>>,
    /// The final Aborted status update; nothing waits on it
    pub abort_status: AbortStatusState,
}

impl OperationNodes {
    pub fn flags(&self, op: OpKind) -> NodeFlags {
        match op {
            OpKind::InitTxn => self.init_txn.flags,
            OpKind::ReadOutside => self.read_outside.flags,
            OpKind::ReadDataStore => self.read_datastore.flags,
            OpKind::Insert => self.insert.flags,
            OpKind::Upsert => self.upsert.flags,
            OpKind::Update => self.update,
            OpKind::Delete => self.delete,
            OpKind::Upload => self.upload.flags,
            OpKind::UploadEntry(i) => self.upload_entries[i].flags,
            OpKind::SetCommitTs => self.set_commit_ts.flags,
            OpKind::Validate => self.validate.flags,
            OpKind::ValidateEntry(i) => self.validate_entries[i].flags,
            OpKind::PushLowerBound(i) => self.push_lower_bound[i].flags,
            OpKind::WriteToLog => self.write_to_log.flags,
            OpKind::CommitStatus => self.commit_status.flags,
            OpKind::CommitPostProcess => self.commit_post.flags,
            OpKind::CommitEntry(i) => self.commit_entries[i].flags,
            OpKind::AbortPostProcess => self.abort_post.flags,
            OpKind::AbortEntry(i) => self.abort_entries[i].flags,
            OpKind::ReleaseReadCounters => self.release.flags,
            OpKind::ReleaseEntry(i) => self.release_entries[i].flags,
        }
    }

    pub fn flags_mut(&mut self, op: OpKind) -> &mut NodeFlags {
        match op {
            OpKind::InitTxn => &mut self.init_txn.flags,
            OpKind::ReadOutside => &mut self.read_outside.flags,
            OpKind::ReadDataStore => &mut self.read_datastore.flags,
            OpKind::Insert => &mut self.insert.flags,
            OpKind::Upsert => &mut self.upsert.flags,
            OpKind::Update => &mut self.update,
            OpKind::Delete => &mut self.delete,
            OpKind::Upload => &mut self.upload.flags,
            OpKind::UploadEntry(i) => &mut self.upload_entries[i].flags,
            OpKind::SetCommitTs => &mut self.set_commit_ts.flags,
            OpKind::Validate => &mut self.validate.flags,
            OpKind::ValidateEntry(i) => &mut self.validate_entries[i].flags,
            OpKind::PushLowerBound(i) => &mut self.push_lower_bound[i].flags,
            OpKind::WriteToLog => &mut self.write_to_log.flags,
            OpKind::CommitStatus => &mut self.commit_status.flags,
            OpKind::CommitPostProcess => &mut self.commit_post.flags,
            OpKind::CommitEntry(i) => &mut self.commit_entries[i].flags,
            OpKind::AbortPostProcess => &mut self.abort_post.flags,
            OpKind::AbortEntry(i) => &mut self.abort_entries[i].flags,
            OpKind::ReleaseReadCounters => &mut self.release.flags,
            OpKind::ReleaseEntry(i) => &mut self.release_entries[i].flags,
        }
    }
}

/// Make room for `len` children; pools never shrink
pub(crate) fn grow<S: Default>(pool: &mut Vec<Node<S>>, len: usize) {
    if pool.len() < len {
        pool.resize_with(len, Node::default);
    }
}

impl TransactionExecution {
    /// Push `op` on the call stack and call it
    pub(crate) fn invoke(&mut self, op: OpKind, ctx: &mut ExecutorContext) {
        self.stack.push(Some(op));
        self.call(op, ctx);
    }

    pub(crate) fn call(&mut self, op: OpKind, ctx: &mut ExecutorContext) {
        *self.nodes.flags_mut(op) = NodeFlags::default();
        match op {
            OpKind::InitTxn => self.call_init_txn(ctx),
            OpKind::ReadOutside => self.call_read_outside(ctx),
            OpKind::ReadDataStore => self.call_read_datastore(ctx),
            OpKind::Insert => self.call_insert(ctx),
            OpKind::Upsert => self.call_upsert(ctx),
            OpKind::Update => self.call_update(),
            OpKind::Delete => self.call_delete(),
            OpKind::Upload => self.call_upload(ctx),
            OpKind::UploadEntry(i) => self.call_upload_entry(i, ctx),
            OpKind::SetCommitTs => self.call_set_commit_ts(ctx),
            OpKind::Validate => self.call_validate(ctx),
            OpKind::ValidateEntry(i) => self.call_validate_entry(i, ctx),
            OpKind::PushLowerBound(i) => self.call_push_lower_bound(i, ctx),
            OpKind::WriteToLog => self.call_write_to_log(ctx),
            OpKind::CommitStatus => self.call_commit_status(ctx),
            OpKind::CommitPostProcess => self.call_commit_post_process(ctx),
            OpKind::CommitEntry(i) => self.call_commit_entry(i, ctx),
            OpKind::AbortPostProcess => self.call_abort_post_process(ctx),
            OpKind::AbortEntry(i) => self.call_abort_entry(i, ctx),
            OpKind::ReleaseReadCounters => self.call_release_read_counters(ctx),
            OpKind::ReleaseEntry(i) => self.call_release_entry(i, ctx),
        }
    }

    /// The step's own outstanding work is complete
    pub(crate) fn is_op_finished(&self, op: OpKind) -> bool {
        let nodes = &self.nodes;
        match op {
            OpKind::InitTxn => nodes.init_txn.state.is_finished(),
            OpKind::ReadOutside => nodes.read_outside.state.done.is_finished(),
            OpKind::ReadDataStore => nodes.read_datastore.state.done.is_finished(),
            OpKind::Insert => {
                nodes.insert.state || self.is_cascade_finished(OpKind::ReadOutside)
            }
            OpKind::Upsert => {
                nodes.upsert.state || self.is_cascade_finished(OpKind::ReadOutside)
            }
            OpKind::Update | OpKind::Delete => true,
            OpKind::Upload => self.children_done(nodes.upload.targets.len(), OpKind::UploadEntry),
            OpKind::UploadEntry(i) => nodes.upload_entries[i].state.is_finished(),
            OpKind::SetCommitTs => nodes.set_commit_ts.state.is_finished(),
            OpKind::Validate => {
                self.children_done(nodes.validate.targets.len(), OpKind::ValidateEntry)
            }
            OpKind::ValidateEntry(i) => nodes.validate_entries[i].state.is_finished(),
            OpKind::PushLowerBound(i) => nodes.push_lower_bound[i].state.done.is_finished(),
            OpKind::WriteToLog => nodes.write_to_log.state.done.is_finished(),
            OpKind::CommitStatus => nodes.commit_status.state.is_finished(),
            OpKind::CommitPostProcess => {
                self.children_done(nodes.commit_post.targets.len(), OpKind::CommitEntry)
            }
            OpKind::CommitEntry(i) => nodes.commit_entries[i].state.is_finished(),
            OpKind::AbortPostProcess => {
                self.children_done(nodes.abort_post.targets.len(), OpKind::AbortEntry)
            }
            OpKind::AbortEntry(i) => nodes.abort_entries[i].state.is_finished(),
            OpKind::ReleaseReadCounters => {
                self.children_done(nodes.release.targets.len(), OpKind::ReleaseEntry)
            }
            OpKind::ReleaseEntry(i) => nodes.release_entries[i].state.is_finished(),
        }
    }

    /// Finished, moved on, and so is everything it chained into
    pub(crate) fn is_cascade_finished(&self, op: OpKind) -> bool {
        let flags = self.nodes.flags(op);
        if !flags.moved_to_next || !self.is_op_finished(op) {
            return false;
        }
        match op {
            OpKind::ValidateEntry(i) if flags.has_next => {
                self.is_cascade_finished(OpKind::PushLowerBound(i))
            }
            _ => true,
        }
    }

    fn children_done(&self, count: usize, child: fn(usize) -> OpKind) -> bool {
        (0..count).all(|i| self.is_cascade_finished(child(i)))
    }

    /// Successor of a finished step, `None` when the chain ends here
    pub(crate) fn next_op(&mut self, op: OpKind, ctx: &mut ExecutorContext) -> Result<Option<OpKind>> {
        *self.nodes.flags_mut(op) = NodeFlags {
            moved_to_next: true,
            has_next: true,
        };
        let next = match op {
            OpKind::InitTxn => self.next_init_txn(ctx),
            OpKind::ReadOutside => self.next_read_outside(),
            OpKind::ReadDataStore => self.next_read_datastore(ctx),
            OpKind::Insert => self.next_insert(),
            OpKind::Upsert => self.next_upsert(),
            OpKind::Update | OpKind::Delete => None,
            OpKind::Upload => self.next_upload(),
            OpKind::UploadEntry(i) => self.next_upload_entry(i),
            OpKind::SetCommitTs => self.next_set_commit_ts(ctx),
            OpKind::Validate => self.next_validate(),
            OpKind::ValidateEntry(i) => self.next_validate_entry(i),
            OpKind::PushLowerBound(i) => self.next_push_lower_bound(i),
            OpKind::WriteToLog => self.next_write_to_log(),
            OpKind::CommitStatus => self.next_commit_status()?,
            OpKind::CommitPostProcess => self.next_commit_post_process(),
            OpKind::CommitEntry(i) => self.next_commit_entry(i)?,
            OpKind::AbortPostProcess => Some(OpKind::ReleaseReadCounters),
            OpKind::AbortEntry(i) => self.next_abort_entry(i)?,
            OpKind::ReleaseReadCounters => self.next_release_read_counters(ctx),
            OpKind::ReleaseEntry(i) => self.next_release_entry(i)?,
        };
        if next.is_none() {
            self.nodes.flags_mut(op).has_next = false;
        }
        Ok(next)
    }
}
