//! Mutation lifecycle: `Idle -> InFlight -> {SettledSuccess, SettledError}`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;

use emis_core::ApiError;

use crate::cache::{QueryCache, Snapshot};
use crate::key::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn verb(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }

    pub fn past_tense(&self) -> &'static str {
        match self {
            MutationKind::Create => "created",
            MutationKind::Update => "updated",
            MutationKind::Delete => "deleted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    Idle,
    InFlight,
    SettledSuccess,
    SettledError,
}

/// How a mutation settled.
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    pub kind: MutationKind,
    pub state: MutationState,
    pub result: Result<Value, ApiError>,
}

impl MutationOutcome {
    pub fn is_success(&self) -> bool {
        self.state == MutationState::SettledSuccess
    }

    /// Server response of a successful mutation.
    pub fn value(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ApiError> {
        self.result.as_ref().err()
    }
}

/// A mutation between issue and settlement. Holds the rollback snapshot
/// (deletes only) and keeps the coordinator's pending count raised.
pub(crate) struct InFlight {
    kind: MutationKind,
    namespace: &'static str,
    snapshot: Option<Snapshot>,
    cache: Arc<QueryCache>,
    pending: Arc<AtomicUsize>,
    settled: bool,
}

impl InFlight {
    pub(crate) fn start(
        kind: MutationKind,
        namespace: &'static str,
        snapshot: Option<Snapshot>,
        cache: Arc<QueryCache>,
        pending: Arc<AtomicUsize>,
    ) -> Self {
        pending.fetch_add(1, Ordering::SeqCst);
        Self {
            kind,
            namespace,
            snapshot,
            cache,
            pending,
            settled: false,
        }
    }

    pub(crate) fn succeed(mut self, value: Value) -> MutationOutcome {
        self.settled = true;
        if let Some(snapshot) = self.snapshot.take() {
            self.cache.release(snapshot);
        }
        MutationOutcome {
            kind: self.kind,
            state: MutationState::SettledSuccess,
            result: Ok(value),
        }
    }

    /// Settle with an error, handing back the snapshot for rollback.
    pub(crate) fn fail(mut self, error: ApiError) -> (MutationOutcome, Option<Snapshot>) {
        self.settled = true;
        let outcome = MutationOutcome {
            kind: self.kind,
            state: MutationState::SettledError,
            result: Err(error),
        };
        (outcome, self.snapshot.take())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);

        // Caller went away mid-request: the optimistic removal can be neither
        // confirmed nor rolled back, so let the next read reconcile.
        if let Some(snapshot) = self.snapshot.take().filter(|_| !self.settled) {
            tracing::debug!(
                "{} of {} abandoned in flight; invalidating lists",
                self.kind.verb(),
                self.namespace
            );
            self.cache.release(snapshot);
            self.cache.invalidate_family(self.namespace, Scope::List);
        }
    }
}
