//! Completion continuations for asynchronous reads and flushes.
//!
//! A completion is built when an operation is submitted and consumed when the
//! storage client reports back, on whatever thread it delivers on. Consuming
//! it answers the call and releases the session, so it runs at most once.

use crate::client::{ReadOp, Session, WriteOp};
use crate::error::StorageResult;
use crate::metrics::{Histogram, MethodMetrics};
use crate::rpc::InboundCall;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Answers a call once its read completes.
pub struct ReadCompletion {
    call: InboundCall,
    session: Arc<dyn Session>,
    metrics: MethodMetrics,
    internal: Arc<Histogram>,
    submitted_at: Instant,
}

impl ReadCompletion {
    pub fn new(
        call: InboundCall,
        session: Arc<dyn Session>,
        metrics: MethodMetrics,
        internal: Arc<Histogram>,
    ) -> Self {
        Self {
            call,
            session,
            metrics,
            internal,
            submitted_at: Instant::now(),
        }
    }

    pub fn run(self, op: ReadOp, status: StorageResult<()>) {
        let Self {
            call,
            session: _session,
            metrics,
            internal,
            submitted_at,
        } = self;
        internal.record(submitted_at.elapsed());

        match status {
            Ok(()) => {
                let response = op.into_response().unwrap_or_default();
                call.respond_success(response, &metrics);
            }
            Err(e) => {
                debug!(call = call.id(), operation = %op, error = %e, "Read failed");
                call.respond_failure(e.to_string(), &metrics);
            }
        }
    }
}

/// Answers a call once the flush carrying its write completes.
pub struct WriteCompletion {
    call: InboundCall,
    session: Arc<dyn Session>,
    metrics: MethodMetrics,
    internal: Arc<Histogram>,
    submitted_at: Instant,
}

impl WriteCompletion {
    pub fn new(
        call: InboundCall,
        session: Arc<dyn Session>,
        metrics: MethodMetrics,
        internal: Arc<Histogram>,
    ) -> Self {
        Self {
            call,
            session,
            metrics,
            internal,
            submitted_at: Instant::now(),
        }
    }

    pub fn run(self, ops: Vec<WriteOp>, status: StorageResult<()>) {
        let Self {
            call,
            session,
            metrics,
            internal,
            submitted_at,
        } = self;
        internal.record(submitted_at.elapsed());

        match status {
            Ok(()) => match ops.into_iter().next() {
                Some(op) => {
                    let response = op.into_response().unwrap_or_default();
                    call.respond_success(response, &metrics);
                }
                None => call.respond_failure("flush completed without its operation", &metrics),
            },
            Err(e) => {
                // Logged only; the reply carries the flush status.
                let (errors, overflowed) = session.drain_pending_errors();
                for err in &errors {
                    warn!(
                        call = call.id(),
                        operation = %err.operation,
                        error = %err.status,
                        "Write operation failed"
                    );
                }
                if overflowed {
                    warn!(call = call.id(), "Pending error collector overflowed");
                }
                call.respond_failure(e.to_string(), &metrics);
            }
        }
    }
}
