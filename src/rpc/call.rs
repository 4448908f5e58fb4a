//! Inbound calls and reply delivery.
//!
//! An [`InboundCall`] is move-only. Whoever holds it is responsible for the
//! reply and the respond methods consume it, so a call is answered at most
//! once by construction. If one is dropped unanswered, `Drop` sends a failure
//! so it is still answered exactly once.

use crate::client::RedisResponse;
use crate::metrics::MethodMetrics;
use crate::rpc::reply::Reply;
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{trace, warn};

static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Destination of a call's single reply.
pub trait ReplySink: Send {
    fn deliver(self: Box<Self>, reply: Reply);
}

impl ReplySink for oneshot::Sender<Reply> {
    fn deliver(self: Box<Self>, reply: Reply) {
        // The receiver is gone when the client disconnected mid-flight.
        if (*self).send(reply).is_err() {
            trace!("reply receiver dropped");
        }
    }
}

/// One decoded client command awaiting its reply.
pub struct InboundCall {
    id: u64,
    args: Vec<Bytes>,
    received_at: Instant,
    sink: Option<Box<dyn ReplySink>>,
}

impl InboundCall {
    pub fn new(args: Vec<Bytes>, sink: Box<dyn ReplySink>) -> Self {
        Self {
            id: NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed),
            args,
            received_at: Instant::now(),
            sink: Some(sink),
        }
    }

    /// Creates a call whose reply arrives on the returned receiver.
    pub fn with_channel(args: Vec<Bytes>) -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        (Self::new(args, Box::new(tx)), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The full argument list, command name included.
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// The raw command name, or empty when there are no arguments.
    pub fn command_name(&self) -> &[u8] {
        self.args.first().map(|name| &name[..]).unwrap_or(&[])
    }

    pub fn elapsed(&self) -> Duration {
        self.received_at.elapsed()
    }

    pub fn respond_success(mut self, response: RedisResponse, metrics: &MethodMetrics) {
        self.finish(Reply::Success(response), metrics);
    }

    pub fn respond_failure(mut self, message: impl Into<String>, metrics: &MethodMetrics) {
        self.finish(Reply::Failure(message.into()), metrics);
    }

    fn finish(&mut self, reply: Reply, metrics: &MethodMetrics) {
        metrics.handler_latency.record(self.elapsed());
        if let Some(sink) = self.sink.take() {
            trace!(call = self.id, reply = ?reply, "responding");
            sink.deliver(reply);
        }
    }
}

impl Drop for InboundCall {
    fn drop(&mut self) {
        if let Some(sink) = self.sink.take() {
            warn!(call = self.id, "call dropped without a reply");
            sink.deliver(Reply::Failure("call dropped before completion".into()));
        }
    }
}

impl fmt::Debug for InboundCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundCall")
            .field("id", &self.id)
            .field("command", &String::from_utf8_lossy(self.command_name()))
            .field("args", &self.args.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records every reply delivered to calls created from it.
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        replies: Arc<Mutex<Vec<(u64, Reply)>>>,
    }

    struct Tagged {
        call: u64,
        replies: Arc<Mutex<Vec<(u64, Reply)>>>,
    }

    impl ReplySink for Tagged {
        fn deliver(self: Box<Self>, reply: Reply) {
            self.replies.lock().push((self.call, reply));
        }
    }

    impl RecordingSink {
        pub fn call(&self, args: &[&str]) -> (InboundCall, u64) {
            let args = args.iter().map(|s| Bytes::from(s.to_string())).collect();
            let mut call = InboundCall::new(
                args,
                Box::new(Tagged {
                    call: 0,
                    replies: Arc::clone(&self.replies),
                }),
            );
            let id = call.id();
            call.sink = Some(Box::new(Tagged {
                call: id,
                replies: Arc::clone(&self.replies),
            }));
            (call, id)
        }

        pub fn replies_for(&self, call: u64) -> Vec<Reply> {
            self.replies
                .lock()
                .iter()
                .filter(|(id, _)| *id == call)
                .map(|(_, r)| r.clone())
                .collect()
        }

        pub fn total(&self) -> usize {
            self.replies.lock().len()
        }
    }
}
