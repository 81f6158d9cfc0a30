//! Call/response correlation.
//!
//! Every outgoing call registers a waiter under its api id before the frame
//! is written, so a return that arrives before the caller starts waiting is
//! still delivered. Calls are tagged with a per-api sequence number which
//! the server echoes; a return whose waiter already timed out finds no
//! match and is discarded instead of being handed to a later caller.
//!
//! ```text
//!   call(api, seq) ──► waiters[api] = [(seq, tx), ...]
//!                                      ▲
//!   reader: RETURN(api, seq) ──────────┘  exact seq match, else front if seq == 0
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{PlayerWireError, Result};
use crate::protocol::{api, Message};

struct Waiter {
    seq: u32,
    tx: oneshot::Sender<Message>,
}

struct State {
    running: bool,
    next_seq: HashMap<u32, u32>,
    waiters: HashMap<u32, VecDeque<Waiter>>,
}

/// Matches returns to outstanding calls.
///
/// The `running` flag and every per-api waiter queue share one lock.
pub struct Correlator {
    state: Mutex<State>,
}

impl Correlator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                running: true,
                next_seq: HashMap::new(),
                waiters: HashMap::new(),
            }),
        })
    }

    /// Register a waiter for the next call to `api_id`.
    ///
    /// Fails with `ConnectionLost` once the correlator is closed.
    pub fn register(self: &Arc<Self>, api_id: u32) -> Result<PendingCall> {
        let mut state = self.state.lock();
        if !state.running {
            return Err(PlayerWireError::ConnectionLost);
        }

        let next = state.next_seq.entry(api_id).or_insert(0);
        *next = next.wrapping_add(1);
        if *next == 0 {
            *next = 1;
        }
        let seq = *next;

        let (tx, rx) = oneshot::channel();
        state
            .waiters
            .entry(api_id)
            .or_default()
            .push_back(Waiter { seq, tx });

        Ok(PendingCall {
            api_id,
            seq,
            rx,
            correlator: Arc::clone(self),
        })
    }

    /// Route a return to its waiter. Returns `false` if it was discarded.
    ///
    /// A `DESTROY` return is delivered and then closes the correlator, so
    /// any other caller still blocked is released with `ConnectionLost`.
    pub fn complete(&self, msg: Message) -> bool {
        let api_id = msg.api_id;
        let seq = msg.seq;

        let (waiter, closing) = {
            let mut state = self.state.lock();
            let waiter = state.waiters.get_mut(&api_id).and_then(|queue| {
                let pos = if seq == 0 {
                    (!queue.is_empty()).then_some(0)
                } else {
                    queue.iter().position(|w| w.seq == seq)
                };
                pos.and_then(|p| queue.remove(p))
            });
            let closing = api_id == api::DESTROY && state.running;
            (waiter, closing)
        };

        let delivered = match waiter {
            Some(w) => w.tx.send(msg).is_ok(),
            None => false,
        };
        if !delivered {
            tracing::warn!(
                api = api::name(api_id),
                seq,
                "discarding return with no waiting caller"
            );
        }

        if closing {
            tracing::debug!("engine destroyed; closing correlator");
            self.close();
        }
        delivered
    }

    /// Mark the connection dead and wake every waiter with `ConnectionLost`.
    ///
    /// Returns the number of callers woken.
    pub fn close(&self) -> usize {
        let waiters = {
            let mut state = self.state.lock();
            state.running = false;
            std::mem::take(&mut state.waiters)
        };
        // Dropping the senders wakes the receivers.
        waiters.values().map(VecDeque::len).sum()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Number of calls currently waiting.
    pub fn pending_count(&self) -> usize {
        self.state.lock().waiters.values().map(VecDeque::len).sum()
    }

    fn remove(&self, api_id: u32, seq: u32) -> bool {
        let mut state = self.state.lock();
        let Some(queue) = state.waiters.get_mut(&api_id) else {
            return false;
        };
        match queue.iter().position(|w| w.seq == seq) {
            Some(pos) => {
                queue.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// One registered, not yet answered call.
///
/// Dropping it (timeout or cancellation) removes the waiter so that a late
/// return is discarded rather than queued.
pub struct PendingCall {
    api_id: u32,
    seq: u32,
    rx: oneshot::Receiver<Message>,
    correlator: Arc<Correlator>,
}

impl PendingCall {
    #[inline]
    pub fn api_id(&self) -> u32 {
        self.api_id
    }

    #[inline]
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Wait for the return, the deadline, or connection loss.
    pub async fn wait(mut self, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(PlayerWireError::ConnectionLost),
            Err(_) => {
                tracing::warn!(
                    api = api::name(self.api_id),
                    seq = self.seq,
                    ?timeout,
                    "call timed out"
                );
                Err(PlayerWireError::TimedOut)
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.correlator.remove(self.api_id, self.seq) {
            tracing::debug!(
                api = api::name(self.api_id),
                seq = self.seq,
                "removed abandoned waiter"
            );
        }
    }
}
