//! Single-consumer event dispatch queue.
//!
//! The connection reader pushes events here; one dedicated OS thread pops
//! them in FIFO order and runs the registered callback with no lock held,
//! so a callback may block or issue synchronous calls of its own.
//!
//! ```text
//!   reader task ──enqueue──► [E1, E2, E3] ──pop──► dispatch thread ──► callback(E)
//!                              ▲
//!   register/unregister ───────┘ (same lock)
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};

use super::events::Event;
use crate::error::Result;
use crate::protocol::EventType;

/// A user event callback.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

struct State {
    queue: VecDeque<Event>,
    running: bool,
    slots: Vec<Option<EventCallback>>,
}

struct Shared {
    state: Mutex<State>,
    ready: Condvar,
}

struct Worker {
    handle: JoinHandle<()>,
    id: ThreadId,
}

/// FIFO of engine events drained by one dispatch thread.
pub struct EventQueue {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl EventQueue {
    /// Create a running queue. Events are accepted immediately and held
    /// until [`start`](Self::start) spawns the dispatch thread.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    running: true,
                    slots: vec![None; EventType::COUNT],
                }),
                ready: Condvar::new(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Spawn the dispatch thread. Calling it again is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("playerwire-events".to_string())
            .spawn(move || dispatch_loop(shared))?;
        let id = handle.thread().id();
        *worker = Some(Worker { handle, id });
        Ok(())
    }

    /// Install the callback for `kind`, replacing any previous one.
    pub fn register<F>(&self, kind: EventType, callback: F)
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.shared.state.lock().slots[kind.index()] = Some(Arc::new(callback));
    }

    /// Clear the slot for `kind`. Returns whether a callback was installed.
    pub fn unregister(&self, kind: EventType) -> bool {
        self.shared.state.lock().slots[kind.index()].take().is_some()
    }

    pub fn is_registered(&self, kind: EventType) -> bool {
        self.shared.state.lock().slots[kind.index()].is_some()
    }

    /// Append an event.
    ///
    /// The event is handed back when the queue has stopped or nobody
    /// listens for its kind; both checks happen under the dispatch lock.
    pub fn enqueue(&self, event: Event) -> std::result::Result<(), Event> {
        {
            let mut state = self.shared.state.lock();
            if !state.running || state.slots[event.kind().index()].is_none() {
                return Err(event);
            }
            state.queue.push_back(event);
        }
        self.shared.ready.notify_one();
        Ok(())
    }

    /// Number of events waiting for dispatch.
    pub fn len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Stop dispatching and join the thread.
    ///
    /// Undelivered events are dropped, which releases any buffers they
    /// hold. Calling this from inside a callback does not join (the thread
    /// exits once the callback returns).
    pub fn stop(&self) {
        self.shutdown();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.id == thread::current().id() {
                return;
            }
            if worker.handle.join().is_err() {
                tracing::error!("event dispatch thread panicked");
            }
        }
    }

    /// Stop accepting and dispatching events without joining the thread.
    ///
    /// Safe to call from async code; the owner joins later with
    /// [`stop`](Self::stop).
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.shared.state.lock();
            state.running = false;
            std::mem::take(&mut state.queue)
        };
        self.shared.ready.notify_all();
        if !dropped.is_empty() {
            tracing::debug!(dropped = dropped.len(), "dropping undelivered events");
        }
        drop(dropped);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn dispatch_loop(shared: Arc<Shared>) {
    tracing::debug!("event dispatch thread started");
    loop {
        let (event, callback) = {
            let mut state = shared.state.lock();
            while state.queue.is_empty() && state.running {
                shared.ready.wait(&mut state);
            }
            if !state.running {
                break;
            }
            let Some(event) = state.queue.pop_front() else {
                continue;
            };
            let slot = &mut state.slots[event.kind().index()];
            // One-shot slots are cleared before the callback runs so it can
            // re-register itself.
            let callback = if event.kind().is_one_shot() {
                slot.take()
            } else {
                slot.clone()
            };
            (event, callback)
        };

        match callback {
            Some(cb) => cb(event),
            None => tracing::debug!(kind = ?event.kind(), "callback gone; event dropped"),
        }
    }
    tracing::debug!("event dispatch thread stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{field, Message};
    use std::sync::mpsc;
    use std::time::Duration;

    fn event(kind: EventType, tag: i32) -> Event {
        Event::new(kind, Message::event(kind).with(field::CODE, tag))
    }

    #[test]
    fn test_events_delivered_in_enqueue_order() {
        let queue = EventQueue::new();
        let (tx, rx) = mpsc::channel();
        for kind in [EventType::Buffering, EventType::Error] {
            let tx = tx.clone();
            queue.register(kind, move |e: Event| {
                tx.send(e.message().get_i32(field::CODE).unwrap()).unwrap();
            });
        }

        queue.enqueue(event(EventType::Buffering, 1)).unwrap();
        queue.enqueue(event(EventType::Error, 2)).unwrap();
        queue.enqueue(event(EventType::Buffering, 3)).unwrap();
        assert_eq!(queue.len(), 3);

        queue.start().unwrap();
        let got: Vec<i32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(got, vec![1, 2, 3]);
        queue.stop();
    }

    #[test]
    fn test_unregistered_event_rejected() {
        let queue = EventQueue::new();
        let rejected = queue.enqueue(event(EventType::Subtitle, 0)).unwrap_err();
        assert_eq!(rejected.kind(), EventType::Subtitle);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_after_stop_rejected() {
        let queue = EventQueue::new();
        queue.register(EventType::Complete, |_| {});
        queue.start().unwrap();
        queue.stop();

        assert!(!queue.is_running());
        assert!(queue.enqueue(event(EventType::Complete, 0)).is_err());
    }

    #[test]
    fn test_one_shot_slot_cleared_before_callback() {
        let queue = Arc::new(EventQueue::new());
        let (tx, rx) = mpsc::channel();

        let q = Arc::clone(&queue);
        queue.register(EventType::Prepare, move |_| {
            tx.send(q.is_registered(EventType::Prepare)).unwrap();
        });
        queue.start().unwrap();

        queue.enqueue(event(EventType::Prepare, 0)).unwrap();
        assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!queue.is_registered(EventType::Prepare));
        assert!(queue.enqueue(event(EventType::Prepare, 0)).is_err());
        queue.stop();
    }

    #[test]
    fn test_stop_wakes_idle_thread() {
        let queue = EventQueue::new();
        queue.start().unwrap();
        std::thread::sleep(Duration::from_millis(10));
        queue.stop();
        assert!(queue.worker.lock().is_none());
    }

    #[test]
    fn test_callback_can_stop_queue() {
        let queue = Arc::new(EventQueue::new());
        let (tx, rx) = mpsc::channel();

        let q = Arc::clone(&queue);
        queue.register(EventType::Interrupt, move |_| {
            q.stop();
            tx.send(()).unwrap();
        });
        queue.start().unwrap();
        queue.enqueue(event(EventType::Interrupt, 0)).unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(!queue.is_running());
    }
}
