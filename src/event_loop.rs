pub use mailbox::Mailbox;
pub use queue::EventQueue;
pub use worker::{EventThread, Worker};

/// What actually travels through a worker's channel. Neither marker can be
/// confused with an application event.
pub(crate) enum Envelope<E> {
    Event(E),
    /// In-band stop: the loop returns once it dequeues this.
    Stop,
    /// Only unblocks a consumer waiting on an empty queue. Carries no stop request
    /// of its own, so one left over from an earlier run is skipped.
    Wake,
}

mod queue {
    use std::{
        sync::{
            Mutex, PoisonError,
            atomic::{AtomicU8, Ordering},
        },
        thread::ThreadId,
    };

    use crossbeam_channel::{Receiver, Sender, TrySendError};

    use crate::{config::WorkerConfig, errors::PushError};

    use super::{Envelope, Mailbox};

    const IDLE: u8 = 0;
    const RUNNING: u8 = 1;
    const STOPPING: u8 = 2;

    /// Bounded, blocking, multi-producer/single-consumer queue plus the loop that
    /// drains it.
    ///
    /// Producers on any thread call [`push`](EventQueue::push) (or push through a
    /// [`Mailbox`]). Exactly one thread runs [`event_loop`](EventQueue::event_loop),
    /// which blocks while the queue is empty and hands each event to the processing
    /// closure, one at a time. Events from one producer come out in the order that
    /// producer pushed them.
    ///
    /// Two ways to stop the loop:
    /// - [`break_event_loop`](EventQueue::break_event_loop) clears the running flag at
    ///   once. The loop returns right after the item it is currently processing, so
    ///   events still queued behind it stay in the queue.
    /// - [`stop_when_drained`](EventQueue::stop_when_drained) enqueues the stop
    ///   sentinel behind everything already pushed; the loop returns when it reaches it.
    pub struct EventQueue<E> {
        sender: Sender<Envelope<E>>,
        receiver: Receiver<Envelope<E>>,
        state: AtomicU8,
        loop_thread: Mutex<Option<ThreadId>>,
    }

    impl<E: Send> EventQueue<E> {
        pub fn new(capacity: usize) -> Self {
            let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
            Self {
                sender,
                receiver,
                state: AtomicU8::new(IDLE),
                loop_thread: Mutex::new(None),
            }
        }
        pub fn with_config(config: &WorkerConfig) -> Self {
            Self::new(config.get_queue_capacity())
        }

        /// Enqueues `event`, blocking the caller while the queue is full.
        ///
        /// The queue owns a sending half itself, so this never reports
        /// `Disconnected`; the error type is shared with [`Mailbox::push`].
        pub fn push(&self, event: E) -> Result<(), PushError<E>> {
            self.sender
                .send(Envelope::Event(event))
                .map_err(|e| PushError::Disconnected(e.into_inner().into_event()))
        }

        /// Enqueues `event` or gives it back with [`PushError::Full`] without blocking.
        pub fn try_push(&self, event: E) -> Result<(), PushError<E>> {
            self.sender
                .try_send(Envelope::Event(event))
                .map_err(|e| match e {
                    TrySendError::Full(envelope) => PushError::Full(envelope.into_event()),
                    TrySendError::Disconnected(envelope) => {
                        PushError::Disconnected(envelope.into_event())
                    }
                })
        }

        /// A cloneable producer handle onto this queue.
        pub fn mailbox(&self) -> Mailbox<E> {
            Mailbox::new(self.sender.clone())
        }

        /// Runs the loop on the calling thread until a stop is observed.
        ///
        /// After every dequeued item (markers included) the running flag is
        /// checked; once it is cleared the loop returns.
        pub fn event_loop(&self, mut process: impl FnMut(E)) {
            // A stop requested before the loop started is kept; the loop returns
            // after the first item it dequeues.
            let _ = self
                .state
                .compare_exchange(IDLE, RUNNING, Ordering::AcqRel, Ordering::Acquire);
            *self.loop_thread() = Some(std::thread::current().id());
            log::debug!("event loop entered on {:?}", std::thread::current().id());

            // `self` keeps a sender alive, recv only fails if that invariant breaks.
            while let Ok(envelope) = self.receiver.recv() {
                match envelope {
                    Envelope::Event(event) => process(event),
                    Envelope::Stop => self.state.store(STOPPING, Ordering::Release),
                    Envelope::Wake => {}
                }
                if self.state.load(Ordering::Acquire) != RUNNING {
                    break;
                }
            }

            *self.loop_thread() = None;
            self.state.store(IDLE, Ordering::Release);
            log::debug!("event loop left on {:?}", std::thread::current().id());
        }

        /// Asks the loop to return after the item it is processing now.
        ///
        /// Safe to call any number of times, from any thread, including from a
        /// handler running inside the loop. Never blocks. When called off the loop
        /// thread a wake marker is enqueued so a consumer blocked on an empty queue
        /// returns; the marker may stay queued and is ignored by a later run.
        pub fn break_event_loop(&self) {
            if self.state.swap(STOPPING, Ordering::AcqRel) == STOPPING {
                return;
            }
            let on_loop_thread = *self.loop_thread() == Some(std::thread::current().id());
            if !on_loop_thread {
                // A full queue means the consumer is not waiting on an empty one,
                // its next dequeue sees the flag without the marker.
                if let Err(TrySendError::Full(_)) = self.sender.try_send(Envelope::Wake) {
                    log::trace!("queue full, break requested without wake marker");
                }
            }
        }

        /// Enqueues the stop sentinel behind everything pushed so far. The loop
        /// processes those events, then returns.
        pub fn stop_when_drained(&self) {
            let _ = self.sender.send(Envelope::Stop);
        }

        pub fn is_running(&self) -> bool {
            self.state.load(Ordering::Acquire) == RUNNING
        }
        /// Items currently queued, markers included.
        pub fn len(&self) -> usize {
            self.receiver.len()
        }
        pub fn is_empty(&self) -> bool {
            self.receiver.is_empty()
        }
        pub fn capacity(&self) -> usize {
            self.sender.capacity().unwrap_or(usize::MAX)
        }

        fn loop_thread(&self) -> std::sync::MutexGuard<'_, Option<ThreadId>> {
            self.loop_thread.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl<E> Envelope<E> {
        /// Only events are ever rejected back to a producer.
        pub(crate) fn into_event(self) -> E {
            match self {
                Envelope::Event(event) => event,
                Envelope::Stop | Envelope::Wake => {
                    unreachable!("loop marker handed back as an event")
                }
            }
        }
    }
}

mod mailbox {
    use crossbeam_channel::{Sender, TrySendError};

    use crate::errors::PushError;

    use super::Envelope;

    /// Producer side of an [`EventQueue`](super::EventQueue).
    ///
    /// Cheap to clone and safe to hand to any thread. Pushing after the queue has
    /// been dropped yields [`PushError::Disconnected`].
    pub struct Mailbox<E> {
        sender: Sender<Envelope<E>>,
    }

    impl<E> Clone for Mailbox<E> {
        fn clone(&self) -> Self {
            Self {
                sender: self.sender.clone(),
            }
        }
    }

    impl<E> Mailbox<E> {
        pub(crate) fn new(sender: Sender<Envelope<E>>) -> Self {
            Self { sender }
        }

        /// Blocks while the queue is full.
        pub fn push(&self, event: E) -> Result<(), PushError<E>> {
            self.sender
                .send(Envelope::Event(event))
                .map_err(|e| PushError::Disconnected(e.into_inner().into_event()))
        }

        pub fn try_push(&self, event: E) -> Result<(), PushError<E>> {
            self.sender
                .try_send(Envelope::Event(event))
                .map_err(|e| match e {
                    TrySendError::Full(envelope) => PushError::Full(envelope.into_event()),
                    TrySendError::Disconnected(envelope) => {
                        PushError::Disconnected(envelope.into_event())
                    }
                })
        }

        /// See [`EventQueue::stop_when_drained`](super::EventQueue::stop_when_drained).
        /// Returns `false` if the queue no longer exists.
        pub fn stop_when_drained(&self) -> bool {
            self.sender.send(Envelope::Stop).is_ok()
        }

        pub fn len(&self) -> usize {
            self.sender.len()
        }
        pub fn is_empty(&self) -> bool {
            self.sender.is_empty()
        }
        /// `true` when both handles feed the same queue.
        pub fn same_queue(&self, other: &Mailbox<E>) -> bool {
            self.sender.same_channel(&other.sender)
        }
    }
}

mod worker {
    use std::sync::{Arc, Mutex, PoisonError};

    use crate::{
        config::WorkerConfig,
        errors::{PushError, ThreadError},
        thread::{Runnable, Thread},
    };

    use super::{EventQueue, Mailbox};

    /// State and handlers of an actor-like worker.
    ///
    /// Every method runs on the worker's own thread. `process_event` receives the
    /// worker's queue so a handler can stop the loop or hand out its mailbox. A
    /// handler pushing into its own queue with the blocking [`EventQueue::push`]
    /// deadlocks if the queue is full; use `try_push` there.
    pub trait Worker: Send + 'static {
        type Event: Send + 'static;

        /// Runs once on the worker thread before the first event is dequeued.
        fn on_start(&mut self, _queue: &EventQueue<Self::Event>) {}

        fn process_event(&mut self, event: Self::Event, queue: &EventQueue<Self::Event>);

        /// Runs once on the worker thread after the loop returned.
        fn on_stop(&mut self) {}
    }

    pub(crate) struct WorkerCore<W: Worker> {
        queue: EventQueue<W::Event>,
        worker: Mutex<W>,
    }

    impl<W: Worker> Runnable for WorkerCore<W> {
        fn execute(&self) {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            worker.on_start(&self.queue);
            self.queue
                .event_loop(|event| worker.process_event(event, &self.queue));
            worker.on_stop();
        }

        fn exit(&self) {
            self.queue.break_event_loop();
        }
    }

    /// A [`Worker`] married to its queue and its own OS thread.
    ///
    /// ```ignore
    /// let counter = EventThread::new(Counter::default());
    /// counter.start()?;
    /// counter.push(Count::Add(2))?;
    /// counter.stop_when_drained();
    /// counter.join()?;
    /// ```
    pub struct EventThread<W: Worker> {
        thread: Thread<WorkerCore<W>>,
        mailbox: Mailbox<W::Event>,
    }

    impl<W: Worker> EventThread<W> {
        pub fn new(worker: W) -> Self {
            Self::with_config(worker, WorkerConfig::default())
        }

        pub fn with_config(worker: W, config: WorkerConfig) -> Self {
            let core = Arc::new(WorkerCore {
                queue: EventQueue::with_config(&config),
                worker: Mutex::new(worker),
            });
            let mailbox = core.queue.mailbox();
            let thread = match config.get_name() {
                Some(name) => Thread::named(core, name),
                None => Thread::new(core),
            };
            Self { thread, mailbox }
        }

        pub fn start(&self) -> Result<(), ThreadError> {
            self.thread.start()
        }
        pub fn join(&self) -> Result<(), ThreadError> {
            self.thread.join()
        }
        /// Breaks the event loop; see [`EventQueue::break_event_loop`].
        pub fn exit(&self) {
            self.thread.exit();
        }
        pub fn stop_when_drained(&self) {
            self.queue().stop_when_drained();
        }

        pub fn push(&self, event: W::Event) -> Result<(), PushError<W::Event>> {
            self.mailbox.push(event)
        }
        pub fn try_push(&self, event: W::Event) -> Result<(), PushError<W::Event>> {
            self.mailbox.try_push(event)
        }
        pub fn mailbox(&self) -> Mailbox<W::Event> {
            self.mailbox.clone()
        }
        pub fn queue(&self) -> &EventQueue<W::Event> {
            &self.thread.body().queue
        }
        pub fn id(&self) -> Option<std::thread::ThreadId> {
            self.thread.id()
        }
        pub fn is_joinable(&self) -> bool {
            self.thread.is_joinable()
        }

        /// Runs `f` against the worker state.
        ///
        /// The worker thread holds the state for as long as its loop runs, so call
        /// this before `start` or after `join`; otherwise it blocks until the loop ends.
        pub fn with_worker<T>(&self, f: impl FnOnce(&mut W) -> T) -> T {
            let mut worker = self
                .thread
                .body()
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            f(&mut worker)
        }
    }
}
