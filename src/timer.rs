pub use receiver::{MailboxReceiver, Receiver};
pub use service::{TimerHandle, TimerId, TimerService};

mod receiver {
    use crate::event_loop::Mailbox;

    use super::TimerId;

    /// Capability invoked by the timer service when an order expires.
    ///
    /// `timeout` runs on the timer thread, shared by every order, and must return
    /// quickly. The usual reaction is to push an event into the receiver's own
    /// worker (see [`MailboxReceiver`]). A panic inside `timeout` is caught and
    /// logged; the service keeps firing other orders.
    pub trait Receiver: Send + Sync {
        fn timeout(&self, id: TimerId);
    }

    impl<F: Fn(TimerId) + Send + Sync> Receiver for F {
        fn timeout(&self, id: TimerId) {
            self(id)
        }
    }

    /// Turns each expiry into an event pushed into a worker's mailbox.
    ///
    /// Never blocks the timer thread: when the queue is full or gone the event is
    /// dropped with a warning.
    pub struct MailboxReceiver<E> {
        mailbox: Mailbox<E>,
        make_event: Box<dyn Fn(TimerId) -> E + Send + Sync>,
    }

    impl<E> MailboxReceiver<E> {
        pub fn new(
            mailbox: Mailbox<E>,
            make_event: impl Fn(TimerId) -> E + Send + Sync + 'static,
        ) -> Self {
            Self {
                mailbox,
                make_event: Box::new(make_event),
            }
        }
    }

    impl<E: Send> Receiver for MailboxReceiver<E> {
        fn timeout(&self, id: TimerId) {
            if let Err(e) = self.mailbox.try_push((self.make_event)(id)) {
                log::warn!("timer [{id}] expired but its event could not be queued: {e}");
            }
        }
    }
}

mod service {
    use std::{
        cmp::Ordering as CmpOrdering,
        collections::{BinaryHeap, HashSet},
        panic::{self, AssertUnwindSafe},
        sync::{
            Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak,
            atomic::{AtomicBool, Ordering},
        },
        time::{Duration, Instant},
    };

    use crate::{
        config::TimerConfig,
        errors::ThreadError,
        id::next_id,
        thread::{Runnable, Thread},
    };

    use super::Receiver;

    pub type TimerId = u64;

    // Used when `now + duration` does not fit in an `Instant`.
    const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

    struct Order {
        receiver: Weak<dyn Receiver>,
        expiry: Instant,
        id: TimerId,
    }

    // `BinaryHeap` is a max-heap: the earliest expiry must compare greatest.
    // Equal expiries pop in id order, i.e. in the order they were placed.
    impl Ord for Order {
        fn cmp(&self, other: &Self) -> CmpOrdering {
            other
                .expiry
                .cmp(&self.expiry)
                .then_with(|| other.id.cmp(&self.id))
        }
    }
    impl PartialOrd for Order {
        fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
            Some(self.cmp(other))
        }
    }
    impl PartialEq for Order {
        fn eq(&self, other: &Self) -> bool {
            self.expiry == other.expiry && self.id == other.id
        }
    }
    impl Eq for Order {}

    /// Everything guarded by the service mutex.
    #[derive(Default)]
    struct Schedule {
        orders: BinaryHeap<Order>,
        // ids still in `orders`
        pending: HashSet<TimerId>,
        // subset of `pending`, skipped when popped
        cancelled: HashSet<TimerId>,
    }

    pub(crate) struct TimerCore {
        schedule: Mutex<Schedule>,
        wakeup: Condvar,
        running: AtomicBool,
    }

    impl TimerCore {
        fn new() -> Self {
            Self {
                schedule: Mutex::new(Schedule::default()),
                wakeup: Condvar::new(),
                running: AtomicBool::new(true),
            }
        }

        fn lock(&self) -> MutexGuard<'_, Schedule> {
            self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
        }

        fn order(&self, receiver: Weak<dyn Receiver>, duration: Duration) -> TimerId {
            let mut schedule = self.lock();
            let now = Instant::now();
            let expiry = now
                .checked_add(duration)
                .unwrap_or_else(|| now + FAR_FUTURE);
            let id = next_id();
            schedule.orders.push(Order {
                receiver,
                expiry,
                id,
            });
            schedule.pending.insert(id);
            self.wakeup.notify_one();
            id
        }

        fn cancel(&self, id: TimerId) -> bool {
            let mut schedule = self.lock();
            if !schedule.pending.contains(&id) {
                return false;
            }
            schedule.cancelled.insert(id)
        }

        fn pending(&self) -> usize {
            let schedule = self.lock();
            schedule.pending.len() - schedule.cancelled.len()
        }
    }

    impl Runnable for TimerCore {
        fn execute(&self) {
            log::debug!("timer service loop entered");
            let mut schedule = self.lock();
            while self.running.load(Ordering::Acquire) {
                let Some(expiry) = schedule.orders.peek().map(|order| order.expiry) else {
                    schedule = self
                        .wakeup
                        .wait_while(schedule, |s| {
                            self.running.load(Ordering::Acquire) && s.orders.is_empty()
                        })
                        .unwrap_or_else(PoisonError::into_inner);
                    continue;
                };

                let now = Instant::now();
                if expiry > now {
                    // Woken early by a sooner order or by exit().
                    schedule = self
                        .wakeup
                        .wait_timeout(schedule, expiry - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                    continue;
                }

                let Some(order) = schedule.orders.pop() else {
                    continue;
                };
                schedule.pending.remove(&order.id);
                if schedule.cancelled.remove(&order.id) {
                    log::trace!("timer [{}] cancelled, skipped", order.id);
                    continue;
                }

                drop(schedule);
                match order.receiver.upgrade() {
                    Some(receiver) => {
                        log::trace!("timer [{}] fired", order.id);
                        let fired =
                            panic::catch_unwind(AssertUnwindSafe(|| receiver.timeout(order.id)));
                        if fired.is_err() {
                            log::error!("timer [{}] receiver panicked", order.id);
                        }
                    }
                    None => log::trace!("timer [{}] receiver is gone, dropped", order.id),
                }
                schedule = self.lock();
            }
            log::debug!("timer service loop left");
        }

        fn exit(&self) {
            // Stored under the lock so a waiter cannot miss the wake-up.
            let schedule = self.lock();
            self.running.store(false, Ordering::Release);
            drop(schedule);
            self.wakeup.notify_all();
        }
    }

    /// Cloneable access to a [`TimerService`] for components that schedule timers.
    #[derive(Clone)]
    pub struct TimerHandle {
        core: Arc<TimerCore>,
    }

    impl TimerHandle {
        /// Schedules `receiver.timeout(id)` after `duration` and returns `id`
        /// immediately.
        ///
        /// The service only keeps a weak reference: if every `Arc` to the receiver
        /// is gone by expiry, the order is dropped silently.
        pub fn order<R: Receiver + 'static>(&self, receiver: &Arc<R>, duration: Duration) -> TimerId {
            let receiver = Arc::downgrade(receiver);
            let receiver: Weak<dyn Receiver> = receiver;
            self.core.order(receiver, duration)
        }

        pub fn order_weak(&self, receiver: Weak<dyn Receiver>, duration: Duration) -> TimerId {
            self.core.order(receiver, duration)
        }

        /// Marks a pending order as cancelled; it is discarded when it reaches the
        /// front of the schedule.
        ///
        /// Returns `true` the first time a still pending order is cancelled, in which
        /// case its callback will not run. Returns `false` for repeated calls and for
        /// orders already fired (or being fired) and unknown ids.
        pub fn cancel(&self, id: TimerId) -> bool {
            self.core.cancel(id)
        }

        /// Orders scheduled and neither fired nor cancelled.
        pub fn pending(&self) -> usize {
            self.core.pending()
        }
    }

    /// Scheduler running on its own thread that calls a [`Receiver`] once a
    /// requested duration has elapsed.
    ///
    /// Orders sit in a min-heap keyed by expiry. The thread sleeps until the
    /// earliest expiry, or until a new order or an exit request wakes it, and
    /// invokes callbacks on itself, in expiry order.
    ///
    /// Dropping the service stops and joins its thread.
    pub struct TimerService {
        handle: TimerHandle,
        thread: Thread<TimerCore>,
    }

    impl TimerService {
        pub fn new(config: TimerConfig) -> Self {
            let core = Arc::new(TimerCore::new());
            Self {
                handle: TimerHandle { core: core.clone() },
                thread: Thread::named(core, config.get_name()),
            }
        }

        /// Builds and starts a service.
        pub fn spawn(config: TimerConfig) -> Result<Self, ThreadError> {
            let service = Self::new(config);
            service.start()?;
            Ok(service)
        }

        pub fn start(&self) -> Result<(), ThreadError> {
            self.thread.start()
        }
        /// Stops scheduling further callbacks. A callback already running finishes.
        pub fn exit(&self) {
            self.thread.exit();
        }
        pub fn join(&self) -> Result<(), ThreadError> {
            self.thread.join()
        }

        pub fn handle(&self) -> TimerHandle {
            self.handle.clone()
        }
        pub fn order<R: Receiver + 'static>(&self, receiver: &Arc<R>, duration: Duration) -> TimerId {
            self.handle.order(receiver, duration)
        }
        pub fn cancel(&self, id: TimerId) -> bool {
            self.handle.cancel(id)
        }
        pub fn pending(&self) -> usize {
            self.handle.pending()
        }
    }

    impl Drop for TimerService {
        fn drop(&mut self) {
            self.thread.exit();
            if let Err(e) = self.thread.join() {
                log::warn!("timer service stopped abnormally: {e}");
            }
        }
    }
}
