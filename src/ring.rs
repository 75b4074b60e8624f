pub use polling::PollingLoop;
pub use queue::RingQueue;

mod queue {
    use std::{
        cell::UnsafeCell,
        mem::MaybeUninit,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use crossbeam_utils::CachePadded;

    /// One storage cell. `stamp` tells producers and consumers whose turn it is:
    /// equal to a push position when free for that push, equal to position + 1 once
    /// the value is written and waiting for the matching pop.
    struct Slot<T> {
        stamp: AtomicUsize,
        value: UnsafeCell<MaybeUninit<T>>,
    }

    /// Fixed-capacity, lock-free, multi-producer/multi-consumer queue.
    ///
    /// `N` must be a power of two. Values are stored in place; `push` on a full
    /// queue and `pop` on an empty one return at once instead of waiting. Under
    /// contention both retry their compare-and-swap until they succeed or observe
    /// full/empty, so they are lock-free but not wait-free.
    ///
    /// No element is delivered twice and none is lost; beyond that, consumers
    /// racing each other see no particular order.
    pub struct RingQueue<T, const N: usize> {
        head: CachePadded<AtomicUsize>,
        tail: CachePadded<AtomicUsize>,
        slots: Box<[Slot<T>]>,
    }

    unsafe impl<T: Send, const N: usize> Send for RingQueue<T, N> {}
    unsafe impl<T: Send, const N: usize> Sync for RingQueue<T, N> {}

    impl<T, const N: usize> Default for RingQueue<T, N> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<T, const N: usize> RingQueue<T, N> {
        const MASK: usize = N - 1;

        pub fn new() -> Self {
            const { assert!(N.is_power_of_two(), "ring capacity must be a power of two") };
            let slots = (0..N)
                .map(|i| Slot {
                    stamp: AtomicUsize::new(i),
                    value: UnsafeCell::new(MaybeUninit::uninit()),
                })
                .collect();
            Self {
                head: CachePadded::new(AtomicUsize::new(0)),
                tail: CachePadded::new(AtomicUsize::new(0)),
                slots,
            }
        }

        /// Stores `value`, or hands it back when the queue is full.
        pub fn push(&self, value: T) -> Result<(), T> {
            let mut tail = self.tail.load(Ordering::Relaxed);
            loop {
                let slot = &self.slots[tail & Self::MASK];
                let stamp = slot.stamp.load(Ordering::Acquire);
                if stamp == tail {
                    match self.tail.compare_exchange_weak(
                        tail,
                        tail.wrapping_add(1),
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            // The CAS made this slot ours until the stamp is published.
                            unsafe { (*slot.value.get()).write(value) };
                            slot.stamp.store(tail.wrapping_add(1), Ordering::Release);
                            return Ok(());
                        }
                        Err(current) => tail = current,
                    }
                } else if (stamp.wrapping_sub(tail) as isize) < 0 {
                    // The slot still holds the value pushed one lap ago.
                    return Err(value);
                } else {
                    tail = self.tail.load(Ordering::Relaxed);
                }
            }
        }

        /// Takes the oldest value not yet claimed by another consumer, if any.
        pub fn pop(&self) -> Option<T> {
            let mut head = self.head.load(Ordering::Relaxed);
            loop {
                let slot = &self.slots[head & Self::MASK];
                let stamp = slot.stamp.load(Ordering::Acquire);
                let ready = head.wrapping_add(1);
                if stamp == ready {
                    match self.head.compare_exchange_weak(
                        head,
                        ready,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            let value = unsafe { (*slot.value.get()).assume_init_read() };
                            slot.stamp.store(head.wrapping_add(N), Ordering::Release);
                            return Some(value);
                        }
                        Err(current) => head = current,
                    }
                } else if (stamp.wrapping_sub(ready) as isize) < 0 {
                    return None;
                } else {
                    head = self.head.load(Ordering::Relaxed);
                }
            }
        }

        pub fn capacity(&self) -> usize {
            N
        }

        /// Approximate while other threads push or pop.
        pub fn len(&self) -> usize {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            tail.wrapping_sub(head).min(N)
        }
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
        pub fn is_full(&self) -> bool {
            self.len() == N
        }
    }

    impl<T, const N: usize> Drop for RingQueue<T, N> {
        fn drop(&mut self) {
            while self.pop().is_some() {}
        }
    }
}

mod polling {
    use std::{
        sync::{
            Mutex, PoisonError,
            atomic::{AtomicBool, Ordering},
        },
        time::Duration,
    };

    use crossbeam_utils::Backoff;

    use crate::thread::Runnable;

    use super::RingQueue;

    // Pause once spinning and yielding stopped paying off.
    const IDLE_SLEEP: Duration = Duration::from_micros(100);

    /// Polling event loop over a [`RingQueue`], meant to run on a
    /// [`Thread`](crate::Thread).
    ///
    /// `push` never blocks; it gives the event back when the ring is full. The loop
    /// backs off while the ring is empty and stops once [`exit`](Runnable::exit)
    /// was called, leaving unprocessed events in the ring.
    pub struct PollingLoop<E, F, const N: usize> {
        ring: RingQueue<E, N>,
        handler: Mutex<F>,
        stopped: AtomicBool,
    }

    impl<E: Send, F: FnMut(E) + Send, const N: usize> PollingLoop<E, F, N> {
        pub fn new(handler: F) -> Self {
            Self {
                ring: RingQueue::new(),
                handler: Mutex::new(handler),
                stopped: AtomicBool::new(false),
            }
        }

        pub fn push(&self, event: E) -> Result<(), E> {
            self.ring.push(event)
        }

        pub fn pending(&self) -> usize {
            self.ring.len()
        }

        /// Drains the ring on the calling thread until stopped.
        pub fn run(&self) {
            let mut handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
            let backoff = Backoff::new();
            while !self.stopped.load(Ordering::Acquire) {
                match self.ring.pop() {
                    Some(event) => {
                        (*handler)(event);
                        backoff.reset();
                    }
                    None if backoff.is_completed() => std::thread::sleep(IDLE_SLEEP),
                    None => backoff.snooze(),
                }
            }
        }
    }

    impl<E, F, const N: usize> Runnable for PollingLoop<E, F, N>
    where
        E: Send + 'static,
        F: FnMut(E) + Send + 'static,
    {
        fn execute(&self) {
            log::debug!("polling loop entered");
            self.run();
            log::debug!("polling loop left");
        }

        fn exit(&self) {
            self.stopped.store(true, Ordering::Release);
        }
    }
}
