mod config;
pub mod directory;
pub mod dispatch;
mod errors;
pub mod event_loop;
pub mod id;
pub mod ring;
#[cfg(test)]
mod test;
mod thread;
pub mod timer;

pub use config::{DEFAULT_QUEUE_CAPACITY, TimerConfig, WorkerConfig};
pub use directory::{Directory, WorkerId};
pub use dispatch::{DispatchWorker, Dispatcher, EventBase, EventPtr, Handled};
pub use errors::{PushError, ThreadError, Unhandled};
pub use event_loop::{EventQueue, EventThread, Mailbox, Worker};
pub use ring::{PollingLoop, RingQueue};
pub use thread::{Runnable, Thread};
pub use timer::{MailboxReceiver, Receiver, TimerHandle, TimerId, TimerService};

pub mod prelude {
    pub use super::{
        Dispatcher, EventBase, EventQueue, EventThread, Mailbox, PushError, Receiver, RingQueue,
        Runnable, Thread, ThreadError, TimerConfig, TimerHandle, TimerId, TimerService, Worker,
        WorkerConfig,
    };
}
