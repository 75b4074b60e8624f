/// Default capacity of a worker's blocking event queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    queue_capacity: usize,
    name: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            name: None,
        }
    }
}

impl WorkerConfig {
    pub fn new() -> Self {
        Self::default()
    }
    /// Sets how many events may sit in the queue before `push` blocks the caller.
    ///
    /// A capacity of zero is raised to one: a rendezvous queue would deadlock any
    /// handler that pushes into its own worker.
    pub fn capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }
    /// Names the OS thread the worker runs on.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
    pub fn get_queue_capacity(&self) -> usize {
        self.queue_capacity
    }
    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[derive(Clone, Debug)]
pub struct TimerConfig {
    name: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            name: String::from("timer-service"),
        }
    }
}

impl TimerConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
    pub fn get_name(&self) -> &str {
        &self.name
    }
}
