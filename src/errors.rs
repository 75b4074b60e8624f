use std::fmt::Debug;

/// Why an event could not be handed to a queue. The rejected value travels back
/// to the caller.
#[derive(thiserror::Error, PartialEq, Eq)]
pub enum PushError<E> {
    #[error("queue is full")]
    Full(E),
    #[error("queue consumer has been dropped")]
    Disconnected(E),
}

impl<E> PushError<E> {
    pub fn into_inner(self) -> E {
        match self {
            PushError::Full(e) | PushError::Disconnected(e) => e,
        }
    }
    pub fn is_full(&self) -> bool {
        matches!(self, PushError::Full(_))
    }
    pub fn is_disconnected(&self) -> bool {
        matches!(self, PushError::Disconnected(_))
    }
}

// Events need not be `Debug`; only the variant is printed.
impl<E> Debug for PushError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "Full(..)"),
            PushError::Disconnected(_) => write!(f, "Disconnected(..)"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ThreadError {
    #[error("failed to spawn thread [{0}]")]
    Spawn(#[from] std::io::Error),
    #[error("thread body panicked")]
    Panicked,
}

/// No registered handler accepts the event.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no handler registered for event `{type_name}`")]
pub struct Unhandled {
    pub type_name: &'static str,
}
