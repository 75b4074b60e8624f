//! Routing of open-ended, reference-counted events to typed handlers.
//!
//! Workers whose events form a closed set should use an `enum` and `match` in
//! [`Worker::process_event`](crate::Worker::process_event). This module covers the
//! other case: events are `Arc<dyn EventBase>` values of any type, and a
//! [`Dispatcher`] picks the handler from the event's runtime type.
//!
//! An event type "is a" parent type when it embeds the parent and forwards
//! [`EventBase::view`] to it (see [`impl_event_base!`](crate::impl_event_base)).
//! A handler registered for a parent type therefore also accepts every descendant.
//!
//! **Registration order wins.** The dispatcher scans its registrations in the
//! order they were made and stops at the first one that accepts the event. A
//! handler registered for a parent before the handler for a child intercepts the
//! child's events; register the most specific types first when that is not wanted.

use std::{
    any::{Any, TypeId},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::{Worker, errors::Unhandled, event_loop::EventQueue};

pub trait EventBase: Any + Send + Sync {
    /// Returns this event seen as the type `kind`: itself when it is that type,
    /// or the embedded ancestor of that type, or `None`.
    fn view(&self, kind: TypeId) -> Option<&dyn Any>;

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

pub type EventPtr = Arc<dyn EventBase>;

/// `Some(event)` when `T` is exactly `kind`.
pub fn view_exact<T: Any>(event: &T, kind: TypeId) -> Option<&dyn Any> {
    (TypeId::of::<T>() == kind).then_some(event as &dyn Any)
}

/// Implements [`EventBase`] for a root event type, or for a type whose parent
/// lives in one of its fields.
///
/// ```ignore
/// struct Connected;
/// impl_event_base!(Connected);
///
/// struct Reconnected { base: Connected, attempts: u32 }
/// impl_event_base!(Reconnected => base);
/// ```
#[macro_export]
macro_rules! impl_event_base {
    ($ty:ty => $parent:ident) => {
        impl $crate::EventBase for $ty {
            fn view(&self, kind: ::std::any::TypeId) -> Option<&dyn ::std::any::Any> {
                $crate::dispatch::view_exact(self, kind)
                    .or_else(|| $crate::EventBase::view(&self.$parent, kind))
            }
        }
    };
    ($ty:ty) => {
        impl $crate::EventBase for $ty {
            fn view(&self, kind: ::std::any::TypeId) -> Option<&dyn ::std::any::Any> {
                $crate::dispatch::view_exact(self, kind)
            }
        }
    };
}

/// Which registration took the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handled {
    pub index: usize,
    pub kind: &'static str,
}

struct Registration {
    kind: TypeId,
    kind_name: &'static str,
    handler: Box<dyn FnMut(&dyn Any) + Send>,
}

/// Ordered list of `(type, handler)` registrations.
#[derive(Default)]
pub struct Dispatcher {
    registrations: Vec<Registration>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`register`](Dispatcher::register).
    pub fn on<T: Any>(mut self, handler: impl FnMut(&T) + Send + 'static) -> Self {
        self.register(handler);
        self
    }

    /// Appends a handler for events that are, or descend from, `T`. Returns the
    /// registration index.
    pub fn register<T: Any>(&mut self, mut handler: impl FnMut(&T) + Send + 'static) -> usize {
        let index = self.registrations.len();
        self.registrations.push(Registration {
            kind: TypeId::of::<T>(),
            kind_name: std::any::type_name::<T>(),
            handler: Box::new(move |event: &dyn Any| {
                if let Some(event) = event.downcast_ref::<T>() {
                    handler(event);
                }
            }),
        });
        index
    }

    /// Invokes the first registered handler accepting `event`. No other handler
    /// runs, even if it would also accept the event.
    pub fn dispatch(&mut self, event: &dyn EventBase) -> Result<Handled, Unhandled> {
        for (index, registration) in self.registrations.iter_mut().enumerate() {
            if let Some(view) = event.view(registration.kind) {
                (registration.handler)(view);
                return Ok(Handled {
                    index,
                    kind: registration.kind_name,
                });
            }
        }
        Err(Unhandled {
            type_name: event.type_name(),
        })
    }

    /// Whether some registration accepts `event`, without invoking it.
    pub fn accepts(&self, event: &dyn EventBase) -> bool {
        self.registrations
            .iter()
            .any(|registration| event.view(registration.kind).is_some())
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

/// A [`Worker`] whose events are [`EventPtr`]s routed through a [`Dispatcher`].
/// Unhandled events are logged, counted and skipped.
pub struct DispatchWorker {
    dispatcher: Dispatcher,
    unhandled: Arc<AtomicUsize>,
}

impl DispatchWorker {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            unhandled: Arc::new(AtomicUsize::new(0)),
        }
    }
    /// Shared counter of events no handler accepted.
    pub fn unhandled_counter(&self) -> Arc<AtomicUsize> {
        self.unhandled.clone()
    }
    pub fn unhandled(&self) -> usize {
        self.unhandled.load(Ordering::Relaxed)
    }
}

impl Worker for DispatchWorker {
    type Event = EventPtr;

    fn process_event(&mut self, event: EventPtr, _queue: &EventQueue<EventPtr>) {
        if let Err(e) = self.dispatcher.dispatch(event.as_ref()) {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            log::warn!("{e}");
        }
    }
}
