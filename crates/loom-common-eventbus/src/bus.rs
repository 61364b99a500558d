// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::any::Any;
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, warn};

use crate::error::{EventBusError, Result};

/// Error type fallible handlers return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// An event that can travel over an [`EventBus`].
pub trait Event: Debug + Send + Sync + 'static {
	type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

	fn kind(&self) -> Self::Kind;
}

/// Identifies a subscription for later removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Which event kinds a subscriber receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter<K> {
	Any,
	Kinds(Vec<K>),
}

impl<K: PartialEq> Filter<K> {
	pub fn kind(kind: K) -> Self {
		Filter::Kinds(vec![kind])
	}

	fn matches(&self, kind: &K) -> bool {
		match self {
			Filter::Any => true,
			Filter::Kinds(kinds) => kinds.contains(kind),
		}
	}
}

type InfallibleFn<E> = dyn Fn(&E) + Send + Sync;
type FallibleFn<E> = dyn Fn(&E) -> std::result::Result<(), HandlerError> + Send + Sync;

enum Handler<E> {
	Infallible(Box<InfallibleFn<E>>),
	Fallible(Box<FallibleFn<E>>),
}

struct Subscriber<E: Event> {
	id: SubscriptionId,
	name: &'static str,
	filter: Filter<E::Kind>,
	handler: Handler<E>,
}

enum Delivery {
	Ok,
	Failed(HandlerError),
	Panicked(String),
}

impl<E: Event> Subscriber<E> {
	fn deliver(&self, event: &E) -> Delivery {
		let outcome = catch_unwind(AssertUnwindSafe(|| match &self.handler {
			Handler::Infallible(f) => {
				f(event);
				Ok(())
			}
			Handler::Fallible(f) => f(event),
		}));

		match outcome {
			Ok(Ok(())) => Delivery::Ok,
			Ok(Err(e)) => Delivery::Failed(e),
			Err(payload) => Delivery::Panicked(panic_message(payload.as_ref())),
		}
	}
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"non-string panic payload".to_string()
	}
}

/// Process-wide publish/subscribe hub.
///
/// The subscriber list is copy-on-write: `publish` takes a snapshot, so a
/// subscription added while a publish is running is seen from the next
/// publish on.
pub struct EventBus<E: Event> {
	subscribers: RwLock<Arc<Vec<Arc<Subscriber<E>>>>>,
	next_id: AtomicU64,
}

impl<E: Event> Default for EventBus<E> {
	fn default() -> Self {
		Self::new()
	}
}

impl<E: Event> EventBus<E> {
	pub fn new() -> Self {
		Self {
			subscribers: RwLock::new(Arc::new(Vec::new())),
			next_id: AtomicU64::new(1),
		}
	}

	/// Register a handler that cannot fail.
	pub fn subscribe<F>(&self, filter: Filter<E::Kind>, handler: F) -> SubscriptionId
	where
		F: Fn(&E) + Send + Sync + 'static,
	{
		self.register(
			std::any::type_name::<F>(),
			filter,
			Handler::Infallible(Box::new(handler)),
		)
	}

	/// Register a handler whose errors are surfaced by [`EventBus::publish_e`].
	pub fn subscribe_fallible<F>(&self, filter: Filter<E::Kind>, handler: F) -> SubscriptionId
	where
		F: Fn(&E) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
	{
		self.register(
			std::any::type_name::<F>(),
			filter,
			Handler::Fallible(Box::new(handler)),
		)
	}

	fn register(
		&self,
		name: &'static str,
		filter: Filter<E::Kind>,
		handler: Handler<E>,
	) -> SubscriptionId {
		let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let subscriber = Arc::new(Subscriber {
			id,
			name,
			filter,
			handler,
		});

		let mut guard = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
		let mut next = Vec::with_capacity(guard.len() + 1);
		next.extend(guard.iter().cloned());
		next.push(subscriber);
		*guard = Arc::new(next);

		debug!(handler = name, subscription = id.0, "eventbus: subscribed");
		id
	}

	/// Remove a subscription. Returns `false` when the id is unknown.
	pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
		let mut guard = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
		if !guard.iter().any(|s| s.id == id) {
			return false;
		}
		let next: Vec<_> = guard.iter().filter(|s| s.id != id).cloned().collect();
		*guard = Arc::new(next);
		true
	}

	pub fn clear(&self) {
		let mut guard = self.subscribers.write().unwrap_or_else(PoisonError::into_inner);
		*guard = Arc::new(Vec::new());
	}

	pub fn subscribers_count(&self) -> usize {
		self.snapshot().len()
	}

	fn snapshot(&self) -> Arc<Vec<Arc<Subscriber<E>>>> {
		self
			.subscribers
			.read()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	/// Deliver `event` to every matching subscriber.
	///
	/// Panicking and failing handlers are logged and skipped. Returns the
	/// number of handlers that completed without panicking.
	pub fn publish(&self, event: &E) -> usize {
		let kind = event.kind();
		let subscribers = self.snapshot();
		let mut matched = 0;
		let mut handled = 0;

		for subscriber in subscribers.iter().filter(|s| s.filter.matches(&kind)) {
			matched += 1;
			match subscriber.deliver(event) {
				Delivery::Ok => handled += 1,
				Delivery::Failed(e) => {
					handled += 1;
					warn!(
						handler = subscriber.name,
						event = ?event,
						error = %e,
						"eventbus.publish: handler returned error"
					);
				}
				Delivery::Panicked(message) => {
					error!(
						handler = subscriber.name,
						event = ?event,
						panic = %message,
						"eventbus.publish: handler panicked"
					);
				}
			}
		}

		if matched == 0 {
			warn!(kind = ?kind, "eventbus.publish: no matching subscribers");
		} else if handled == 0 {
			warn!(kind = ?kind, matched, "eventbus.publish: every matching handler panicked");
		}
		handled
	}

	/// Deliver `event` and report handler failures.
	///
	/// Every matching handler runs even when an earlier one fails. Panics are
	/// converted into [`EventBusError::HandlerPanicked`]; several failures are
	/// joined into [`EventBusError::Multiple`].
	pub fn publish_e(&self, event: &E) -> Result<()> {
		let kind = event.kind();
		let subscribers = self.snapshot();
		let mut matched = false;
		let mut errors = Vec::new();

		for subscriber in subscribers.iter().filter(|s| s.filter.matches(&kind)) {
			matched = true;
			match subscriber.deliver(event) {
				Delivery::Ok => {}
				Delivery::Failed(source) => errors.push(EventBusError::HandlerFailed {
					handler: subscriber.name,
					source,
				}),
				Delivery::Panicked(message) => {
					error!(
						handler = subscriber.name,
						event = ?event,
						panic = %message,
						"eventbus.publish_e: handler panicked"
					);
					errors.push(EventBusError::HandlerPanicked {
						handler: subscriber.name,
						message,
					});
				}
			}
		}

		if !matched {
			return Err(EventBusError::NoSubscribers);
		}

		match errors.len() {
			0 => Ok(()),
			1 => Err(errors.remove(0)),
			_ => Err(EventBusError::Multiple(errors)),
		}
	}
}
