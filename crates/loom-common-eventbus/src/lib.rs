// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process publish/subscribe for Loom server events.
//!
//! The bus is generic over a sum type of events. Each event reports its
//! [`Event::Kind`], and subscribers register for a set of kinds (or all of
//! them). Handler panics are caught and logged so one faulty subscriber never
//! stops delivery to the rest.
//!
//! Two publishing modes exist:
//! - [`EventBus::publish`] is fire-and-forget; failures are only logged.
//! - [`EventBus::publish_e`] surfaces handler errors and panics to the caller.

pub mod bus;
pub mod error;

pub use bus::{Event, EventBus, Filter, HandlerError, SubscriptionId};
pub use error::{EventBusError, Result};
