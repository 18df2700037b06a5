/* Copyright © 2018 Gianmarco Garrisi

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <http://www.gnu.org/licenses/>. */

//! Shared resources for processes to compete over.
//!
//! Three families are provided:
//!
//! * [`Resource`], [`PriorityResource`] and [`PreemptiveResource`] — an
//!   N-slot semaphore, optionally with priorities and preemption;
//! * [`Container`] — a scalar level bounded by a capacity, put and got
//!   in arbitrary positive amounts;
//! * [`Store`] and [`FilterStore`] — a typed item queue, optionally
//!   retrieved through a predicate.
//!
//! All of them hand out events from their operations: a process asks
//! for something, receives an event and waits on it; the resource
//! triggers the event as soon as its invariants allow the operation to
//! complete. After every state change the resource serves its pending
//! operations again until nothing more can make progress, so a waiter
//! that can be satisfied is satisfied in the same simulation instant.

pub mod base;
pub mod container;
pub mod resource;
pub mod store;

pub use container::Container;
pub use resource::{PreemptiveResource, PriorityResource, Request, Resource};
pub use store::{FilterStore, Store};
