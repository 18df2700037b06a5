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

//! This crate implements a process-based discrete event simulation
//! framework inspired by the SimPy library for Python. Everything in a
//! simulation revolves around events: triggerable objects that carry a
//! value or a failure and a list of callbacks, scheduled on a virtual
//! clock and processed in time, priority and insertion order.
//!
//! # Simulation
//! A simulation is performed scheduling one or more processes that
//! model the environment you are going to simulate. Your model may
//! consider some kind of finite resource that must be shared among the
//! processes, e.g. a bunch of servers in a simulation on queues.
//!
//! After setting up the simulation, it can be run step-by-step, using
//! the `step()` method, or all at once, with `run()`, until an ending
//! condition is met.
//!
//! # Process
//! A process is implemented as an `async` routine, so that it can be
//! suspended and resumed without spawning a thread per process. The
//! routine receives a [`SimContext`] and advances virtual time by
//! waiting on events: `ctx.wait(&event).await` suspends the process
//! until the event is processed and evaluates to the event's outcome, a
//! value or a failure. A process is itself an event that triggers with
//! the routine's return value, so processes can wait for each other,
//! and a running process can be interrupted out of band through its
//! [`Process`] handle.
//!
//! ```
//! use eventsim::prelude::*;
//!
//! let env: Environment<&'static str> = Environment::new();
//! env.process(|ctx| Box::pin(async move {
//!     let shipped = ctx.timeout_with(2.0, "crate of spam");
//!     let cargo = ctx.wait(&shipped).await?;
//!     assert_eq!(cargo, EventValue::Item("crate of spam"));
//!     Ok(EventValue::Unit)
//! }));
//! env.run(EndCondition::NoEvents).unwrap();
//! assert_eq!(env.now(), 2.0);
//! ```
//!
//! Events compose: `&a | &b` triggers as soon as either event has been
//! processed, `&a & &b` once both are, and the general form is
//! [`Environment::condition`].
//!
//! # Resource
//! A resource is a finite amount of entities that must be shared among
//! processes. Three families are provided: capacity resources (plain,
//! priority and preemptive semaphores), containers for bulk levels, and
//! stores for typed items, optionally retrieved through a predicate.
//! Resource operations hand out events; waiting on them queues the
//! process until the resource can serve it. See the [`resources`]
//! module documentation.
//!
//! # Errors
//! Failures travel through the same channel as values: a failed event
//! resumes its waiters with the failure, and a failure nobody handles
//! aborts the run. Contract violations, like triggering an event twice
//! or waiting on an already processed event, panic instead.

use std::fmt;

pub mod condition;
pub mod environment;
pub mod event;
pub mod prelude;
pub mod process;
pub mod resources;
pub mod rt;

pub use condition::ConditionValue;
pub use environment::{EndCondition, Environment, Priority, SimError};
pub use event::{Event, EventValue, Failure, Outcome, Preempted};
pub use process::{Process, SimContext, SimFuture, Wait};
pub use resources::{
    Container, FilterStore, PreemptiveResource, PriorityResource, Request, Resource, Store,
};
pub use rt::RealtimeEnvironment;

/// Blanket bound for the payload type carried around by a simulation:
/// timeout values, store items, process return values, interrupt causes.
///
/// Implemented automatically for every `Clone + Debug + 'static` type.
pub trait SimValue: Clone + fmt::Debug + 'static {}

impl<T: Clone + fmt::Debug + 'static> SimValue for T {}
