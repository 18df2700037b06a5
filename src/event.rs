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

//! Events: triggerable carriers of a value or a failure.
//!
//! An [`Event`] goes through three states, in this order and never
//! backwards: *untriggered* (no outcome assigned), *triggered* (outcome
//! assigned and the event scheduled) and *processed* (the scheduler has
//! fired all of its callbacks). Each event can be succeeded or failed
//! exactly once; once processed, its callback list is gone for good and
//! trying to append to it is a programming error.
//!
//! Events are cheap handles into the storage owned by their
//! [`Environment`](crate::Environment); cloning one clones the handle,
//! not the event.

use std::fmt;
use std::rc::Rc;

use crate::condition::ConditionValue;
use crate::environment::{CoreRef, Priority};
use crate::process::Process;
use crate::SimValue;

/// What an event resolved to: either a value or a [`Failure`].
pub type Outcome<T> = Result<EventValue<T>, Failure<T>>;

/// The value side of an event's outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum EventValue<T: SimValue> {
    /// No payload: plain events, timeouts without a value, resource
    /// grants and releases.
    Unit,
    /// A user payload: timeouts with a value, store retrievals, process
    /// return values.
    Item(T),
    /// The ordered child-to-value mapping of a triggered condition.
    Condition(ConditionValue<T>),
}

impl<T: SimValue> EventValue<T> {
    /// The payload, if this is an `Item`.
    pub fn item(self) -> Option<T> {
        match self {
            EventValue::Item(value) => Some(value),
            _ => None,
        }
    }

    /// The condition mapping, if this is a `Condition`.
    pub fn condition(self) -> Option<ConditionValue<T>> {
        match self {
            EventValue::Condition(value) => Some(value),
            _ => None,
        }
    }
}

/// The failure side of an event's outcome.
#[derive(Debug, Clone)]
pub enum Failure<T: SimValue> {
    /// Delivered into a process by [`Process::interrupt`], carrying the
    /// optional cause the interrupter supplied.
    Interrupt(Option<T>),
    /// Delivered into a process when a
    /// [`PreemptiveResource`](crate::resources::PreemptiveResource)
    /// evicts it from its slot.
    Preempted(Preempted<T>),
    /// Raised by [`Event::fail`], or returned from a process routine.
    Fault(String),
}

impl<T: SimValue> Failure<T> {
    /// True for both interrupt forms, [`Failure::Interrupt`] and
    /// [`Failure::Preempted`].
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Failure::Interrupt(_) | Failure::Preempted(_))
    }
}

impl<T: SimValue> fmt::Display for Failure<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Interrupt(_) => write!(f, "interrupted"),
            Failure::Preempted(p) => {
                write!(f, "preempted after holding a slot since {}", p.usage_since)
            }
            Failure::Fault(reason) => write!(f, "{reason}"),
        }
    }
}

/// Details of a preemption, carried by [`Failure::Preempted`].
#[derive(Debug, Clone)]
pub struct Preempted<T: SimValue> {
    /// The process whose request evicted the holder, when the request
    /// was issued from inside one.
    pub by: Option<Process<T>>,
    /// The time at which the evicted process acquired its slot.
    pub usage_since: f64,
}

/// A triggerable event of an [`Environment`](crate::Environment).
pub struct Event<T: SimValue> {
    core: CoreRef<T>,
    id: usize,
}

impl<T: SimValue> Event<T> {
    pub(crate) fn from_parts(core: CoreRef<T>, id: usize) -> Event<T> {
        Event { core, id }
    }

    pub(crate) fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn same_core(&self, core: &CoreRef<T>) -> bool {
        Rc::ptr_eq(&self.core, core)
    }

    pub(crate) fn core_ref(&self) -> &CoreRef<T> {
        &self.core
    }

    /// The environment this event belongs to.
    pub fn env(&self) -> crate::Environment<T> {
        crate::Environment::from_core(Rc::clone(&self.core))
    }

    /// True once the event has an outcome and sits in the event heap.
    pub fn triggered(&self) -> bool {
        self.core.borrow().slots[self.id].value.is_some()
    }

    /// True once the scheduler has fired all of this event's callbacks.
    pub fn processed(&self) -> bool {
        self.core.borrow().slots[self.id].callbacks.is_none()
    }

    /// The outcome assigned at trigger time, or `None` while the event
    /// is untriggered.
    pub fn outcome(&self) -> Option<Outcome<T>> {
        self.core.borrow().slots[self.id].value.clone()
    }

    /// The event's value, if it was triggered with one.
    pub fn value(&self) -> Option<EventValue<T>> {
        self.outcome()?.ok()
    }

    /// Trigger the event with a unit value, scheduling it at the current
    /// time. Panics if the event was already triggered.
    pub fn succeed(&self) {
        self.trigger(Ok(EventValue::Unit), Priority::Normal, 0.0);
    }

    /// Trigger the event with a payload, scheduling it at the current
    /// time. Panics if the event was already triggered.
    pub fn succeed_with(&self, value: T) {
        self.trigger(Ok(EventValue::Item(value)), Priority::Normal, 0.0);
    }

    /// Fail the event, scheduling it at the current time. Unless some
    /// callback defuses it, the failure aborts the simulation loop when
    /// the event is processed. Panics if the event was already
    /// triggered.
    pub fn fail(&self, reason: impl Into<String>) {
        self.trigger(
            Err(Failure::Fault(reason.into())),
            Priority::Normal,
            0.0,
        );
    }

    /// Mark a failed event as handled, so that processing it does not
    /// abort the simulation loop.
    pub fn defuse(&self) {
        self.core.borrow_mut().slots[self.id].defused = true;
    }

    /// Append a callback to run when this event is processed. Callbacks
    /// run in insertion order and must not call back into the scheduler.
    ///
    /// Panics if the event has already been processed.
    pub fn add_callback(&self, callback: impl FnOnce(&Event<T>) + 'static) {
        self.push_callback(Box::new(callback));
    }

    /// Assign the outcome and schedule the event.
    pub(crate) fn trigger(&self, outcome: Outcome<T>, priority: Priority, delay: f64) {
        let mut core = self.core.borrow_mut();
        assert!(
            core.slots[self.id].value.is_none(),
            "the event has already been triggered"
        );
        core.slots[self.id].value = Some(outcome);
        core.push_entry(self.id, priority, delay);
    }

    pub(crate) fn set_defused(&self) {
        self.core.borrow_mut().slots[self.id].defused = true;
    }

    /// Append a callback and return a token with which it can be removed
    /// again before the event is processed.
    pub(crate) fn push_callback(&self, callback: Box<dyn FnOnce(&Event<T>)>) -> u64 {
        let mut core = self.core.borrow_mut();
        let token = core.token();
        match core.slots[self.id].callbacks.as_mut() {
            Some(callbacks) => callbacks.push((token, callback)),
            None => panic!("cannot add a callback to a processed event"),
        }
        token
    }

    pub(crate) fn remove_callback(&self, token: u64) {
        let mut core = self.core.borrow_mut();
        if let Some(callbacks) = core.slots[self.id].callbacks.as_mut() {
            callbacks.retain(|(t, _)| *t != token);
        }
    }
}

impl<T: SimValue> Clone for Event<T> {
    fn clone(&self) -> Self {
        Event {
            core: Rc::clone(&self.core),
            id: self.id,
        }
    }
}

impl<T: SimValue> PartialEq for Event<T> {
    fn eq(&self, other: &Event<T>) -> bool {
        self.id == other.id && Rc::ptr_eq(&self.core, &other.core)
    }
}

impl<T: SimValue> Eq for Event<T> {}

impl<T: SimValue> fmt::Debug for Event<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Event #{}", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EndCondition, Environment, SimError};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn an_event_moves_through_its_states_in_order() {
        let env: Environment<()> = Environment::new();
        let event = env.event();
        assert!(!event.triggered());
        assert!(!event.processed());

        event.succeed();
        assert!(event.triggered());
        assert!(!event.processed());

        env.step().unwrap();
        assert!(event.processed());
        assert_eq!(event.value(), Some(EventValue::Unit));
    }

    #[test]
    fn a_timeout_is_triggered_from_construction() {
        let env: Environment<&'static str> = Environment::new();
        let timeout = env.timeout_with(2.0, "payload");
        assert!(timeout.triggered());
        env.run(EndCondition::NoEvents).unwrap();
        assert_eq!(env.now(), 2.0);
        assert_eq!(timeout.value(), Some(EventValue::Item("payload")));
    }

    #[test]
    #[should_panic(expected = "already been triggered")]
    fn triggering_twice_panics() {
        let env: Environment<()> = Environment::new();
        let event = env.event();
        event.succeed();
        event.fail("too late");
    }

    #[test]
    #[should_panic(expected = "callback to a processed event")]
    fn adding_a_callback_to_a_processed_event_panics() {
        let env: Environment<()> = Environment::new();
        let event = env.timeout(0.0);
        env.step().unwrap();
        event.add_callback(|_| {});
    }

    #[test]
    #[should_panic(expected = "negative delay")]
    fn a_negative_delay_panics() {
        let env: Environment<()> = Environment::new();
        env.timeout(-1.0);
    }

    #[test]
    fn callbacks_fire_in_insertion_order() {
        let env: Environment<()> = Environment::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let event = env.timeout(1.0);
        for tag in ["first", "second", "third"] {
            let order = Rc::clone(&order);
            event.add_callback(move |_| order.borrow_mut().push(tag));
        }
        env.run(EndCondition::NoEvents).unwrap();
        assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn an_unhandled_failure_aborts_the_step() {
        let env: Environment<()> = Environment::new();
        let event = env.event();
        event.fail("boom");
        match env.step() {
            Err(SimError::Failure(Failure::Fault(reason))) => assert_eq!(reason, "boom"),
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    #[test]
    fn a_defused_failure_does_not_abort_the_step() {
        let env: Environment<()> = Environment::new();
        let event = env.event();
        event.fail("boom");
        event.defuse();
        env.step().unwrap();
        assert!(event.processed());
    }

    #[test]
    fn callbacks_observe_the_outcome() {
        let env: Environment<u32> = Environment::new();
        let seen = Rc::new(RefCell::new(None));
        let event = env.timeout_with(1.0, 9);
        {
            let seen = Rc::clone(&seen);
            event.add_callback(move |fired| *seen.borrow_mut() = fired.value());
        }
        env.run(EndCondition::NoEvents).unwrap();
        assert_eq!(*seen.borrow(), Some(EventValue::Item(9)));
    }
}
