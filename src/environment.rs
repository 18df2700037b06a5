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

//! The simulation environment: virtual time, the event heap and the loop
//! that drives both.
//!
//! An [`Environment`] owns every [`Event`] created through it and decides
//! in which order triggered events are processed. The order is total:
//! first by time, then by [`Priority`], then by the insertion sequence
//! number, so that two events scheduled for the same instant at the same
//! priority fire in the order they were scheduled.

use std::cell::RefCell;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::rc::Rc;

use log::trace;
use thiserror::Error;

use crate::condition::{self, CondRec};
use crate::event::{Event, EventValue, Failure, Outcome};
use crate::process::{self, ProcRec, Process, SimContext, SimFuture};
use crate::SimValue;

/// Scheduling priority of an event. Smaller values are more urgent.
///
/// `Urgent` is reserved by the engine for process initialization and
/// interrupt delivery; everything else, timeouts included, is scheduled
/// `Normal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Urgent = 0,
    Normal = 1,
}

/// An entry of the event heap. Entries compare by `(time, priority, seq)`.
struct Entry {
    time: f64,
    priority: Priority,
    seq: u64,
    id: usize,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Entry) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Entry) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Entry) -> Ordering {
        match self.time.partial_cmp(&other.time) {
            Some(ord) => ord
                .then_with(|| self.priority.cmp(&other.priority))
                .then_with(|| self.seq.cmp(&other.seq)),
            None => panic!("Event time was uncomparable. Maybe a NaN"),
        }
    }
}

type Callback<T> = Box<dyn FnOnce(&Event<T>)>;

/// Storage of a single event: its outcome once triggered, its callback
/// list until processed, and the defuse flag for failures.
pub(crate) struct Slot<T: SimValue> {
    pub(crate) value: Option<Outcome<T>>,
    pub(crate) callbacks: Option<Vec<(u64, Callback<T>)>>,
    pub(crate) defused: bool,
}

/// The mutable state shared by an [`Environment`] and every handle
/// derived from it.
pub(crate) struct Core<T: SimValue> {
    now: f64,
    seq: u64,
    tokens: u64,
    heap: BinaryHeap<Reverse<Entry>>,
    pub(crate) slots: Vec<Slot<T>>,
    pub(crate) procs: HashMap<usize, ProcRec<T>>,
    pub(crate) conds: HashMap<usize, Rc<CondRec<T>>>,
    pub(crate) active: Option<usize>,
    stepping: bool,
}

pub(crate) type CoreRef<T> = Rc<RefCell<Core<T>>>;

impl<T: SimValue> Core<T> {
    pub(crate) fn alloc(&mut self) -> usize {
        let id = self.slots.len();
        self.slots.push(Slot {
            value: None,
            callbacks: Some(Vec::new()),
            defused: false,
        });
        id
    }

    pub(crate) fn token(&mut self) -> u64 {
        self.tokens += 1;
        self.tokens
    }

    /// Push a heap entry for an already triggered event.
    pub(crate) fn push_entry(&mut self, id: usize, priority: Priority, delay: f64) {
        assert!(delay >= 0.0, "negative delay: {delay}");
        self.seq += 1;
        self.heap.push(Reverse(Entry {
            time: self.now + delay,
            priority,
            seq: self.seq,
            id,
        }));
    }
}

/// Specify which condition must be met for the simulation to stop.
pub enum EndCondition<T: SimValue> {
    /// Run the simulation until there are no more events scheduled.
    NoEvents,
    /// Run the simulation until a certain point in time is reached.
    ///
    /// Events scheduled for exactly that time before the call fire;
    /// events scheduled for it during the run do not. On return the
    /// current time is exactly the requested one.
    Time(f64),
    /// Run the simulation until the given event has been processed.
    Event(Event<T>),
    /// Execute exactly N steps of the simulation.
    NSteps(usize),
}

/// Everything that can abort the simulation loop.
#[derive(Debug, Clone, Error)]
pub enum SimError<T: SimValue> {
    /// `step()` was called with nothing left in the event heap.
    #[error("no scheduled events left to process")]
    EmptySchedule,
    /// `run(EndCondition::Event(..))` ran out of events before the
    /// awaited event was processed.
    #[error("ran out of events before the awaited event was processed")]
    Stalled,
    /// An event failed and no callback defused the failure.
    #[error("unhandled failure: {0}")]
    Failure(Failure<T>),
    /// A real-time step missed its wall-clock deadline in strict mode.
    #[error("simulation too slow for real time, behind by {behind} seconds")]
    TooSlow { behind: f64 },
}

/// This struct provides the methods to create and run the simulation
/// in a single thread.
///
/// It is a cheap handle: clones share the same virtual clock, event heap
/// and event storage. All factory methods for events, timeouts,
/// processes and conditions live here; resources take an `Environment`
/// at construction instead.
///
/// See the crate-level documentation for more information about how the
/// simulation framework works.
#[derive(Clone)]
pub struct Environment<T: SimValue> {
    core: CoreRef<T>,
}

impl<T: SimValue> Environment<T> {
    /// Create a new `Environment` starting at time zero.
    pub fn new() -> Environment<T> {
        Environment::starting_at(0.0)
    }

    /// Create a new `Environment` with the given initial time.
    pub fn starting_at(now: f64) -> Environment<T> {
        Environment {
            core: Rc::new(RefCell::new(Core {
                now,
                seq: 0,
                tokens: 0,
                heap: BinaryHeap::new(),
                slots: Vec::new(),
                procs: HashMap::new(),
                conds: HashMap::new(),
                active: None,
                stepping: false,
            })),
        }
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> f64 {
        self.core.borrow().now
    }

    /// The process whose routine is currently executing, if any.
    pub fn active_process(&self) -> Option<Process<T>> {
        let id = self.core.borrow().active?;
        Some(Process::from_event(Event::from_parts(
            Rc::clone(&self.core),
            id,
        )))
    }

    /// Create a new, untriggered event.
    pub fn event(&self) -> Event<T> {
        let id = self.core.borrow_mut().alloc();
        Event::from_parts(Rc::clone(&self.core), id)
    }

    /// Create an event that triggers itself, without a payload, `delay`
    /// time units from now. The event is already triggered on return.
    pub fn timeout(&self, delay: f64) -> Event<T> {
        let event = self.event();
        event.trigger(Ok(EventValue::Unit), Priority::Normal, delay);
        event
    }

    /// Like [`timeout`](Environment::timeout), but the event carries
    /// `value` as its payload.
    pub fn timeout_with(&self, delay: f64, value: T) -> Event<T> {
        let event = self.event();
        event.trigger(Ok(EventValue::Item(value)), Priority::Normal, delay);
        event
    }

    /// Create a process from a routine.
    ///
    /// The routine receives a [`SimContext`] and returns a boxed future;
    /// the first step of the process is scheduled at the current time
    /// with urgent priority. For more information about a process, see
    /// the crate level documentation.
    pub fn process<F>(&self, routine: F) -> Process<T>
    where
        F: FnOnce(SimContext<T>) -> SimFuture<T>,
    {
        process::spawn(self, routine)
    }

    /// An event that triggers once every one of `events` has been
    /// processed, or fails as soon as one of them fails.
    pub fn all_of(&self, events: &[Event<T>]) -> Event<T> {
        self.condition(events.to_vec(), |children, processed| {
            processed == children.len()
        })
    }

    /// An event that triggers as soon as one of `events` has been
    /// processed, or fails as soon as one of them fails.
    pub fn any_of(&self, events: &[Event<T>]) -> Event<T> {
        self.condition(events.to_vec(), |_children, processed| processed > 0)
    }

    /// The general form of [`all_of`](Environment::all_of) and
    /// [`any_of`](Environment::any_of): the condition triggers when
    /// `evaluate(children, processed_count)` returns true.
    pub fn condition<F>(&self, children: Vec<Event<T>>, evaluate: F) -> Event<T>
    where
        F: Fn(&[Event<T>], usize) -> bool + 'static,
    {
        condition::condition(self, children, Box::new(evaluate))
    }

    /// Trigger `event` with a unit value `delay` time units from now at
    /// the given priority.
    ///
    /// This is the low level scheduling primitive; an event is scheduled
    /// exactly once, when it is triggered, so calling this on an already
    /// triggered event panics.
    pub fn schedule(&self, event: &Event<T>, priority: Priority, delay: f64) {
        assert!(
            event.same_core(&self.core),
            "event belongs to a different environment"
        );
        event.trigger(Ok(EventValue::Unit), priority, delay);
    }

    /// The time of the next scheduled event, or `f64::INFINITY` if the
    /// heap is empty.
    pub fn peek(&self) -> f64 {
        self.core
            .borrow()
            .heap
            .peek()
            .map(|Reverse(entry)| entry.time)
            .unwrap_or(f64::INFINITY)
    }

    /// Proceed in the simulation by one step: pop the smallest entry,
    /// advance the clock, mark the event processed and run its callbacks
    /// in insertion order.
    ///
    /// A failure that no callback defused is returned as
    /// [`SimError::Failure`]; an empty heap as
    /// [`SimError::EmptySchedule`]. This is the single extensibility
    /// point for alternative drivers such as
    /// [`RealtimeEnvironment`](crate::rt::RealtimeEnvironment).
    pub fn step(&self) -> Result<(), SimError<T>> {
        let (id, callbacks) = {
            let mut core = self.core.borrow_mut();
            assert!(!core.stepping, "step() called from inside a callback");
            let Reverse(entry) = match core.heap.pop() {
                Some(entry) => entry,
                None => return Err(SimError::EmptySchedule),
            };
            trace!("t={} processing event #{}", entry.time, entry.id);
            core.now = entry.time;
            core.stepping = true;
            let callbacks = core.slots[entry.id]
                .callbacks
                .take()
                .expect("a scheduled event was already processed");
            (entry.id, callbacks)
        };
        let event = Event::from_parts(Rc::clone(&self.core), id);
        for (_, callback) in callbacks {
            callback(&event);
        }
        let mut core = self.core.borrow_mut();
        core.stepping = false;
        let slot = &core.slots[id];
        match &slot.value {
            Some(Err(failure)) if !slot.defused => Err(SimError::Failure(failure.clone())),
            _ => Ok(()),
        }
    }

    /// Run the simulation until an ending condition is met.
    ///
    /// With `EndCondition::Event` the processed event's value is
    /// returned, or its failure re-raised as [`SimError::Failure`]; the
    /// other conditions return [`EventValue::Unit`].
    pub fn run(&self, until: EndCondition<T>) -> Result<EventValue<T>, SimError<T>> {
        match until {
            EndCondition::NoEvents => {
                while self.peek().is_finite() {
                    self.step()?;
                }
                Ok(EventValue::Unit)
            }
            EndCondition::NSteps(n) => {
                for _ in 0..n {
                    self.step()?;
                }
                Ok(EventValue::Unit)
            }
            EndCondition::Time(at) => {
                let now = self.now();
                assert!(
                    at > now,
                    "cannot run until {at}, which is not after the current time {now}"
                );
                let stop = self.event();
                self.schedule(&stop, Priority::Normal, at - now);
                while !stop.processed() {
                    self.step()?;
                }
                Ok(EventValue::Unit)
            }
            EndCondition::Event(event) => {
                assert!(
                    event.same_core(&self.core),
                    "event belongs to a different environment"
                );
                assert!(
                    !event.processed(),
                    "the awaited event has already been processed"
                );
                while !event.processed() {
                    match self.step() {
                        Err(SimError::EmptySchedule) => return Err(SimError::Stalled),
                        other => other?,
                    }
                }
                match event.outcome().expect("a processed event has an outcome") {
                    Ok(value) => Ok(value),
                    Err(failure) => Err(SimError::Failure(failure)),
                }
            }
        }
    }

    pub(crate) fn core(&self) -> &CoreRef<T> {
        &self.core
    }

    pub(crate) fn from_core(core: CoreRef<T>) -> Environment<T> {
        Environment { core }
    }
}

impl<T: SimValue> Default for Environment<T> {
    fn default() -> Self {
        Environment::new()
    }
}

impl<T: SimValue> fmt::Debug for Environment<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("now", &self.now())
            .finish()
    }
}
