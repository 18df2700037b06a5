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

//! Conditions: events derived from a set of child events.
//!
//! A condition observes its children and triggers once a predicate over
//! the number of processed children holds; `all_of` and `any_of` are the
//! two common instances, also reachable through the `&` and `|`
//! operators on events. Its value is a [`ConditionValue`]: the child
//! events that had been processed by the time the condition triggered,
//! with their values, iterated in the order the children were declared
//! regardless of their firing order. A child failure fails the
//! condition immediately with the same failure.

use std::cell::RefCell;
use std::ops::{BitAnd, BitOr};
use std::rc::Rc;

use crate::environment::{Environment, Priority};
use crate::event::{Event, EventValue};
use crate::SimValue;

/// The value of a triggered condition: an ordered mapping from child
/// event to its value.
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionValue<T: SimValue> {
    entries: Vec<(Event<T>, EventValue<T>)>,
}

impl<T: SimValue> ConditionValue<T> {
    pub(crate) fn new() -> ConditionValue<T> {
        ConditionValue {
            entries: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, event: Event<T>, value: EventValue<T>) {
        self.entries.push((event, value));
    }

    /// The value of `event`, if it contributed to this condition.
    pub fn get(&self, event: &Event<T>) -> Option<&EventValue<T>> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == event)
            .map(|(_, value)| value)
    }

    /// Iterate the entries in declared child order.
    pub fn iter(&self) -> impl Iterator<Item = &(Event<T>, EventValue<T>)> {
        self.entries.iter()
    }

    /// The contributing events, in declared child order.
    pub fn events(&self) -> impl Iterator<Item = &Event<T>> {
        self.entries.iter().map(|(event, _)| event)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Book-keeping of a pending condition, registered beside the event
/// arena so that nested conditions can be recognised when the value
/// mapping is collected.
pub(crate) struct CondRec<T: SimValue> {
    children: Vec<Event<T>>,
    state: RefCell<CondState<T>>,
}

struct CondState<T: SimValue> {
    processed: usize,
    evaluate: Box<dyn Fn(&[Event<T>], usize) -> bool>,
    /// Observer callbacks registered on not-yet-processed children,
    /// removed once the condition triggers.
    observers: Vec<(Event<T>, u64)>,
}

pub(crate) fn condition<T: SimValue>(
    env: &Environment<T>,
    children: Vec<Event<T>>,
    evaluate: Box<dyn Fn(&[Event<T>], usize) -> bool>,
) -> Event<T> {
    for child in &children {
        assert!(
            child.same_core(env.core()),
            "condition over events from a different environment"
        );
    }

    let cond = env.event();
    let rec = Rc::new(CondRec {
        children: children.clone(),
        state: RefCell::new(CondState {
            processed: 0,
            evaluate,
            observers: Vec::new(),
        }),
    });
    env.core()
        .borrow_mut()
        .conds
        .insert(cond.id(), Rc::clone(&rec));

    if children.is_empty() {
        cond.trigger(
            Ok(EventValue::Condition(ConditionValue::new())),
            Priority::Normal,
            0.0,
        );
        return cond;
    }

    for child in &children {
        if child.processed() {
            check(&cond, &rec, child);
        } else {
            let cond = cond.clone();
            let rec2 = Rc::clone(&rec);
            let token = child.push_callback(Box::new(move |fired| check(&cond, &rec2, fired)));
            rec.state.borrow_mut().observers.push((child.clone(), token));
        }
    }
    if cond.triggered() {
        // A pre-processed child already decided the condition; drop the
        // observers registered after that happened.
        remove_observers(&rec);
    }
    cond
}

/// Observer run for each processed child: record the outcome, fail the
/// condition on a child failure, otherwise re-evaluate the predicate.
fn check<T: SimValue>(cond: &Event<T>, rec: &Rc<CondRec<T>>, child: &Event<T>) {
    if cond.triggered() {
        return;
    }
    match child.outcome().expect("a processed event has an outcome") {
        Err(failure) => {
            child.set_defused();
            remove_observers(rec);
            cond.trigger(Err(failure), Priority::Normal, 0.0);
        }
        Ok(_) => {
            let holds = {
                let mut state = rec.state.borrow_mut();
                state.processed += 1;
                (state.evaluate)(&rec.children, state.processed)
            };
            if holds {
                remove_observers(rec);
                let mut value = ConditionValue::new();
                collect(rec, &mut value);
                cond.trigger(Ok(EventValue::Condition(value)), Priority::Normal, 0.0);
            }
        }
    }
}

fn remove_observers<T: SimValue>(rec: &Rc<CondRec<T>>) {
    for (child, token) in rec.state.borrow_mut().observers.drain(..) {
        child.remove_callback(token);
    }
}

/// Walk the declared children in order; nested conditions contribute
/// their own processed children recursively.
fn collect<T: SimValue>(rec: &Rc<CondRec<T>>, into: &mut ConditionValue<T>) {
    for child in &rec.children {
        let nested = child.core_ref().borrow().conds.get(&child.id()).cloned();
        if let Some(nested) = nested {
            collect(&nested, into);
        } else if child.processed() {
            if let Some(Ok(value)) = child.outcome() {
                into.push(child.clone(), value);
            }
        }
    }
}

impl<T: SimValue> BitAnd for &Event<T> {
    type Output = Event<T>;

    /// `a & b` is `all_of([a, b])`.
    fn bitand(self, rhs: &Event<T>) -> Event<T> {
        self.env().all_of(&[self.clone(), rhs.clone()])
    }
}

impl<T: SimValue> BitOr for &Event<T> {
    type Output = Event<T>;

    /// `a | b` is `any_of([a, b])`.
    fn bitor(self, rhs: &Event<T>) -> Event<T> {
        self.env().any_of(&[self.clone(), rhs.clone()])
    }
}

impl<T: SimValue> BitAnd for Event<T> {
    type Output = Event<T>;

    fn bitand(self, rhs: Event<T>) -> Event<T> {
        &self & &rhs
    }
}

impl<T: SimValue> BitOr for Event<T> {
    type Output = Event<T>;

    fn bitor(self, rhs: Event<T>) -> Event<T> {
        &self | &rhs
    }
}
