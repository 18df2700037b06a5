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

//! Typed item queues, with and without predicate filtering.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::environment::{Environment, Priority};
use crate::event::{Event, EventValue};
use crate::resources::base::{dequeue, drain, Attempt};
use crate::SimValue;

struct GetWaiter<T: SimValue> {
    event: Event<T>,
    filter: Option<Rc<dyn Fn(&T) -> bool>>,
}

struct Shared<T: SimValue> {
    env: Environment<T>,
    capacity: usize,
    items: VecDeque<T>,
    put_queue: Vec<(Event<T>, T)>,
    get_queue: Vec<GetWaiter<T>>,
    /// Whether gets carry predicates: then the whole get queue is
    /// scanned on every state change, since any waiter might match.
    filtered: bool,
}

type SharedRef<T> = Rc<RefCell<Shared<T>>>;

fn new_shared<T: SimValue>(env: &Environment<T>, capacity: usize, filtered: bool) -> SharedRef<T> {
    assert!(capacity > 0, "a store needs a capacity greater than zero");
    Rc::new(RefCell::new(Shared {
        env: env.clone(),
        capacity,
        items: VecDeque::new(),
        put_queue: Vec::new(),
        get_queue: Vec::new(),
        filtered,
    }))
}

fn put_item<T: SimValue>(shared: &SharedRef<T>, item: T) -> Event<T> {
    let event = {
        let mut state = shared.borrow_mut();
        let event = state.env.event();
        state.put_queue.push((event.clone(), item));
        event
    };
    service(shared);
    event
}

fn get_item<T: SimValue>(
    shared: &SharedRef<T>,
    filter: Option<Rc<dyn Fn(&T) -> bool>>,
) -> Event<T> {
    let event = {
        let mut state = shared.borrow_mut();
        let event = state.env.event();
        state.get_queue.push(GetWaiter {
            event: event.clone(),
            filter,
        });
        event
    };
    service(shared);
    event
}

fn cancel_op<T: SimValue>(shared: &SharedRef<T>, event: &Event<T>) {
    let mut state = shared.borrow_mut();
    dequeue(&mut state.put_queue, |(pending, _)| pending == event);
    dequeue(&mut state.get_queue, |waiter| waiter.event == *event);
}

/// Serve both queues until neither side can make progress. Puts append
/// while there is room; gets take the first (matching) item, triggering
/// with it as their payload.
fn service<T: SimValue>(shared: &SharedRef<T>) {
    let mut borrow = shared.borrow_mut();
    let state = &mut *borrow;
    loop {
        let mut puts = std::mem::take(&mut state.put_queue);
        let put_progress = drain(&mut puts, false, |(event, item)| {
            if state.items.len() < state.capacity {
                state.items.push_back(item.clone());
                event.trigger(Ok(EventValue::Unit), Priority::Normal, 0.0);
                Attempt::Progressed
            } else {
                Attempt::Stalled
            }
        });
        state.put_queue = puts;

        let mut gets = std::mem::take(&mut state.get_queue);
        let scan_all = state.filtered;
        let get_progress = drain(&mut gets, scan_all, |waiter| {
            let found = match &waiter.filter {
                None => {
                    if state.items.is_empty() {
                        None
                    } else {
                        Some(0)
                    }
                }
                Some(filter) => state.items.iter().position(|item| filter(item)),
            };
            match found {
                Some(idx) => {
                    let item = state.items.remove(idx).expect("a found item is in range");
                    waiter
                        .event
                        .trigger(Ok(EventValue::Item(item)), Priority::Normal, 0.0);
                    Attempt::Progressed
                }
                None => Attempt::Stalled,
            }
        });
        state.get_queue = gets;

        if !put_progress && !get_progress {
            break;
        }
    }
}

/// A store of items handed out first in, first out.
#[derive(Clone)]
pub struct Store<T: SimValue> {
    shared: SharedRef<T>,
}

impl<T: SimValue> Store<T> {
    /// Create a store holding at most `capacity` items; use
    /// `usize::MAX` for an effectively unbounded one. Panics if
    /// `capacity` is zero.
    pub fn new(env: &Environment<T>, capacity: usize) -> Store<T> {
        Store {
            shared: new_shared(env, capacity, false),
        }
    }

    /// Add an item. The returned event triggers once the item is in the
    /// store.
    pub fn put(&self, item: T) -> Event<T> {
        put_item(&self.shared, item)
    }

    /// Take the oldest item. The returned event triggers with the item
    /// as its payload.
    pub fn get(&self) -> Event<T> {
        get_item(&self.shared, None)
    }

    /// Withdraw a pending put or get.
    pub fn cancel(&self, event: &Event<T>) {
        cancel_op(&self.shared, event);
    }

    /// The stored items, oldest first.
    pub fn items(&self) -> Vec<T> {
        self.shared.borrow().items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.borrow().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.borrow().capacity
    }
}

/// A store whose gets pick the first item satisfying a predicate.
#[derive(Clone)]
pub struct FilterStore<T: SimValue> {
    shared: SharedRef<T>,
}

impl<T: SimValue> FilterStore<T> {
    /// Create a filtered store holding at most `capacity` items. Panics
    /// if `capacity` is zero.
    pub fn new(env: &Environment<T>, capacity: usize) -> FilterStore<T> {
        FilterStore {
            shared: new_shared(env, capacity, true),
        }
    }

    pub fn put(&self, item: T) -> Event<T> {
        put_item(&self.shared, item)
    }

    /// Take the first item, in insertion order, satisfying `filter`.
    /// The returned event triggers with the item as its payload.
    pub fn get(&self, filter: impl Fn(&T) -> bool + 'static) -> Event<T> {
        get_item(&self.shared, Some(Rc::new(filter)))
    }

    pub fn cancel(&self, event: &Event<T>) {
        cancel_op(&self.shared, event);
    }

    pub fn items(&self) -> Vec<T> {
        self.shared.borrow().items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.shared.borrow().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.borrow().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.borrow().capacity
    }
}
