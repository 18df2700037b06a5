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

//! A bulk resource holding a scalar level.

use std::cell::RefCell;
use std::rc::Rc;

use crate::environment::{Environment, Priority};
use crate::event::{Event, EventValue};
use crate::resources::base::{dequeue, drain, Attempt};
use crate::SimValue;

struct Shared<T: SimValue> {
    env: Environment<T>,
    capacity: f64,
    level: f64,
    put_queue: Vec<(Event<T>, f64)>,
    get_queue: Vec<(Event<T>, f64)>,
}

/// A resource holding a continuous amount between zero and a capacity.
///
/// `put` adds to the level once it fits under the capacity, `get`
/// subtracts once enough is available. Both sides queue first in, first
/// out, and a blocked put can be unblocked by a get and vice versa, in
/// the same simulation instant.
#[derive(Clone)]
pub struct Container<T: SimValue> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T: SimValue> Container<T> {
    /// Create a container with the given capacity and initial level.
    /// Use `f64::INFINITY` for an unbounded container. Panics unless
    /// `0 <= init <= capacity` and `capacity > 0`.
    pub fn new(env: &Environment<T>, capacity: f64, init: f64) -> Container<T> {
        assert!(capacity > 0.0, "a container needs a capacity greater than zero");
        assert!(
            (0.0..=capacity).contains(&init),
            "the initial level must lie within the capacity"
        );
        Container {
            shared: Rc::new(RefCell::new(Shared {
                env: env.clone(),
                capacity,
                level: init,
                put_queue: Vec::new(),
                get_queue: Vec::new(),
            })),
        }
    }

    /// Add `amount` to the level. The returned event triggers once the
    /// amount fits. Panics unless `amount > 0`.
    pub fn put(&self, amount: f64) -> Event<T> {
        assert!(amount > 0.0, "container amounts must be positive");
        let event = {
            let mut state = self.shared.borrow_mut();
            let event = state.env.event();
            state.put_queue.push((event.clone(), amount));
            event
        };
        service(&self.shared);
        event
    }

    /// Take `amount` from the level. The returned event triggers once
    /// enough is available. Panics unless `amount > 0`.
    pub fn get(&self, amount: f64) -> Event<T> {
        assert!(amount > 0.0, "container amounts must be positive");
        let event = {
            let mut state = self.shared.borrow_mut();
            let event = state.env.event();
            state.get_queue.push((event.clone(), amount));
            event
        };
        service(&self.shared);
        event
    }

    /// Withdraw a pending put or get.
    pub fn cancel(&self, event: &Event<T>) {
        let mut state = self.shared.borrow_mut();
        dequeue(&mut state.put_queue, |(pending, _)| pending == event);
        dequeue(&mut state.get_queue, |(pending, _)| pending == event);
    }

    pub fn level(&self) -> f64 {
        self.shared.borrow().level
    }

    pub fn capacity(&self) -> f64 {
        self.shared.borrow().capacity
    }
}

/// Serve both queues until neither side can make progress.
fn service<T: SimValue>(shared: &Rc<RefCell<Shared<T>>>) {
    let mut borrow = shared.borrow_mut();
    let state = &mut *borrow;
    loop {
        let mut puts = std::mem::take(&mut state.put_queue);
        let put_progress = drain(&mut puts, false, |(event, amount)| {
            if state.level + amount <= state.capacity {
                state.level += amount;
                event.trigger(Ok(EventValue::Unit), Priority::Normal, 0.0);
                Attempt::Progressed
            } else {
                Attempt::Stalled
            }
        });
        state.put_queue = puts;

        let mut gets = std::mem::take(&mut state.get_queue);
        let get_progress = drain(&mut gets, false, |(event, amount)| {
            if state.level >= *amount {
                state.level -= amount;
                event.trigger(Ok(EventValue::Unit), Priority::Normal, 0.0);
                Attempt::Progressed
            } else {
                Attempt::Stalled
            }
        });
        state.get_queue = gets;

        if !put_progress && !get_progress {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EndCondition;
    use std::rc::Rc;

    #[test]
    fn the_level_moves_with_puts_and_gets() {
        let env: Environment<()> = Environment::new();
        let tank = Container::new(&env, 100.0, 25.0);
        tank.put(50.0);
        assert_eq!(tank.level(), 75.0);
        tank.get(70.0);
        assert_eq!(tank.level(), 5.0);
    }

    #[test]
    fn a_get_waits_for_enough_level() {
        let env: Environment<()> = Environment::new();
        let tank = Container::new(&env, 100.0, 0.0);
        let served = Rc::new(std::cell::RefCell::new(Vec::new()));

        {
            let tank = tank.clone();
            let served = Rc::clone(&served);
            env.process(move |ctx| {
                Box::pin(async move {
                    ctx.wait(&tank.get(40.0)).await?;
                    served.borrow_mut().push(ctx.now());
                    Ok(EventValue::Unit)
                })
            });
        }
        {
            let tank = tank.clone();
            env.process(move |ctx| {
                Box::pin(async move {
                    ctx.wait(&ctx.timeout(2.0)).await?;
                    ctx.wait(&tank.put(25.0)).await?;
                    ctx.wait(&ctx.timeout(2.0)).await?;
                    ctx.wait(&tank.put(25.0)).await?;
                    Ok(EventValue::Unit)
                })
            });
        }

        env.run(EndCondition::NoEvents).unwrap();
        // The first put alone is not enough; the second one is.
        assert_eq!(*served.borrow(), vec![4.0]);
        assert_eq!(tank.level(), 10.0);
    }

    #[test]
    fn a_put_waits_for_room_and_a_get_makes_room() {
        let env: Environment<()> = Environment::new();
        let tank = Container::new(&env, 10.0, 8.0);
        let put = tank.put(5.0);
        assert!(!put.triggered());
        assert_eq!(tank.level(), 8.0);

        tank.get(4.0);
        // The get makes room, the pending put lands in the same instant.
        assert!(put.triggered());
        assert_eq!(tank.level(), 9.0);
    }

    #[test]
    fn puts_and_gets_are_served_in_arrival_order() {
        let env: Environment<()> = Environment::new();
        let tank = Container::new(&env, 100.0, 0.0);
        let first = tank.get(30.0);
        let second = tank.get(10.0);
        tank.put(20.0);
        // The head get needs 30, so the smaller one behind it waits too.
        assert!(!first.triggered());
        assert!(!second.triggered());
        tank.put(20.0);
        assert!(first.triggered());
        assert!(second.triggered());
        assert_eq!(tank.level(), 0.0);
    }

    #[test]
    fn a_cancelled_get_stops_blocking_the_queue() {
        let env: Environment<()> = Environment::new();
        let tank = Container::new(&env, 100.0, 0.0);
        let big = tank.get(90.0);
        let small = tank.get(5.0);
        tank.put(10.0);
        assert!(!small.triggered());
        tank.cancel(&big);
        tank.put(1.0);
        assert!(small.triggered());
        assert!(!big.triggered());
    }

    #[test]
    #[should_panic(expected = "must be positive")]
    fn non_positive_amounts_panic() {
        let env: Environment<()> = Environment::new();
        let tank = Container::new(&env, 10.0, 0.0);
        tank.get(0.0);
    }

    #[test]
    #[should_panic(expected = "within the capacity")]
    fn an_overfull_initial_level_panics() {
        let env: Environment<()> = Environment::new();
        Container::new(&env, 10.0, 11.0);
    }
}
