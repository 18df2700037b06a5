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

//! Capacity resources: semaphores with a fixed number of slots.
//!
//! A [`Resource`] serves requests strictly first come, first served. A
//! [`PriorityResource`] orders its queue by `(priority, request time,
//! arrival)`, smaller priorities first. A [`PreemptiveResource`]
//! additionally lets a request with `preempt` evict the worst-off
//! current user when every slot is taken and the request outranks that
//! user; the evicted process receives a
//! [`Failure::Preempted`](crate::Failure::Preempted) interrupt carrying
//! who evicted it and since when it had been holding its slot. A
//! preempting request still sits in the queue like any other, so it
//! cannot overtake a better queued waiter: the queue head is served
//! first, and a stalled head blocks everything behind it.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::ops::Deref;
use std::rc::Rc;

use log::debug;

use crate::environment::{Environment, Priority};
use crate::event::{Event, EventValue, Failure, Preempted};
use crate::process::{self, Process};
use crate::resources::base::{dequeue, drain, Attempt};
use crate::SimValue;

/// Queue ordering key of a request.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
struct Key {
    priority: i64,
    time: f64,
    seq: u64,
}

fn key_gt(a: &Key, b: &Key) -> bool {
    a.partial_cmp(b)
        .expect("request keys are always comparable")
        == Ordering::Greater
}

struct Waiter<T: SimValue> {
    event: Event<T>,
    key: Key,
    preempt: bool,
    proc: Option<Process<T>>,
}

struct Grant<T: SimValue> {
    event: Event<T>,
    key: Key,
    proc: Option<Process<T>>,
    usage_since: f64,
}

struct Shared<T: SimValue> {
    env: Environment<T>,
    capacity: usize,
    users: Vec<Grant<T>>,
    queue: Vec<Waiter<T>>,
    seq: u64,
}

type SharedRef<T> = Rc<RefCell<Shared<T>>>;

/// A pending or granted resource request.
///
/// Dereferences to the underlying [`Event`], which triggers when the
/// slot is granted. A request that is abandoned while still queued must
/// be cancelled through the resource; a granted one is returned with
/// `release`.
pub struct Request<T: SimValue> {
    event: Event<T>,
}

impl<T: SimValue> Deref for Request<T> {
    type Target = Event<T>;

    fn deref(&self) -> &Event<T> {
        &self.event
    }
}

impl<T: SimValue> Clone for Request<T> {
    fn clone(&self) -> Self {
        Request {
            event: self.event.clone(),
        }
    }
}

impl<T: SimValue> PartialEq for Request<T> {
    fn eq(&self, other: &Request<T>) -> bool {
        self.event == other.event
    }
}

impl<T: SimValue> Eq for Request<T> {}

impl<T: SimValue> std::fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Request({:?})", self.event)
    }
}

fn new_shared<T: SimValue>(env: &Environment<T>, capacity: usize) -> SharedRef<T> {
    assert!(capacity > 0, "a resource needs a capacity greater than zero");
    Rc::new(RefCell::new(Shared {
        env: env.clone(),
        capacity,
        users: Vec::new(),
        queue: Vec::new(),
        seq: 0,
    }))
}

/// Enqueue a new request in key order and serve the queue.
fn acquire<T: SimValue>(shared: &SharedRef<T>, priority: i64, preempt: bool) -> Request<T> {
    let event = {
        let mut state = shared.borrow_mut();
        let env = state.env.clone();
        let event = env.event();
        state.seq += 1;
        let key = Key {
            priority,
            time: env.now(),
            seq: state.seq,
        };
        let pos = state.queue.partition_point(|w| !key_gt(&w.key, &key));
        state.queue.insert(
            pos,
            Waiter {
                event: event.clone(),
                key,
                preempt,
                proc: env.active_process(),
            },
        );
        event
    };
    service(shared);
    Request { event }
}

/// Hand back a granted slot; the returned event is already triggered.
fn free<T: SimValue>(shared: &SharedRef<T>, request: &Request<T>) -> Event<T> {
    let release = {
        let mut state = shared.borrow_mut();
        // The grant may be gone already if the holder was preempted.
        dequeue(&mut state.users, |grant| grant.event == request.event);
        state.env.event()
    };
    release.trigger(Ok(EventValue::Unit), Priority::Normal, 0.0);
    service(shared);
    release
}

fn abandon<T: SimValue>(shared: &SharedRef<T>, request: &Request<T>) {
    let mut state = shared.borrow_mut();
    dequeue(&mut state.queue, |waiter| waiter.event == request.event);
}

/// Serve the queue: admit waiters while slots are free, preempting the
/// worst user where the head request asks for and deserves it, and stop
/// at the first waiter that cannot be admitted.
fn service<T: SimValue>(shared: &SharedRef<T>) {
    let mut borrow = shared.borrow_mut();
    let state = &mut *borrow;
    let mut queue = std::mem::take(&mut state.queue);
    drain(&mut queue, false, |waiter| {
        if state.users.len() >= state.capacity && waiter.preempt {
            if let Some(worst) = worst_user(&state.users) {
                if key_gt(&state.users[worst].key, &waiter.key) {
                    let victim = state.users.remove(worst);
                    debug!(
                        "{:?} preempted, slot held since {}",
                        victim.event, victim.usage_since
                    );
                    if let Some(proc) = victim.proc {
                        process::deliver(
                            &proc,
                            Failure::Preempted(Preempted {
                                by: waiter.proc.clone(),
                                usage_since: victim.usage_since,
                            }),
                        );
                    }
                }
            }
        }
        if state.users.len() < state.capacity {
            state.users.push(Grant {
                event: waiter.event.clone(),
                key: waiter.key,
                proc: waiter.proc.clone(),
                usage_since: state.env.now(),
            });
            waiter
                .event
                .trigger(Ok(EventValue::Unit), Priority::Normal, 0.0);
            Attempt::Progressed
        } else {
            Attempt::Stalled
        }
    });
    state.queue = queue;
}

fn worst_user<T: SimValue>(users: &[Grant<T>]) -> Option<usize> {
    let mut worst: Option<usize> = None;
    for (idx, grant) in users.iter().enumerate() {
        match worst {
            Some(w) if !key_gt(&grant.key, &users[w].key) => {}
            _ => worst = Some(idx),
        }
    }
    worst
}

fn users_of<T: SimValue>(shared: &SharedRef<T>) -> Vec<Request<T>> {
    shared
        .borrow()
        .users
        .iter()
        .map(|grant| Request {
            event: grant.event.clone(),
        })
        .collect()
}

fn queue_of<T: SimValue>(shared: &SharedRef<T>) -> Vec<Request<T>> {
    shared
        .borrow()
        .queue
        .iter()
        .map(|waiter| Request {
            event: waiter.event.clone(),
        })
        .collect()
}

/// A semaphore with `capacity` slots, served first come, first served.
#[derive(Clone)]
pub struct Resource<T: SimValue> {
    shared: SharedRef<T>,
}

impl<T: SimValue> Resource<T> {
    /// Create a resource with the given number of slots. Panics if
    /// `capacity` is zero.
    pub fn new(env: &Environment<T>, capacity: usize) -> Resource<T> {
        Resource {
            shared: new_shared(env, capacity),
        }
    }

    /// Request a slot. The returned request triggers once a slot is
    /// granted.
    pub fn request(&self) -> Request<T> {
        acquire(&self.shared, 0, false)
    }

    /// Give a granted slot back, admitting the next waiter in the same
    /// instant. The returned event is already triggered.
    pub fn release(&self, request: &Request<T>) -> Event<T> {
        free(&self.shared, request)
    }

    /// Withdraw a request that is still waiting in the queue.
    pub fn cancel(&self, request: &Request<T>) {
        abandon(&self.shared, request);
    }

    /// Number of slots currently in use.
    pub fn count(&self) -> usize {
        self.shared.borrow().users.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.borrow().capacity
    }

    /// Current users, in admission order.
    pub fn users(&self) -> Vec<Request<T>> {
        users_of(&self.shared)
    }

    /// Waiting requests, in service order.
    pub fn queue(&self) -> Vec<Request<T>> {
        queue_of(&self.shared)
    }
}

/// A semaphore whose queue is served by priority (smaller first), then
/// request time, then arrival order.
#[derive(Clone)]
pub struct PriorityResource<T: SimValue> {
    shared: SharedRef<T>,
}

impl<T: SimValue> PriorityResource<T> {
    /// Create a resource with the given number of slots. Panics if
    /// `capacity` is zero.
    pub fn new(env: &Environment<T>, capacity: usize) -> PriorityResource<T> {
        PriorityResource {
            shared: new_shared(env, capacity),
        }
    }

    /// Request a slot with a priority; smaller values are served first.
    pub fn request(&self, priority: i64) -> Request<T> {
        acquire(&self.shared, priority, false)
    }

    pub fn release(&self, request: &Request<T>) -> Event<T> {
        free(&self.shared, request)
    }

    pub fn cancel(&self, request: &Request<T>) {
        abandon(&self.shared, request);
    }

    pub fn count(&self) -> usize {
        self.shared.borrow().users.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.borrow().capacity
    }

    pub fn users(&self) -> Vec<Request<T>> {
        users_of(&self.shared)
    }

    pub fn queue(&self) -> Vec<Request<T>> {
        queue_of(&self.shared)
    }
}

/// A [`PriorityResource`] whose requests may evict a worse-off user
/// when the resource is full.
#[derive(Clone)]
pub struct PreemptiveResource<T: SimValue> {
    shared: SharedRef<T>,
}

impl<T: SimValue> PreemptiveResource<T> {
    /// Create a resource with the given number of slots. Panics if
    /// `capacity` is zero.
    pub fn new(env: &Environment<T>, capacity: usize) -> PreemptiveResource<T> {
        PreemptiveResource {
            shared: new_shared(env, capacity),
        }
    }

    /// Request a slot with a priority. With `preempt`, a full resource
    /// whose worst user ranks strictly below this request evicts that
    /// user; without it, the request just queues.
    pub fn request(&self, priority: i64, preempt: bool) -> Request<T> {
        acquire(&self.shared, priority, preempt)
    }

    pub fn release(&self, request: &Request<T>) -> Event<T> {
        free(&self.shared, request)
    }

    pub fn cancel(&self, request: &Request<T>) {
        abandon(&self.shared, request);
    }

    pub fn count(&self) -> usize {
        self.shared.borrow().users.len()
    }

    pub fn capacity(&self) -> usize {
        self.shared.borrow().capacity
    }

    pub fn users(&self) -> Vec<Request<T>> {
        users_of(&self.shared)
    }

    pub fn queue(&self) -> Vec<Request<T>> {
        queue_of(&self.shared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::EndCondition;
    use std::cell::RefCell;
    use std::rc::Rc;

    type Trace = Rc<RefCell<Vec<(&'static str, f64)>>>;

    #[test]
    fn slots_are_granted_up_to_capacity_and_then_queued() {
        let env: Environment<()> = Environment::new();
        let res = Resource::new(&env, 2);

        let first = res.request();
        let second = res.request();
        let third = res.request();
        env.run(EndCondition::NSteps(2)).unwrap();

        assert!(first.processed());
        assert!(second.processed());
        assert!(!third.triggered());
        assert_eq!(res.count(), 2);
        assert_eq!(res.queue().len(), 1);
        assert!(res.count() <= res.capacity());
    }

    #[test]
    fn releasing_hands_the_slot_over_in_the_same_instant() {
        let env: Environment<()> = Environment::new();
        let res = Resource::new(&env, 1);
        let granted_at: Trace = Rc::new(RefCell::new(Vec::new()));

        {
            let res = res.clone();
            let granted_at = Rc::clone(&granted_at);
            env.process(move |ctx| {
                Box::pin(async move {
                    let req = res.request();
                    ctx.wait(&req).await?;
                    granted_at.borrow_mut().push(("holder", ctx.now()));
                    ctx.wait(&ctx.timeout(4.0)).await?;
                    res.release(&req);
                    Ok(EventValue::Unit)
                })
            });
        }
        {
            let res = res.clone();
            let granted_at = Rc::clone(&granted_at);
            env.process(move |ctx| {
                Box::pin(async move {
                    ctx.wait(&ctx.timeout(1.0)).await?;
                    let req = res.request();
                    ctx.wait(&req).await?;
                    granted_at.borrow_mut().push(("waiter", ctx.now()));
                    res.release(&req);
                    Ok(EventValue::Unit)
                })
            });
        }

        env.run(EndCondition::NoEvents).unwrap();
        assert_eq!(*granted_at.borrow(), vec![("holder", 0.0), ("waiter", 4.0)]);
        assert_eq!(res.count(), 0);
    }

    #[test]
    fn a_cancelled_request_leaves_the_queue() {
        let env: Environment<()> = Environment::new();
        let res = Resource::new(&env, 1);

        let holder = res.request();
        let queued = res.request();
        env.run(EndCondition::NSteps(1)).unwrap();
        assert_eq!(res.queue().len(), 1);

        res.cancel(&queued);
        assert_eq!(res.queue().len(), 0);
        // The slot still changes hands correctly afterwards.
        let next = res.request();
        res.release(&holder);
        env.run(EndCondition::NoEvents).unwrap();
        assert!(next.processed());
        assert!(!queued.triggered());
    }

    #[test]
    fn priorities_outrank_arrival_order() {
        let env: Environment<()> = Environment::new();
        let res = PriorityResource::new(&env, 1);

        let holder = res.request(0);
        let low = res.request(5);
        let high = res.request(1);
        env.run(EndCondition::NSteps(1)).unwrap();

        let queue = res.queue();
        assert_eq!(queue, vec![Request { event: (*high).clone() }, Request { event: (*low).clone() }]);
        res.release(&holder);
        env.run(EndCondition::NoEvents).unwrap();
        assert!(high.processed());
        assert_eq!(res.users()[0], Request { event: (*high).clone() });
        assert!(!low.triggered());
    }

    #[test]
    fn equal_priorities_are_served_in_arrival_order() {
        let env: Environment<()> = Environment::new();
        let res = PriorityResource::new(&env, 1);

        let holder = res.request(0);
        let first = res.request(3);
        let second = res.request(3);
        env.run(EndCondition::NSteps(1)).unwrap();

        res.release(&holder);
        env.run(EndCondition::NoEvents).unwrap();
        assert!(first.processed());
        assert!(!second.triggered());
    }

    #[test]
    fn a_preempting_request_evicts_the_worst_user() {
        let env: Environment<&'static str> = Environment::new();
        let res = PreemptiveResource::new(&env, 1);
        let evicted: Trace = Rc::new(RefCell::new(Vec::new()));

        {
            let res = res.clone();
            let evicted = Rc::clone(&evicted);
            env.process(move |ctx| {
                Box::pin(async move {
                    let req = res.request(0, true);
                    ctx.wait(&req).await?;
                    match ctx.wait(&ctx.timeout(10.0)).await {
                        Err(Failure::Preempted(info)) => {
                            assert_eq!(info.usage_since, 0.0);
                            assert!(info.by.is_some());
                            evicted.borrow_mut().push(("evicted", ctx.now()));
                        }
                        other => panic!("expected preemption, got {other:?}"),
                    }
                    Ok(EventValue::Unit)
                })
            });
        }
        {
            let res = res.clone();
            env.process(move |ctx| {
                Box::pin(async move {
                    ctx.wait(&ctx.timeout(2.0)).await?;
                    let req = res.request(-1, true);
                    ctx.wait(&req).await?;
                    ctx.wait(&ctx.timeout(1.0)).await?;
                    res.release(&req);
                    Ok(EventValue::Unit)
                })
            });
        }

        env.run(EndCondition::NoEvents).unwrap();
        assert_eq!(*evicted.borrow(), vec![("evicted", 2.0)]);
    }

    #[test]
    fn a_stalled_queue_head_blocks_preempting_waiters_behind_it() {
        let env: Environment<()> = Environment::new();
        let res = PreemptiveResource::new(&env, 1);

        let holder = res.request(0, true);
        env.run(EndCondition::NSteps(1)).unwrap();
        let head = res.request(-2, false);
        let behind = res.request(-1, true);
        // `behind` could evict the holder, but `head` outranks it and is
        // served first; a stalled head stops the sweep.
        assert!(!head.triggered());
        assert!(!behind.triggered());
        assert_eq!(res.count(), 1);
        assert_eq!(res.users()[0], Request { event: (*holder).clone() });
    }

    #[test]
    #[should_panic(expected = "capacity greater than zero")]
    fn zero_capacity_panics() {
        let env: Environment<()> = Environment::new();
        Resource::new(&env, 0);
    }
}
