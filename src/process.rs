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

//! Processes: events driven by a suspendable routine.
//!
//! A process routine is an `async` block that models an activity. It
//! advances the simulation by waiting on events through its
//! [`SimContext`]:
//!
//! ```
//! use eventsim::prelude::*;
//!
//! let env: Environment<()> = Environment::new();
//! env.process(|ctx| Box::pin(async move {
//!     // drive for two time units, then stop
//!     ctx.wait(&ctx.timeout(2.0)).await?;
//!     Ok(EventValue::Unit)
//! }));
//! env.run(EndCondition::NoEvents).unwrap();
//! assert_eq!(env.now(), 2.0);
//! ```
//!
//! The engine polls the routine exactly once per resumption: a routine
//! runs to its next [`SimContext::wait`] point atomically with respect
//! to every other process, and the awaited event's outcome is what the
//! `await` returns. A process is itself an [`Event`] that triggers with
//! the routine's return value, or fails with the failure it returns, so
//! waiting on a process observes its termination.

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use log::debug;

use crate::environment::{Environment, Priority};
use crate::event::{Event, Failure, Outcome};
use crate::SimValue;

/// The boxed future a process routine produces.
pub type SimFuture<T> = Pin<Box<dyn Future<Output = Outcome<T>>>>;

/// Slots shared between a process record and the wait futures its
/// routine creates.
pub(crate) struct ProcShared<T: SimValue> {
    /// Outcome to hand to the routine at its suspension point.
    inject: RefCell<Option<Outcome<T>>>,
    /// Event announced by the routine when it suspends.
    waiting: RefCell<Option<Event<T>>>,
}

impl<T: SimValue> ProcShared<T> {
    fn new() -> ProcShared<T> {
        ProcShared {
            inject: RefCell::new(None),
            waiting: RefCell::new(None),
        }
    }
}

/// Book-keeping of a live process, stored next to the event arena.
pub(crate) struct ProcRec<T: SimValue> {
    routine: Option<SimFuture<T>>,
    shared: Rc<ProcShared<T>>,
    /// The event the process is waiting on, with the token of its resume
    /// callback there.
    target: Option<(Event<T>, u64)>,
}

/// Handle to a running (or terminated) process.
///
/// Dereferences to the underlying [`Event`], which triggers when the
/// routine terminates.
pub struct Process<T: SimValue> {
    event: Event<T>,
}

impl<T: SimValue> Process<T> {
    pub(crate) fn from_event(event: Event<T>) -> Process<T> {
        Process { event }
    }

    /// The process event itself.
    pub fn as_event(&self) -> &Event<T> {
        &self.event
    }

    /// True until the routine has terminated.
    pub fn is_alive(&self) -> bool {
        !self.event.triggered()
    }

    /// Interrupt the process without a cause.
    ///
    /// The interrupt is delivered as a [`Failure::Interrupt`] at the
    /// routine's current suspension point, at the current time and ahead
    /// of ordinary events scheduled for it. The routine may handle the
    /// failure and keep running. Panics if the process has already
    /// terminated, or when a process tries to interrupt itself.
    pub fn interrupt(&self) {
        deliver(self, Failure::Interrupt(None));
    }

    /// Like [`interrupt`](Process::interrupt), carrying a cause.
    pub fn interrupt_with(&self, cause: T) {
        deliver(self, Failure::Interrupt(Some(cause)));
    }
}

impl<T: SimValue> Deref for Process<T> {
    type Target = Event<T>;

    fn deref(&self) -> &Event<T> {
        &self.event
    }
}

impl<T: SimValue> Clone for Process<T> {
    fn clone(&self) -> Self {
        Process {
            event: self.event.clone(),
        }
    }
}

impl<T: SimValue> PartialEq for Process<T> {
    fn eq(&self, other: &Process<T>) -> bool {
        self.event == other.event
    }
}

impl<T: SimValue> Eq for Process<T> {}

impl<T: SimValue> fmt::Debug for Process<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process({:?})", self.event)
    }
}

/// The argument handed to a process routine: a handle on the
/// environment plus the machinery to suspend on events.
#[derive(Clone)]
pub struct SimContext<T: SimValue> {
    env: Environment<T>,
    shared: Rc<ProcShared<T>>,
}

impl<T: SimValue> SimContext<T> {
    /// The environment this process runs in.
    pub fn env(&self) -> &Environment<T> {
        &self.env
    }

    /// Returns the current simulation time.
    pub fn now(&self) -> f64 {
        self.env.now()
    }

    /// Create a new, untriggered event.
    pub fn event(&self) -> Event<T> {
        self.env.event()
    }

    /// An event triggering `delay` time units from now.
    pub fn timeout(&self, delay: f64) -> Event<T> {
        self.env.timeout(delay)
    }

    /// An event triggering `delay` time units from now, with a payload.
    pub fn timeout_with(&self, delay: f64, value: T) -> Event<T> {
        self.env.timeout_with(delay, value)
    }

    /// Suspend the routine until `event` is processed; the `await`
    /// returns the event's outcome.
    ///
    /// Waiting on an already processed event panics: its outcome is
    /// available directly, so waiting for it would be a lost wake-up.
    pub fn wait(&self, event: &Event<T>) -> Wait<T> {
        Wait {
            shared: Rc::clone(&self.shared),
            event: event.clone(),
            announced: false,
        }
    }
}

/// Future returned by [`SimContext::wait`].
pub struct Wait<T: SimValue> {
    shared: Rc<ProcShared<T>>,
    event: Event<T>,
    announced: bool,
}

impl<T: SimValue> Future for Wait<T> {
    type Output = Outcome<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Outcome<T>> {
        let this = self.get_mut();
        if let Some(outcome) = this.shared.inject.borrow_mut().take() {
            return Poll::Ready(outcome);
        }
        if !this.announced {
            assert!(
                !this.event.processed(),
                "cannot wait for an already processed event"
            );
            *this.shared.waiting.borrow_mut() = Some(this.event.clone());
            this.announced = true;
        }
        Poll::Pending
    }
}

/// Create the process event, run the routine to build its future and
/// schedule the urgent initialization event that performs the first
/// step.
pub(crate) fn spawn<T, F>(env: &Environment<T>, routine: F) -> Process<T>
where
    T: SimValue,
    F: FnOnce(SimContext<T>) -> SimFuture<T>,
{
    let event = env.event();
    let shared = Rc::new(ProcShared::new());
    let future = routine(SimContext {
        env: env.clone(),
        shared: Rc::clone(&shared),
    });

    let init = env.event();
    init.trigger(Ok(crate::event::EventValue::Unit), Priority::Urgent, 0.0);
    let process = Process::from_event(event.clone());
    let resumed = process.clone();
    let token = init.push_callback(Box::new(move |_| advance(&resumed, None)));

    env.core().borrow_mut().procs.insert(
        event.id(),
        ProcRec {
            routine: Some(future),
            shared,
            target: Some((init, token)),
        },
    );
    process
}

/// Advance a process routine by one step: inject `outcome` (nothing on
/// the first step), poll to the next suspension point or to
/// termination, and wire up whatever comes next.
pub(crate) fn advance<T: SimValue>(process: &Process<T>, outcome: Option<Outcome<T>>) {
    let core = Rc::clone(process.event.core_ref());
    let (mut routine, shared) = {
        let mut core = core.borrow_mut();
        core.active = Some(process.event.id());
        let rec = core
            .procs
            .get_mut(&process.event.id())
            .expect("process record missing");
        rec.target = None;
        (
            rec.routine.take().expect("the process is already running"),
            Rc::clone(&rec.shared),
        )
    };

    *shared.inject.borrow_mut() = outcome;
    let mut cx = Context::from_waker(Waker::noop());
    let poll = routine.as_mut().poll(&mut cx);
    core.borrow_mut().active = None;

    match poll {
        Poll::Ready(outcome) => {
            core.borrow_mut().procs.remove(&process.event.id());
            debug!("{:?} terminated with {:?}", process, outcome.is_ok());
            process.event.trigger(outcome, Priority::Normal, 0.0);
        }
        Poll::Pending => {
            let target = shared
                .waiting
                .borrow_mut()
                .take()
                .expect("the process suspended without waiting on a simulation event");
            let resumed = process.clone();
            let token = target.push_callback(Box::new(move |fired| {
                let outcome = fired
                    .outcome()
                    .expect("a processed event has an outcome");
                if outcome.is_err() {
                    // The routine gets a chance to handle the failure.
                    fired.set_defused();
                }
                advance(&resumed, Some(outcome));
            }));
            let mut core = core.borrow_mut();
            let rec = core
                .procs
                .get_mut(&process.event.id())
                .expect("process record missing");
            rec.routine = Some(routine);
            rec.target = Some((target, token));
        }
    }
}

/// Deliver `failure` to `victim` out of band, through an urgent helper
/// event. Used by [`Process::interrupt`] and by resource preemption.
pub(crate) fn deliver<T: SimValue>(victim: &Process<T>, failure: Failure<T>) {
    assert!(
        !victim.event.triggered(),
        "cannot interrupt a terminated process"
    );
    assert!(
        victim.event.core_ref().borrow().active != Some(victim.event.id()),
        "a process cannot interrupt itself"
    );
    debug!("{:?} interrupted", victim);

    let interruption = victim.event.env().event();
    interruption.trigger(Err(failure), Priority::Urgent, 0.0);
    // The interruption itself is pre-handled; only the victim may turn
    // it into a real failure by not catching it.
    interruption.set_defused();

    let victim = victim.clone();
    interruption.push_callback(Box::new(move |fired| {
        if victim.event.triggered() {
            // Terminated in the same instant, before the interrupt fired.
            return;
        }
        let (target, token) = {
            let mut core = victim.event.core_ref().borrow_mut();
            let rec = core
                .procs
                .get_mut(&victim.event.id())
                .expect("process record missing");
            rec.target
                .take()
                .expect("an interrupted process has a wait target")
        };
        target.remove_callback(token);
        let outcome = fired
            .outcome()
            .expect("an interruption carries its failure");
        advance(&victim, Some(outcome));
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::{EndCondition, SimError};
    use crate::event::EventValue;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn a_process_event_triggers_with_the_routine_return_value() {
        let env: Environment<u32> = Environment::new();
        let worker = env.process(|ctx| {
            Box::pin(async move {
                ctx.wait(&ctx.timeout(3.0)).await?;
                Ok(EventValue::Item(42))
            })
        });
        let value = env.run(EndCondition::Event(worker.as_event().clone())).unwrap();
        assert_eq!(value, EventValue::Item(42));
        assert_eq!(env.now(), 3.0);
    }

    #[test]
    fn waiting_on_a_process_observes_its_return_value() {
        let env: Environment<u32> = Environment::new();
        let seen = Rc::new(RefCell::new(None));
        let worker = env.process(|ctx| {
            Box::pin(async move {
                ctx.wait(&ctx.timeout(1.0)).await?;
                Ok(EventValue::Item(5))
            })
        });
        {
            let seen = Rc::clone(&seen);
            env.process(move |ctx| {
                Box::pin(async move {
                    let value = ctx.wait(&worker).await?;
                    *seen.borrow_mut() = Some((ctx.now(), value));
                    Ok(EventValue::Unit)
                })
            });
        }
        env.run(EndCondition::NoEvents).unwrap();
        assert_eq!(*seen.borrow(), Some((1.0, EventValue::Item(5))));
    }

    #[test]
    fn an_unobserved_routine_failure_aborts_the_run() {
        let env: Environment<()> = Environment::new();
        env.process(|ctx| {
            Box::pin(async move {
                ctx.wait(&ctx.timeout(1.0)).await?;
                Err(Failure::Fault("engine seized".into()))
            })
        });
        match env.run(EndCondition::NoEvents) {
            Err(SimError::Failure(Failure::Fault(reason))) => {
                assert_eq!(reason, "engine seized")
            }
            other => panic!("expected the routine failure, got {other:?}"),
        }
    }

    #[test]
    fn a_waiting_process_defuses_and_may_handle_the_failure() {
        let env: Environment<()> = Environment::new();
        let handled = Rc::new(RefCell::new(false));
        let worker = env.process(|ctx| {
            Box::pin(async move {
                ctx.wait(&ctx.timeout(1.0)).await?;
                Err(Failure::Fault("engine seized".into()))
            })
        });
        {
            let handled = Rc::clone(&handled);
            env.process(move |ctx| {
                Box::pin(async move {
                    if ctx.wait(&worker).await.is_err() {
                        *handled.borrow_mut() = true;
                    }
                    Ok(EventValue::Unit)
                })
            });
        }
        env.run(EndCondition::NoEvents).unwrap();
        assert!(*handled.borrow());
    }

    #[test]
    fn an_interrupt_resumes_the_victim_at_the_interrupt_time() {
        let env: Environment<&'static str> = Environment::new();
        let resumed_at = Rc::new(RefCell::new(None));
        let victim = {
            let resumed_at = Rc::clone(&resumed_at);
            env.process(move |ctx| {
                Box::pin(async move {
                    match ctx.wait(&ctx.timeout(5.0)).await {
                        Err(Failure::Interrupt(cause)) => {
                            *resumed_at.borrow_mut() = Some((ctx.now(), cause));
                        }
                        other => panic!("expected an interrupt, got {other:?}"),
                    }
                    Ok(EventValue::Unit)
                })
            })
        };
        env.process(move |ctx| {
            Box::pin(async move {
                ctx.wait(&ctx.timeout(3.0)).await?;
                victim.interrupt_with("need the charger");
                Ok(EventValue::Unit)
            })
        });
        env.run(EndCondition::NoEvents).unwrap();
        assert_eq!(
            *resumed_at.borrow(),
            Some((3.0, Some("need the charger")))
        );
    }

    #[test]
    fn an_interrupted_waiter_is_not_resumed_again_by_its_old_target() {
        let env: Environment<()> = Environment::new();
        let resumptions = Rc::new(RefCell::new(0u32));
        let victim = {
            let resumptions = Rc::clone(&resumptions);
            env.process(move |ctx| {
                Box::pin(async move {
                    let _ = ctx.wait(&ctx.timeout(5.0)).await;
                    *resumptions.borrow_mut() += 1;
                    // Keep living past the old timeout.
                    let _ = ctx.wait(&ctx.timeout(10.0)).await;
                    *resumptions.borrow_mut() += 1;
                    Ok(EventValue::Unit)
                })
            })
        };
        env.process(move |ctx| {
            Box::pin(async move {
                ctx.wait(&ctx.timeout(1.0)).await?;
                victim.interrupt();
                Ok(EventValue::Unit)
            })
        });
        env.run(EndCondition::NoEvents).unwrap();
        // One resumption from the interrupt at t=1, one from the second
        // timeout at t=11; none from the abandoned timeout at t=5.
        assert_eq!(*resumptions.borrow(), 2);
        assert_eq!(env.now(), 11.0);
    }

    #[test]
    #[should_panic(expected = "terminated process")]
    fn interrupting_a_terminated_process_panics() {
        let env: Environment<()> = Environment::new();
        let worker = env.process(|_ctx| Box::pin(async move { Ok(EventValue::Unit) }));
        env.run(EndCondition::NoEvents).unwrap();
        worker.interrupt();
    }

    #[test]
    #[should_panic(expected = "already processed event")]
    fn waiting_on_a_processed_event_panics() {
        let env: Environment<()> = Environment::new();
        let done = env.timeout(0.0);
        env.step().unwrap();
        env.process(move |ctx| {
            Box::pin(async move {
                ctx.wait(&done).await?;
                Ok(EventValue::Unit)
            })
        });
        let _ = env.run(EndCondition::NoEvents);
    }

    #[test]
    fn the_active_process_is_exposed_while_a_routine_runs() {
        let env: Environment<()> = Environment::new();
        let observed = Rc::new(RefCell::new(false));
        assert!(env.active_process().is_none());
        let observed2 = Rc::clone(&observed);
        let env2 = env.clone();
        let p = env.process(move |ctx| {
            Box::pin(async move {
                let active = env2.active_process().expect("a routine is running");
                *observed2.borrow_mut() = true;
                assert!(active.is_alive());
                ctx.wait(&ctx.timeout(1.0)).await?;
                Ok(EventValue::Unit)
            })
        });
        env.run(EndCondition::NoEvents).unwrap();
        assert!(*observed.borrow());
        assert!(!p.is_alive());
        assert!(env.active_process().is_none());
    }
}
