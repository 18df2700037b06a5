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

//! Driving a simulation against the wall clock.
//!
//! A [`RealtimeEnvironment`] wraps an [`Environment`] and delays each
//! step until the wall-clock moment of the next event, at `factor`
//! seconds per unit of virtual time. With `strict`, a step that misses
//! its deadline by more than one `factor` aborts with
//! [`SimError::TooSlow`] instead of silently running late. It is built
//! entirely on the public [`Environment::step`] and
//! [`Environment::peek`], the designated extension points.

use std::thread;
use std::time::{Duration, Instant};

use crate::environment::{EndCondition, Environment, Priority, SimError};
use crate::SimValue;

/// An [`Environment`] driver synchronised with the wall clock.
pub struct RealtimeEnvironment<T: SimValue> {
    env: Environment<T>,
    factor: f64,
    strict: bool,
    wall_start: Instant,
    sim_start: f64,
}

impl<T: SimValue> RealtimeEnvironment<T> {
    /// Wrap `env`, scaling virtual time by `factor` seconds per unit.
    /// Panics unless `factor` is positive.
    pub fn new(env: Environment<T>, factor: f64, strict: bool) -> RealtimeEnvironment<T> {
        assert!(factor > 0.0, "the real-time factor must be positive");
        let sim_start = env.now();
        RealtimeEnvironment {
            env,
            factor,
            strict,
            wall_start: Instant::now(),
            sim_start,
        }
    }

    /// The wrapped environment.
    pub fn env(&self) -> &Environment<T> {
        &self.env
    }

    /// Re-anchor the wall clock to now, e.g. after a pause spent
    /// outside the simulation.
    pub fn sync(&mut self) {
        self.wall_start = Instant::now();
        self.sim_start = self.env.now();
    }

    /// Process one event, first sleeping until its wall-clock moment.
    pub fn step(&mut self) -> Result<(), SimError<T>> {
        let next = self.env.peek();
        if next.is_finite() {
            let deadline = (next - self.sim_start) * self.factor;
            let elapsed = self.wall_start.elapsed().as_secs_f64();
            if deadline > elapsed {
                thread::sleep(Duration::from_secs_f64(deadline - elapsed));
            } else if self.strict && elapsed - deadline > self.factor {
                return Err(SimError::TooSlow {
                    behind: elapsed - deadline,
                });
            }
        }
        self.env.step()
    }

    /// Run against the wall clock until an ending condition is met.
    pub fn run(&mut self, until: EndCondition<T>) -> Result<(), SimError<T>> {
        match until {
            EndCondition::NoEvents => {
                while self.env.peek().is_finite() {
                    self.step()?;
                }
                Ok(())
            }
            EndCondition::NSteps(n) => {
                for _ in 0..n {
                    self.step()?;
                }
                Ok(())
            }
            EndCondition::Time(at) => {
                let now = self.env.now();
                assert!(
                    at > now,
                    "cannot run until {at}, which is not after the current time {now}"
                );
                let stop = self.env.event();
                self.env.schedule(&stop, Priority::Normal, at - now);
                while !stop.processed() {
                    self.step()?;
                }
                Ok(())
            }
            EndCondition::Event(event) => {
                while !event.processed() {
                    match self.step() {
                        Err(SimError::EmptySchedule) => return Err(SimError::Stalled),
                        other => other?,
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn steps_wait_for_their_wall_clock_moment() {
        let env: Environment<()> = Environment::new();
        env.timeout(2.0);
        env.timeout(4.0);

        let begin = Instant::now();
        let mut rt = RealtimeEnvironment::new(env, 0.01, false);
        rt.run(EndCondition::NoEvents).unwrap();
        // 4 virtual units at 10ms each.
        assert!(begin.elapsed() >= Duration::from_millis(40));
        assert_eq!(rt.env().now(), 4.0);
    }

    #[test]
    fn a_lenient_driver_absorbs_lateness() {
        let env: Environment<()> = Environment::new();
        let t = env.timeout(1.0);
        let mut rt = RealtimeEnvironment::new(env, 0.001, false);
        thread::sleep(Duration::from_millis(20));
        rt.run(EndCondition::NoEvents).unwrap();
        assert!(t.processed());
    }

    #[test]
    fn a_strict_driver_reports_falling_behind() {
        let env: Environment<()> = Environment::new();
        env.timeout(1.0);
        let mut rt = RealtimeEnvironment::new(env, 0.001, true);
        thread::sleep(Duration::from_millis(50));
        assert!(matches!(rt.step(), Err(SimError::TooSlow { .. })));
    }
}
