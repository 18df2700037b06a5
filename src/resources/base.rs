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

//! The queue machinery shared by all resource types.
//!
//! Every resource keeps ordered queues of pending operations and, after
//! any state change, sweeps them: each pending entry is attempted, a
//! progressed entry has had its event triggered and leaves the queue, a
//! stalled one stays. A sweep normally stops at the first stalled entry
//! (the queues block in policy order); a resource whose entries can
//! succeed independently of their position, like a filtered store get,
//! scans the whole queue instead. The resource repeats its sweeps until
//! none of them makes progress.

/// Result of attempting one pending operation.
pub(crate) enum Attempt {
    /// The operation succeeded and its event was triggered; the entry
    /// leaves the queue.
    Progressed,
    /// The operation cannot complete yet; the entry stays.
    Stalled,
}

/// Sweep `queue` once, attempting entries in order. Returns whether any
/// entry progressed.
pub(crate) fn drain<W>(
    queue: &mut Vec<W>,
    scan_all: bool,
    mut attempt: impl FnMut(&W) -> Attempt,
) -> bool {
    let mut progressed = false;
    let mut idx = 0;
    while idx < queue.len() {
        match attempt(&queue[idx]) {
            Attempt::Progressed => {
                queue.remove(idx);
                progressed = true;
            }
            Attempt::Stalled if scan_all => idx += 1,
            Attempt::Stalled => break,
        }
    }
    progressed
}

/// Remove and return the first entry matching the predicate, used to
/// cancel abandoned operations and to release grants.
pub(crate) fn dequeue<W>(queue: &mut Vec<W>, matches: impl Fn(&W) -> bool) -> Option<W> {
    let idx = queue.iter().position(matches)?;
    Some(queue.remove(idx))
}
