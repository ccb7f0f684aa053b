// meteotrentino_exporter - Prometheus and InfluxDB exporter for Meteotrentino weather stations
//
// Copyright 2025 meteotrentino_exporter contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

//! Typed object pools for per-cycle scratch state.
//!
//! Objects are reset on the way out of the pool and again when they come back, so
//! nothing written during one cycle is visible to the next. Allocated capacity is kept.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, PoisonError};

/// Something that can be emptied for reuse without giving up its allocations.
pub trait Reset {
    fn reset(&mut self);
}

/// Pool of reusable `T`, safe to share between tasks.
///
/// Each `acquire` hands out an object owned by a single caller until the returned
/// guard is dropped. At most `max_idle` objects are kept around between uses, the
/// rest are freed on release.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    create: fn() -> T,
    max_idle: usize,
}

impl<T: Reset> Pool<T> {
    pub fn new(max_idle: usize, create: fn() -> T) -> Self {
        Pool {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            create,
            max_idle,
        }
    }

    /// Take an empty object from the pool, creating one if none are idle.
    pub fn acquire(&self) -> Pooled<'_, T> {
        let reused = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
        let mut item = reused.unwrap_or_else(self.create);
        item.reset();

        Pooled {
            pool: self,
            item: Some(item),
        }
    }

    /// Number of objects currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, mut item: T) {
        item.reset();
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.max_idle {
            idle.push(item);
        }
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("Pool")
            .field("idle", &idle)
            .field("max_idle", &self.max_idle)
            .finish()
    }
}

/// Scoped handle to a pooled object, returned to its pool when dropped.
pub struct Pooled<'a, T: Reset> {
    pool: &'a Pool<T>,
    item: Option<T>,
}

impl<'a, T: Reset> Deref for Pooled<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled object used after release")
    }
}

impl<'a, T: Reset> DerefMut for Pooled<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled object used after release")
    }
}

impl<'a, T: Reset + fmt::Debug> fmt::Debug for Pooled<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&self.item).finish()
    }
}

impl<'a, T: Reset> Drop for Pooled<'a, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}
