// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Keyed single-flight coalescing.
//!
//! A [`Group`] maintains one independent flight per key: concurrent
//! [`Group::execute`] calls for the same key collapse into a single producer
//! invocation, while distinct keys never interfere with each other.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use crate::gate::Gate;
use crate::internal::Mutex;

#[cfg(test)]
mod tests;

/// Deduplicates concurrent asynchronous calls per key.
///
/// Each key gets the full [`Gate`] contract: out of any burst of concurrent
/// callers for a key, exactly one runs its producer, and every caller in the
/// burst receives a clone of the one outcome. A key's entry is retired as soon
/// as its flight fully drains, so the group does not accumulate state for keys
/// that are no longer in flight.
///
/// # Examples
///
/// ```
/// # #[tokio::main]
/// # async fn main() {
/// use uniflight::group::Group;
///
/// let group: Group<&str, u32> = Group::new();
///
/// let (a, b) = tokio::join!(
///     group.execute("user:42", || async { 1 }),
///     group.execute("user:7", || async { 2 }),
/// );
/// assert_eq!((a, b), (1, 2));
/// # }
/// ```
pub struct Group<K, T> {
    flights: Mutex<HashMap<K, Arc<Gate<T>>>>,
}

impl<K, T> Default for Group<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, T> fmt::Debug for Group<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flights = self.flights.lock();
        f.debug_struct("Group")
            .field("keys", &flights.len())
            .finish_non_exhaustive()
    }
}

impl<K, T> Group<K, T> {
    /// Creates a new group with no flight in progress.
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, T> Group<K, T>
where
    K: Hash + Eq,
{
    /// Detaches the current flight for `key`, if any.
    ///
    /// Callers already attached to the detached flight still receive its
    /// outcome; the next [`execute`](Group::execute) for `key` starts a fresh
    /// flight with a fresh producer invocation.
    pub fn forget(&self, key: &K) {
        self.flights.lock().remove(key);
    }
}

impl<K, T> Group<K, T>
where
    K: Hash + Eq + Clone,
    T: Clone,
{
    /// Runs `producer` at most once per key per burst of concurrent callers.
    ///
    /// See [`Gate::execute`] for the flight contract; everything there applies
    /// per key, including takeover semantics when the running caller is
    /// cancelled.
    pub async fn execute<F, Fut>(&self, key: K, producer: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let gate = {
            let mut flights = self.flights.lock();
            Arc::clone(flights.entry(key.clone()).or_default())
        };

        // retirement lives in a guard so that a cancelled caller also gets
        // to retire the key; the guard drops after the caller's registration
        // in the gate has been released
        let _retire = Retire {
            flights: &self.flights,
            gate: Arc::clone(&gate),
            key,
        };
        gate.execute(producer).await
    }
}

/// Retires a key whose flight has fully drained.
///
/// A gate swapped in by [`Group::forget`] in the meantime is left alone.
struct Retire<'a, K, T>
where
    K: Hash + Eq,
{
    flights: &'a Mutex<HashMap<K, Arc<Gate<T>>>>,
    gate: Arc<Gate<T>>,
    key: K,
}

impl<K, T> Drop for Retire<'_, K, T>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        let mut flights = self.flights.lock();
        if let Some(current) = flights.get(&self.key) {
            if Arc::ptr_eq(current, &self.gate) && self.gate.is_idle() {
                flights.remove(&self.key);
            }
        }
    }
}
