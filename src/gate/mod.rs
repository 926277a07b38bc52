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

//! A single-flight gate that coalesces concurrent asynchronous calls.
//!
//! [`Gate`] guarantees that, out of any burst of concurrent [`Gate::execute`]
//! calls, exactly one caller runs the supplied producer. Every caller in the
//! burst receives a clone of the single outcome, so a stampede of identical
//! requests collapses into one underlying unit of work.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::task::Waker;

use crate::internal::Mutex;
use crate::internal::WaitQueue;


/// A single-flight gate for one logical asynchronous action.
///
/// A gate is a long-lived object, typically one per action worth deduplicating
/// (for example "refresh the session token"). Each call to [`execute`] joins
/// the current *flight*: if no flight is in progress the caller becomes the
/// runner and invokes its producer; otherwise the caller parks until the
/// running producer settles and receives a clone of its outcome. The flight
/// ends the instant the outcome is broadcast, so a later call starts a fresh
/// flight with a fresh invocation.
///
/// The gate never retries and never reshapes the outcome. Fallible producers
/// are expressed with `T = Result<V, E>`; every caller in a flight then sees
/// the same `Ok` or the same `Err`.
///
/// # Cancellation
///
/// Dropping a parked caller's future withdraws it from the flight without
/// affecting the others. If the *running* caller is dropped before its
/// producer settles, the attempt is abandoned and one of the remaining
/// waiters takes over, invoking its own producer.
///
/// # Examples
///
/// ```
/// # #[tokio::main]
/// # async fn main() {
/// use std::sync::Arc;
///
/// use uniflight::gate::Gate;
///
/// let gate = Arc::new(Gate::new());
///
/// let mut handles = Vec::new();
/// for _ in 0..3 {
///     let gate = gate.clone();
///     handles.push(tokio::spawn(async move {
///         gate.execute(|| async {
///             // at most one network round trip per burst of callers
///             "token-123"
///         })
///         .await
///     }));
/// }
///
/// for handle in handles {
///     assert_eq!(handle.await.unwrap(), "token-123");
/// }
/// # }
/// ```
///
/// [`execute`]: Gate::execute
pub struct Gate<T> {
    state: Mutex<State<T>>,
}

#[derive(Debug)]
struct State<T> {
    // whether some caller currently owns the flight and runs its producer
    running: bool,
    waiters: WaitQueue<WaitNode<T>>,
}

#[derive(Debug)]
struct WaitNode<T> {
    waker: Option<Waker>,
    outcome: Option<T>,
}

impl<T> Default for Gate<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Gate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Gate")
            .field("running", &state.running)
            .finish_non_exhaustive()
    }
}

impl<T> Gate<T> {
    /// Creates a new idle gate.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(State {
                running: false,
                waiters: WaitQueue::new(),
            }),
        }
    }

    /// Returns `true` if no flight is in progress and no waiter is parked.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        !state.running && state.waiters.is_empty()
    }
}

impl<T: Clone> Gate<T> {
    /// Runs `producer` at most once per burst of concurrent callers.
    ///
    /// The caller is registered before the run decision is made, so the
    /// determination of the runner is atomic with respect to every other
    /// caller. When the producer settles, the outcome is delivered to all
    /// callers of the flight in registration order within a single critical
    /// section; no new call can slip in between broadcast and clear.
    ///
    /// This method installs no timeout: if the producer never settles, the
    /// whole flight waits forever.
    ///
    /// Awaiting a nested `execute` on the same gate from inside `producer`
    /// deadlocks the flight, since the nested call joins the very burst that
    /// is waiting for the producer to settle.
    ///
    /// # Examples
    ///
    /// ```
    /// # #[tokio::main]
    /// # async fn main() {
    /// use uniflight::gate::Gate;
    ///
    /// let gate: Gate<Result<u32, String>> = Gate::new();
    ///
    /// let result = gate.execute(|| async { Ok(42) }).await;
    /// assert_eq!(result, Ok(42));
    ///
    /// let result = gate
    ///     .execute(|| async { Err("network down".to_string()) })
    ///     .await;
    /// assert_eq!(result, Err("network down".to_string()));
    /// # }
    /// ```
    pub async fn execute<F, Fut>(&self, producer: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let mut flight = Flight::join(self);
        if !flight.runner {
            if let Some(value) = flight.wait().await {
                return value;
            }
            // woken without an outcome: the previous runner was cancelled
            // before it settled, and this caller has taken over the flight
        }
        let value = producer().await;
        flight.settle(&value);
        value
    }
}

/// One caller's registration in a gate, kept until the caller settles or is
/// cancelled.
struct Flight<'a, T> {
    gate: &'a Gate<T>,
    idx: usize,
    runner: bool,
    done: bool,
}

impl<'a, T> Flight<'a, T> {
    /// Parks the caller at the tail of the waiter queue and claims the flight
    /// if no runner currently owns it.
    fn join(gate: &'a Gate<T>) -> Self {
        let mut state = gate.state.lock();
        let idx = state.waiters.push_back(WaitNode {
            waker: None,
            outcome: None,
        });
        let runner = !state.running;
        if runner {
            state.running = true;
        }
        Flight {
            gate,
            idx,
            runner,
            done: false,
        }
    }

    fn wait(&mut self) -> Wait<'a, '_, T> {
        Wait { flight: self }
    }
}

impl<T: Clone> Flight<'_, T> {
    /// Broadcasts `value` to every caller of the flight and ends it.
    ///
    /// Delivery, wakeup collection, and clearing the flight happen under one
    /// lock acquisition; the wakes themselves are issued after unlock.
    fn settle(&mut self, value: &T) {
        let mut wakers = Vec::new();
        {
            let mut state = self.gate.state.lock();
            let own = self.idx;
            state.waiters.settle_all(|key, node| {
                if key == own {
                    return;
                }
                node.outcome = Some(value.clone());
                if let Some(waker) = node.waker.take() {
                    wakers.push(waker);
                }
            });
            state.waiters.discard(own);
            state.running = false;
            self.done = true;
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

impl<T> Drop for Flight<'_, T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }

        let mut wakers = Vec::new();
        {
            let mut state = self.gate.state.lock();
            state.waiters.discard(self.idx);
            if self.runner {
                // abandon the attempt; wake the remaining waiters so that
                // one of them takes over the flight
                state.running = false;
                state.waiters.for_each(|node| {
                    if let Some(waker) = node.waker.take() {
                        wakers.push(waker);
                    }
                });
            }
        }
        for waker in wakers {
            waker.wake();
        }
    }
}

/// Resolves with `Some(outcome)` once the flight settles, or with `None` if
/// the caller has been promoted to runner after a cancellation.
struct Wait<'a, 'f, T> {
    flight: &'f mut Flight<'a, T>,
}

impl<T> Future for Wait<'_, '_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let flight = &mut *self.get_mut().flight;
        let mut state = flight.gate.state.lock();

        let outcome = state.waiters.with_mut(flight.idx, |node| node.outcome.take());
        if let Some(value) = outcome {
            state.waiters.discard(flight.idx);
            flight.done = true;
            return Poll::Ready(Some(value));
        }

        if !state.running {
            // the runner was cancelled before settling; take over while
            // keeping this caller's position in the queue
            state.running = true;
            flight.runner = true;
            return Poll::Ready(None);
        }

        state.waiters.with_mut(flight.idx, |node| {
            let update_waker = node
                .waker
                .as_ref()
                .is_none_or(|waker| !waker.will_wake(cx.waker()));
            if update_waker {
                node.waker = Some(cx.waker().clone());
            }
        });
        Poll::Pending
    }
}
