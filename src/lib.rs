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

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

//! # Uniflight - Single-Flight Coalescing for Async Rust
//!
//! `uniflight` is a runtime-agnostic library that collapses bursts of concurrent,
//! identical asynchronous calls into a single underlying invocation. Every caller
//! in a burst receives a clone of the one outcome, so a stampede of requests for
//! the same thing (a token refresh, a cache fill, a config fetch) costs exactly
//! one unit of work.
//!
//! ## Features
//!
//! * [`Gate`]: A single-flight gate for one logical action. Out of any burst of
//!   concurrent `execute` calls, exactly one runs the supplied producer; the
//!   outcome fans out to every caller in the burst.
//! * [`Group`]: Keyed single-flight. Concurrent calls for the same key coalesce;
//!   distinct keys run independently.
//!
//! ## Runtime Agnostic
//!
//! The primitives in this library are runtime-agnostic, meaning they can be used
//! with any async runtime like Tokio, async-std, or others. Coordination happens
//! through plain wakers and a mutex-guarded waiter registry; nothing here spawns
//! tasks or touches a reactor.
//!
//! ## Thread Safety
//!
//! All types in this library implement `Send` and `Sync` for sendable outcomes,
//! making them safe to share across thread boundaries. The single-flight
//! guarantee holds under genuinely parallel callers: registration and broadcast
//! are true critical sections, not a cooperative-scheduling assumption.
//!
//! [`Gate`]: gate::Gate
//! [`Group`]: group::Group

pub(crate) mod internal;

pub mod gate;
pub mod group;

#[cfg(test)]
fn test_runtime() -> &'static tokio::runtime::Runtime {
    use std::sync::OnceLock;

    use tokio::runtime::Runtime;
    static RT: OnceLock<Runtime> = OnceLock::new();
    RT.get_or_init(|| Runtime::new().unwrap())
}

#[cfg(test)]
mod tests {
    use crate::gate::Gate;
    use crate::group::Group;

    #[test]
    fn assert_send_and_sync() {
        fn do_assert_send_and_sync<T: Send + Sync>() {}
        do_assert_send_and_sync::<Gate<i64>>();
        do_assert_send_and_sync::<Gate<Result<String, String>>>();
        do_assert_send_and_sync::<Group<String, i64>>();
        do_assert_send_and_sync::<Group<u64, Result<String, String>>>();
    }

    #[test]
    fn assert_unpin() {
        fn do_assert_unpin<T: Unpin>() {}
        do_assert_unpin::<Gate<i64>>();
        do_assert_unpin::<Group<String, i64>>();
    }
}
