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

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Notify;

use super::Group;

#[tokio::test]
async fn coalesces_callers_per_key() {
    let group: Group<&str, u32> = Group::new();
    let calls = AtomicUsize::new(0);

    let (a1, a2, a3, b1) = tokio::join!(
        group.execute("a", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                1
            }
        }),
        group.execute("a", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                1
            }
        }),
        group.execute("a", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                1
            }
        }),
        group.execute("b", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                2
            }
        }),
    );

    assert_eq!((a1, a2, a3, b1), (1, 1, 1, 2));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn broadcasts_failure_per_key() {
    let group: Group<String, Result<u32, String>> = Group::new();
    let calls = AtomicUsize::new(0);

    let (r1, r2) = tokio::join!(
        group.execute("token".to_string(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err("network down".to_string())
            }
        }),
        group.execute("token".to_string(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err("network down".to_string())
            }
        }),
    );

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(r1.unwrap_err(), "network down");
    assert_eq!(r2.unwrap_err(), "network down");
}

#[tokio::test]
async fn retires_the_key_after_the_flight_settles() {
    let group: Group<String, u32> = Group::new();

    let value = group.execute("refresh".to_string(), || async { 1 }).await;
    assert_eq!(value, 1);
    assert!(group.flights.lock().is_empty());
}

#[tokio::test]
async fn forget_detaches_the_running_flight() {
    let group: Arc<Group<&str, u32>> = Arc::new(Group::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(Notify::new());

    let first = {
        let group = group.clone();
        let calls = calls.clone();
        let release = release.clone();
        tokio::spawn(async move {
            group
                .execute("k", move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        release.notified().await;
                        1
                    }
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    group.forget(&"k");

    // a fresh flight for the same key runs while the old one is still parked
    let second = {
        let group = group.clone();
        let calls = calls.clone();
        tokio::spawn(async move {
            group
                .execute("k", move || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { 2 }
                })
                .await
        })
    };
    assert_eq!(second.await.unwrap(), 2);

    release.notify_one();
    assert_eq!(first.await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(group.flights.lock().is_empty());
}

#[tokio::test]
async fn abandoned_key_is_retired() {
    let group: Arc<Group<&str, u32>> = Arc::new(Group::new());

    let caller = {
        let group = group.clone();
        tokio::spawn(async move {
            let fut = group.execute("k", || async {
                tokio::time::sleep(Duration::from_millis(1000)).await;
                1
            });
            let timeout = tokio::time::timeout(Duration::from_millis(20), fut).await;
            assert!(timeout.is_err());
        })
    };

    // the sole caller was cancelled mid-flight; its key must not linger
    caller.await.unwrap();
    assert!(group.flights.lock().is_empty());
}

#[tokio::test]
async fn debug_reports_in_flight_keys() {
    let group: Group<&str, u32> = Group::new();
    let debug = format!("{group:?}");
    assert!(debug.contains("Group"));
    assert!(debug.contains("keys: 0"));
}
