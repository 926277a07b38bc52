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

use slab::Slab;

/// An insertion-ordered waiter registry.
///
/// Live nodes form a circular doubly linked list threaded through a lazily
/// created guard node, so traversal follows registration order. A node can be
/// unlinked from the live list while its slot stays allocated; this keeps a
/// settled outcome addressable until the owning task claims or abandons it.
///
/// * `guard`'s `next` points to the first live node (regular head).
/// * `guard`'s `prev` points to the last live node (regular tail).
/// * An unlinked node points to itself.
#[derive(Debug)]
pub(crate) struct WaitQueue<T> {
    // if None, the queue is uninitialized and empty
    guard: Option<usize>,
    nodes: Slab<Node<T>>,
}

#[derive(Debug)]
struct Node<T> {
    prev: usize,
    next: usize,
    // None only for the guard node
    stat: Option<T>,
}

impl<T> WaitQueue<T> {
    pub(crate) const fn new() -> Self {
        Self {
            guard: None,
            nodes: Slab::new(),
        }
    }

    /// Ensures the queue is initialized, returning the guard key.
    fn ensure_guard(&mut self) -> usize {
        if let Some(guard) = self.guard {
            return guard;
        }

        let entry = self.nodes.vacant_entry();
        let guard = entry.key();
        entry.insert(Node {
            prev: guard,
            next: guard,
            stat: None,
        });
        self.guard = Some(guard);
        guard
    }

    /// Appends a waiter behind every live node, returning its key.
    pub(crate) fn push_back(&mut self, stat: T) -> usize {
        let guard = self.ensure_guard();
        let tail = self.nodes[guard].prev;
        let key = self.nodes.insert(Node {
            prev: tail,
            next: guard,
            stat: Some(stat),
        });
        self.nodes[guard].prev = key;
        self.nodes[tail].next = key;
        key
    }

    /// Returns `true` if no live node is linked.
    pub(crate) fn is_empty(&self) -> bool {
        self.guard
            .is_none_or(|guard| self.nodes[guard].next == guard)
    }

    /// Applies `f` to the state of every live node in registration order.
    pub(crate) fn for_each(&mut self, mut f: impl FnMut(&mut T)) {
        let Some(guard) = self.guard else { return };
        let mut cursor = self.nodes[guard].next;
        while cursor != guard {
            let next = self.nodes[cursor].next;
            f(retrieve_stat(&mut self.nodes[cursor]));
            cursor = next;
        }
    }

    /// Applies `f` to every live node in registration order and unlinks it.
    ///
    /// Slots stay allocated: each settled waiter later claims its state with
    /// [`with_mut`](Self::with_mut) and releases its own slot with
    /// [`discard`](Self::discard).
    pub(crate) fn settle_all(&mut self, mut f: impl FnMut(usize, &mut T)) {
        let Some(guard) = self.guard else { return };
        let mut cursor = self.nodes[guard].next;
        while cursor != guard {
            let next = self.nodes[cursor].next;
            f(cursor, retrieve_stat(&mut self.nodes[cursor]));
            self.nodes[cursor].prev = cursor;
            self.nodes[cursor].next = cursor;
            cursor = next;
        }
        self.nodes[guard].prev = guard;
        self.nodes[guard].next = guard;
    }

    /// Applies `f` to the state of the node at `key`, linked or not.
    pub(crate) fn with_mut<R>(&mut self, key: usize, f: impl FnOnce(&mut T) -> R) -> R {
        f(retrieve_stat(&mut self.nodes[key]))
    }

    /// Unlinks the node at `key` if it is still live and releases its slot.
    pub(crate) fn discard(&mut self, key: usize) {
        // SAFETY: the queue must be initialized before any waiter can be registered
        let guard = self.guard.expect("wait queue is uninitialized");
        assert_ne!(key, guard);

        let prev = self.nodes[key].prev;
        let next = self.nodes[key].next;
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes.remove(key);
    }
}

fn retrieve_stat<T>(node: &mut Node<T>) -> &mut T {
    // SAFETY: non-guard node always has `Some(stat)`
    node.stat.as_mut().expect("guard node holds no waiter state")
}

#[cfg(test)]
mod tests {
    use super::WaitQueue;

    fn drain_order(queue: &mut WaitQueue<u32>) -> Vec<u32> {
        let mut seen = Vec::new();
        queue.for_each(|stat| seen.push(*stat));
        seen
    }

    #[test]
    fn preserves_registration_order() {
        let mut queue = WaitQueue::new();
        assert!(queue.is_empty());

        let a = queue.push_back(1);
        let b = queue.push_back(2);
        let c = queue.push_back(3);
        assert!(!queue.is_empty());
        assert_eq!(drain_order(&mut queue), vec![1, 2, 3]);

        queue.discard(b);
        assert_eq!(drain_order(&mut queue), vec![1, 3]);

        queue.discard(a);
        queue.discard(c);
        assert!(queue.is_empty());
    }

    #[test]
    fn settled_nodes_stay_addressable() {
        let mut queue = WaitQueue::new();
        let a = queue.push_back(1);
        let b = queue.push_back(2);

        let mut settled = Vec::new();
        queue.settle_all(|key, stat| {
            *stat += 10;
            settled.push(key);
        });
        assert_eq!(settled, vec![a, b]);
        assert!(queue.is_empty());

        assert_eq!(queue.with_mut(a, |stat| *stat), 11);
        assert_eq!(queue.with_mut(b, |stat| *stat), 12);
        queue.discard(a);
        queue.discard(b);

        // a fresh registration after settling starts from a clean list
        let c = queue.push_back(7);
        assert_eq!(drain_order(&mut queue), vec![7]);
        queue.discard(c);
    }

    #[test]
    fn discard_of_unlinked_node_is_safe() {
        let mut queue = WaitQueue::new();
        let a = queue.push_back(1);
        queue.settle_all(|_, _| {});
        queue.discard(a);
        assert!(queue.is_empty());
    }
}
