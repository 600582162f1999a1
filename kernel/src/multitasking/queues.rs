// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the thread queues used for scheduling and blocking.
//!
//! A [`ThreadQueue`] holds thread ids in FIFO order. Queue membership is
//! by id, with the thread objects themselves owned by the all-threads
//! table; a thread sits on at most one queue at a time, which the
//! scheduler preserves by only enqueueing a thread when it makes it
//! runnable or blocks it.
//!
//! A [`WaitQueue`] associates a `ThreadQueue` with a blocking object,
//! such as a mutex, semaphore, or device. Wait queues are FIFO in
//! membership, but waking one thread picks the highest-priority waiter.

use crate::thread::ThreadId;
use alloc::collections::VecDeque;
use spin::Mutex;

/// A FIFO queue of threads.
///
#[derive(Debug, Default)]
pub struct ThreadQueue {
    ids: VecDeque<ThreadId>,
}

impl ThreadQueue {
    /// Returns a new, empty queue.
    ///
    pub fn new() -> Self {
        ThreadQueue {
            ids: VecDeque::new(),
        }
    }

    /// Appends the given thread to the back of the queue.
    ///
    pub fn push(&mut self, thread: ThreadId) {
        debug_assert!(!self.ids.contains(&thread));
        self.ids.push_back(thread);
    }

    /// Removes and returns the thread at the front of the
    /// queue.
    ///
    pub fn pop(&mut self) -> Option<ThreadId> {
        self.ids.pop_front()
    }

    /// Removes the given thread from the queue, wherever
    /// it sits.
    ///
    pub fn remove(&mut self, thread: ThreadId) {
        self.ids.retain(|&id| id != thread);
    }

    /// Moves every thread in `other` onto the back of this
    /// queue, preserving their order. `other` is left
    /// empty.
    ///
    pub fn append(&mut self, other: &mut ThreadQueue) {
        self.ids.append(&mut other.ids);
    }

    /// Returns the thread with the maximum priority, as
    /// reported by `priority_of`, without removing it.
    /// Ties break in traversal order, so equal-priority
    /// threads are served FIFO.
    ///
    pub fn find_best<F>(&self, priority_of: F) -> Option<ThreadId>
    where
        F: Fn(ThreadId) -> i32,
    {
        let mut best: Option<(ThreadId, i32)> = None;
        for &id in self.ids.iter() {
            let priority = priority_of(id);
            match best {
                Some((_, best_priority)) if priority <= best_priority => {}
                _ => best = Some((id, priority)),
            }
        }

        best.map(|(id, _)| id)
    }

    /// Returns whether the given thread is in the queue.
    ///
    pub fn contains(&self, thread: ThreadId) -> bool {
        self.ids.contains(&thread)
    }

    /// Returns whether the queue is empty.
    ///
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns the number of threads in the queue.
    ///
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Removes and returns every thread in the queue.
    ///
    pub fn drain(&mut self) -> VecDeque<ThreadId> {
        core::mem::take(&mut self.ids)
    }
}

/// A queue of threads blocked on one object.
///
/// The inner queue is only touched inside atomic sections,
/// so the spin lock never spins in practice; it exists to
/// make the shared structure safe to name from several
/// threads.
///
#[derive(Debug, Default)]
pub struct WaitQueue {
    inner: Mutex<ThreadQueue>,
}

impl WaitQueue {
    /// Returns a new, empty wait queue.
    ///
    pub fn new() -> Self {
        WaitQueue {
            inner: Mutex::new(ThreadQueue::new()),
        }
    }

    /// Runs the given closure with the underlying queue.
    ///
    /// The caller must be in an atomic section.
    ///
    pub(crate) fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut ThreadQueue) -> R,
    {
        debug_assert!(interrupts::in_atomic_section());
        let mut queue = self.inner.lock();
        f(&mut queue)
    }

    /// Returns whether no threads are waiting.
    ///
    /// The caller must be in an atomic section.
    ///
    pub fn is_empty(&self) -> bool {
        self.with(|queue| queue.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::ThreadQueue;
    use crate::thread::ThreadId;

    #[test]
    fn test_fifo_order() {
        let mut queue = ThreadQueue::new();
        queue.push(ThreadId(1));
        queue.push(ThreadId(2));
        queue.push(ThreadId(3));

        assert_eq!(queue.pop(), Some(ThreadId(1)));
        assert_eq!(queue.pop(), Some(ThreadId(2)));
        assert_eq!(queue.pop(), Some(ThreadId(3)));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn test_remove() {
        let mut queue = ThreadQueue::new();
        queue.push(ThreadId(1));
        queue.push(ThreadId(2));
        queue.push(ThreadId(3));

        queue.remove(ThreadId(2));
        assert!(!queue.contains(ThreadId(2)));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(ThreadId(1)));
        assert_eq!(queue.pop(), Some(ThreadId(3)));
    }

    #[test]
    fn test_append_preserves_order() {
        let mut queue = ThreadQueue::new();
        queue.push(ThreadId(1));

        let mut other = ThreadQueue::new();
        other.push(ThreadId(2));
        other.push(ThreadId(3));

        queue.append(&mut other);
        assert!(other.is_empty());
        assert_eq!(queue.pop(), Some(ThreadId(1)));
        assert_eq!(queue.pop(), Some(ThreadId(2)));
        assert_eq!(queue.pop(), Some(ThreadId(3)));
    }

    #[test]
    fn test_find_best_breaks_ties_fifo() {
        let mut queue = ThreadQueue::new();
        queue.push(ThreadId(1));
        queue.push(ThreadId(2));
        queue.push(ThreadId(3));

        // Thread 2 has the highest priority.
        let best = queue.find_best(|id| if id == ThreadId(2) { 10 } else { 5 });
        assert_eq!(best, Some(ThreadId(2)));

        // All equal: the first queued wins.
        let best = queue.find_best(|_| 5);
        assert_eq!(best, Some(ThreadId(1)));

        assert_eq!(ThreadQueue::new().find_best(|_| 0), None);
    }
}
