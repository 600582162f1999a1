// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements the thread scheduler and its two selection policies.
//!
//! ## Policies
//!
//! The scheduler keeps [`RUN_QUEUE_LEVELS`] run queues, with level 0 the
//! highest priority, and interprets them according to the active policy:
//!
//! - **Round-robin**: all runnable threads share level 0, and selection
//!   picks the highest-priority thread there, ties breaking FIFO.
//! - **Multi-level feedback**: a runnable thread enters the level it
//!   carries; selection takes the front of the first non-empty level.
//!   Consuming a full quantum demotes a thread one level, and waking
//!   from a wait promotes it one level toward 0. The idle thread is
//!   pinned to the bottom level.
//!
//! Policies are interchangeable at runtime with
//! [`set_scheduling_policy`], which also sets the quantum.
//!
//! ## Preemption
//!
//! Each timer tick charges the current thread; when it has accumulated a
//! full quantum the reschedule flag is raised. The interrupt return path
//! calls [`preempt`], which switches threads only if the flag is set and
//! preemption has not been disabled by the synchronization layer.

use crate::queues::{ThreadQueue, WaitQueue};
use crate::thread::{current_thread, Thread, ThreadId, CURRENT_THREAD, THREADS};
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use ember_abi::SchedulingPolicy;
use interrupts::{in_atomic_section, with_atomic};
use lazy_static::lazy_static;

/// The number of run queue levels. Level 0 is the highest
/// priority.
///
pub const RUN_QUEUE_LEVELS: usize = 4;

/// The default quantum, in timer ticks.
///
pub const DEFAULT_QUANTUM: u64 = 4;

lazy_static! {
    /// SCHEDULER is the set of run queues and the active
    /// policy.
    ///
    static ref SCHEDULER: spin::Mutex<RunQueues> = spin::Mutex::new(RunQueues::new());
}

/// Set once the initial thread has been created and the
/// scheduler can switch threads.
///
static READY: AtomicBool = AtomicBool::new(false);

/// Set when the current thread has exhausted its quantum
/// and a new thread should be chosen at the next interrupt
/// return.
///
static NEED_RESCHEDULE: AtomicBool = AtomicBool::new(false);

/// Set while the synchronization layer must not lose the
/// CPU to another thread. Timer ticks still advance, but
/// [`preempt`] declines to switch.
///
static PREEMPTION_DISABLED: AtomicBool = AtomicBool::new(false);

/// The quantum, in timer ticks.
///
static QUANTUM: AtomicU64 = AtomicU64::new(DEFAULT_QUANTUM);

/// The idle thread's id, once it has been created.
///
static IDLE_THREAD: AtomicU64 = AtomicU64::new(0);

/// Marks the scheduler as able to switch threads.
///
pub(crate) fn mark_ready() {
    READY.store(true, Ordering::SeqCst);
}

/// Returns whether the scheduler has been initialised and
/// owns the flow of execution.
///
pub fn ready() -> bool {
    READY.load(Ordering::SeqCst)
}

/// Records the idle thread's id so the policies can treat
/// it specially.
///
pub(crate) fn set_idle_thread(id: ThreadId) {
    IDLE_THREAD.store(id.as_u64(), Ordering::SeqCst);
}

fn idle_thread_id() -> Option<ThreadId> {
    match IDLE_THREAD.load(Ordering::SeqCst) {
        0 => None,
        id => Some(ThreadId(id)),
    }
}

/// Returns the active scheduling policy.
///
pub fn policy() -> SchedulingPolicy {
    with_atomic(|| SCHEDULER.lock().policy())
}

/// Returns the current quantum, in timer ticks.
///
pub fn quantum() -> u64 {
    QUANTUM.load(Ordering::SeqCst)
}

/// Prevents or re-allows preemption of the current thread.
///
/// This is the preemption gate used by the mutex
/// discipline: operations that hold a mutex's internal
/// state run with preemption disabled but interrupts
/// enabled.
///
pub fn set_preemption_disabled(disabled: bool) {
    PREEMPTION_DISABLED.store(disabled, Ordering::SeqCst);
}

/// Returns whether preemption is currently disabled.
///
pub fn preemption_disabled() -> bool {
    PREEMPTION_DISABLED.load(Ordering::SeqCst)
}

/// The set of levelled run queues, interpreted by the
/// active policy.
///
/// This structure is pure bookkeeping: it holds thread ids
/// and level indices, with the thread objects and all
/// interrupt discipline living in the callers. That keeps
/// the policy logic testable on its own.
///
pub(crate) struct RunQueues {
    levels: [ThreadQueue; RUN_QUEUE_LEVELS],
    policy: SchedulingPolicy,
}

impl RunQueues {
    pub fn new() -> Self {
        RunQueues {
            levels: [
                ThreadQueue::new(),
                ThreadQueue::new(),
                ThreadQueue::new(),
                ThreadQueue::new(),
            ],
            policy: SchedulingPolicy::MultilevelFeedback,
        }
    }

    /// Returns the active policy.
    ///
    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Returns the level a thread carrying `stored_level`
    /// should be enqueued on under the active policy.
    ///
    pub fn target_level(&self, stored_level: usize, is_idle: bool) -> usize {
        match self.policy {
            SchedulingPolicy::RoundRobin => 0,
            SchedulingPolicy::MultilevelFeedback => {
                if is_idle {
                    RUN_QUEUE_LEVELS - 1
                } else {
                    debug_assert!(stored_level < RUN_QUEUE_LEVELS);
                    stored_level
                }
            }
        }
    }

    /// Appends the given thread to the back of the given
    /// level's queue.
    ///
    pub fn enqueue(&mut self, thread: ThreadId, level: usize) {
        self.levels[level].push(thread);
    }

    /// Removes and returns the next thread to run, or None
    /// if every level is empty.
    ///
    /// Under round-robin, this is the highest-priority
    /// thread on level 0, with `priority_of` supplying
    /// priorities and ties breaking FIFO. Under multi-level
    /// feedback, it is the front of the first non-empty
    /// level.
    ///
    pub fn next<F>(&mut self, priority_of: F) -> Option<ThreadId>
    where
        F: Fn(ThreadId) -> i32,
    {
        match self.policy {
            SchedulingPolicy::RoundRobin => {
                let best = self.levels[0].find_best(priority_of)?;
                self.levels[0].remove(best);
                Some(best)
            }
            SchedulingPolicy::MultilevelFeedback => {
                for level in self.levels.iter_mut() {
                    if let Some(id) = level.pop() {
                        return Some(id);
                    }
                }

                None
            }
        }
    }

    /// Switches to a new policy, rearranging the queues as
    /// needed.
    ///
    /// Moving to round-robin concatenates the lower levels
    /// onto level 0, preserving their order. Moving to
    /// multi-level feedback pins the idle thread (if it is
    /// runnable) to the bottom level; other threads stay
    /// on level 0 and migrate down as they consume quanta.
    ///
    pub fn change_policy(&mut self, policy: SchedulingPolicy, idle: Option<ThreadId>) {
        if policy == self.policy {
            return;
        }

        match policy {
            SchedulingPolicy::RoundRobin => {
                for level in 1..RUN_QUEUE_LEVELS {
                    let drained = self.levels[level].drain();
                    for id in drained {
                        self.levels[0].push(id);
                    }
                }
            }
            SchedulingPolicy::MultilevelFeedback => {
                if let Some(idle) = idle {
                    if self.levels[0].contains(idle) {
                        self.levels[0].remove(idle);
                        self.levels[RUN_QUEUE_LEVELS - 1].push(idle);
                    }
                }
            }
        }

        self.policy = policy;
    }

    #[cfg(test)]
    fn level_len(&self, level: usize) -> usize {
        self.levels[level].len()
    }
}

/// Returns the priority of the given thread, for use when
/// scanning queues.
///
fn priority_of(id: ThreadId) -> i32 {
    THREADS
        .lock()
        .get(&id)
        .map(|thread| thread.priority())
        .unwrap_or(i32::MIN)
}

/// Adds the given thread to a run queue, so that it may be
/// scheduled. Must be called inside an atomic section.
///
pub fn make_runnable(thread: &Arc<Thread>) {
    debug_assert!(in_atomic_section());

    thread.blocked.store(false, Ordering::SeqCst);

    let mut scheduler = SCHEDULER.lock();
    let is_idle = Some(thread.id()) == idle_thread_id();
    let level = scheduler.target_level(thread.level.load(Ordering::SeqCst), is_idle);
    scheduler.enqueue(thread.id(), level);
}

/// Atomically makes the given thread runnable.
///
pub fn make_runnable_atomic(thread: &Arc<Thread>) {
    with_atomic(|| make_runnable(thread));
}

/// Removes and returns the next runnable thread.
///
/// # Panics
///
/// `get_next_runnable` will panic if every run queue is
/// empty. The idle thread exists to preserve the invariant
/// that some thread is always runnable.
///
fn get_next_runnable() -> Arc<Thread> {
    let next = SCHEDULER
        .lock()
        .next(priority_of)
        .expect("run queues empty: the idle thread should always be runnable");

    THREADS
        .lock()
        .get(&next)
        .expect("runnable thread missing from the all-threads table")
        .clone()
}

/// Switches to the given thread, saving the context of the
/// current thread.
///
/// Eventually the current thread will be re-activated, the
/// context switch will "return", and the caller continues
/// from wherever it called `switch_to`.
///
fn switch_to(next: Arc<Thread>) {
    let current = current_thread();
    if Arc::ptr_eq(&current, &next) {
        // We're already running the right thread, so
        // return without doing anything further.
        return;
    }

    // The incoming thread starts a fresh quantum.
    next.ticks.store(0, Ordering::SeqCst);

    // Make traps from user mode land on the next thread's
    // kernel stack, and expose its process memory through
    // the user descriptor slots.
    segmentation::set_interrupt_stack(next.kernel_stack_top());
    if let Some(context) = next.user_context() {
        segmentation::load_segment_pair(context.segment_pair());
    }

    // Retrieve a pointer to each stack pointer cell. These
    // point into the Thread structures, where the switch
    // saves the outgoing stack pointer.
    let current_cell = current.stack_pointer_cell();
    let next_cell = next.stack_pointer_cell();

    *CURRENT_THREAD.lock() = Some(next);

    // We drop our handle on the current thread before the
    // switch. The all-threads table still references it
    // (even if it is exiting), so the stack we are
    // standing on stays allocated until the reaper runs,
    // on its own stack.
    drop(current);

    unsafe { crate::switch::switch_stack(current_cell, next_cell) };
}

/// Schedules a thread that is waiting to run. Must be
/// called inside an atomic section, with preemption
/// enabled.
///
/// The current thread should already have been placed on
/// whatever queue is appropriate: a run queue if it is
/// still runnable, or a wait queue if it is waiting for an
/// event.
///
pub fn schedule() {
    debug_assert!(in_atomic_section());
    debug_assert!(!preemption_disabled());

    let runnable = get_next_runnable();
    switch_to(runnable);
}

/// Voluntarily gives up the CPU to another thread.
///
pub fn yield_now() {
    with_atomic(|| {
        make_runnable(&current_thread());
        schedule();
    });
}

/// Blocks the current thread on the given wait queue and
/// schedules another. Must be called inside an atomic
/// section; returns, still atomic, once the thread is
/// woken.
///
/// Under multi-level feedback, the blocking thread is
/// promoted one level toward 0, so interactive threads
/// drift to the top. The idle thread is exempt.
///
pub fn wait(queue: &WaitQueue) {
    debug_assert!(in_atomic_section());

    let current = current_thread();

    if SCHEDULER.lock().policy() == SchedulingPolicy::MultilevelFeedback
        && Some(current.id()) != idle_thread_id()
    {
        let level = current.level.load(Ordering::SeqCst);
        if level > 0 {
            current.level.store(level - 1, Ordering::SeqCst);
        }
    }

    current.blocked.store(true, Ordering::SeqCst);
    queue.with(|q| q.push(current.id()));
    drop(current);

    schedule();
}

/// Wakes every thread waiting on the given queue, leaving
/// it empty. Must be called inside an atomic section.
///
pub fn wake_up(queue: &WaitQueue) {
    debug_assert!(in_atomic_section());

    let woken = queue.with(|q| q.drain());
    for id in woken {
        let thread = THREADS.lock().get(&id).cloned();
        if let Some(thread) = thread {
            make_runnable(&thread);
        }
    }
}

/// Wakes the single highest-priority thread waiting on the
/// given queue, if any. Must be called inside an atomic
/// section.
///
pub fn wake_up_one(queue: &WaitQueue) {
    debug_assert!(in_atomic_section());

    let best = queue.with(|q| {
        let best = q.find_best(priority_of)?;
        q.remove(best);
        Some(best)
    });

    if let Some(id) = best {
        let thread = THREADS.lock().get(&id).cloned();
        if let Some(thread) = thread {
            make_runnable(&thread);
        }
    }
}

/// Charges the current thread for one timer tick.
///
/// Called by the timer interrupt handler. When the thread
/// has consumed a full quantum, the reschedule flag is
/// raised and, under multi-level feedback, the thread's
/// stored level is demoted by one.
///
pub fn timer_tick() {
    if !ready() {
        return;
    }

    let current = current_thread();
    let ticks = current.ticks.fetch_add(1, Ordering::SeqCst) + 1;
    if ticks < quantum() {
        return;
    }

    NEED_RESCHEDULE.store(true, Ordering::SeqCst);

    if SCHEDULER.lock().policy() == SchedulingPolicy::MultilevelFeedback {
        let level = current.level.load(Ordering::SeqCst);
        if level < RUN_QUEUE_LEVELS - 1 {
            current.level.store(level + 1, Ordering::SeqCst);
        }
    }
}

/// Raises the reschedule flag, so the next interrupt
/// return picks a new thread.
///
/// Device handlers use this after waking a waiter, in the
/// hope that the woken thread is chosen.
///
pub fn request_reschedule() {
    NEED_RESCHEDULE.store(true, Ordering::SeqCst);
}

/// Checks the reschedule flag and, if it favours it,
/// switches to the next runnable thread.
///
/// This is invoked on the return path of every interrupt,
/// before the interrupted context is restored. The switch
/// happens only when the flag is set and preemption is
/// enabled; with preemption disabled the flag stays set so
/// the switch happens as soon as the gate reopens.
///
pub fn preempt() {
    if !ready() || preemption_disabled() || !NEED_RESCHEDULE.load(Ordering::SeqCst) {
        return;
    }

    NEED_RESCHEDULE.store(false, Ordering::SeqCst);

    // We are in an interrupt handler, so this is already
    // an atomic section.
    make_runnable(&current_thread());
    schedule();
}

/// Changes the scheduling policy and quantum.
///
/// The caller validates the values; see the syscall layer.
///
pub fn set_scheduling_policy(policy: SchedulingPolicy, quantum: u64) {
    with_atomic(|| {
        SCHEDULER.lock().change_policy(policy, idle_thread_id());
        QUANTUM.store(quantum, Ordering::SeqCst);
    });
}

/// Implements the idle thread.
///
/// Its sole job is to preserve the invariant that a
/// runnable thread always exists, so the run queues are
/// never all empty.
///
pub(crate) fn idle_loop(_arg: u64) {
    loop {
        yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::RunQueues;
    use super::RUN_QUEUE_LEVELS;
    use crate::thread::ThreadId;
    use ember_abi::SchedulingPolicy;

    const IDLE: ThreadId = ThreadId(9);

    #[test]
    fn test_round_robin_selects_by_priority() {
        let mut queues = RunQueues::new();
        queues.change_policy(SchedulingPolicy::RoundRobin, None);

        queues.enqueue(ThreadId(1), 0);
        queues.enqueue(ThreadId(2), 0);
        queues.enqueue(ThreadId(3), 0);

        // Thread 2 outranks the others; among the rest,
        // FIFO order applies.
        let priority = |id: ThreadId| if id == ThreadId(2) { 10 } else { 5 };
        assert_eq!(queues.next(priority), Some(ThreadId(2)));
        assert_eq!(queues.next(priority), Some(ThreadId(1)));
        assert_eq!(queues.next(priority), Some(ThreadId(3)));
        assert_eq!(queues.next(priority), None);
    }

    #[test]
    fn test_round_robin_uses_level_zero_only() {
        let mut queues = RunQueues::new();
        queues.change_policy(SchedulingPolicy::RoundRobin, None);

        assert_eq!(queues.target_level(3, false), 0);
        assert_eq!(queues.target_level(0, true), 0);
    }

    #[test]
    fn test_multilevel_selects_first_nonempty_level() {
        let mut queues = RunQueues::new();
        assert_eq!(queues.policy(), SchedulingPolicy::MultilevelFeedback);

        queues.enqueue(ThreadId(1), 2);
        queues.enqueue(ThreadId(2), 1);
        queues.enqueue(ThreadId(3), 1);
        queues.enqueue(IDLE, RUN_QUEUE_LEVELS - 1);

        let priority = |_| 5;
        assert_eq!(queues.next(priority), Some(ThreadId(2)));
        assert_eq!(queues.next(priority), Some(ThreadId(3)));
        assert_eq!(queues.next(priority), Some(ThreadId(1)));
        assert_eq!(queues.next(priority), Some(IDLE));
        assert_eq!(queues.next(priority), None);
    }

    #[test]
    fn test_multilevel_pins_idle_to_bottom() {
        let queues = RunQueues::new();
        assert_eq!(queues.target_level(0, true), RUN_QUEUE_LEVELS - 1);
        assert_eq!(queues.target_level(2, false), 2);
    }

    #[test]
    fn test_change_to_round_robin_concatenates_levels() {
        let mut queues = RunQueues::new();
        queues.enqueue(ThreadId(1), 0);
        queues.enqueue(ThreadId(2), 1);
        queues.enqueue(ThreadId(3), 1);
        queues.enqueue(ThreadId(4), 3);

        queues.change_policy(SchedulingPolicy::RoundRobin, Some(IDLE));

        // All runnable threads are now at level 0, in
        // level order with each level's order preserved,
        // and the higher levels are empty.
        assert_eq!(queues.level_len(0), 4);
        for level in 1..RUN_QUEUE_LEVELS {
            assert_eq!(queues.level_len(level), 0);
        }

        let priority = |_| 5;
        assert_eq!(queues.next(priority), Some(ThreadId(1)));
        assert_eq!(queues.next(priority), Some(ThreadId(2)));
        assert_eq!(queues.next(priority), Some(ThreadId(3)));
        assert_eq!(queues.next(priority), Some(ThreadId(4)));
    }

    #[test]
    fn test_change_to_multilevel_moves_idle_down() {
        let mut queues = RunQueues::new();
        queues.change_policy(SchedulingPolicy::RoundRobin, Some(IDLE));

        queues.enqueue(ThreadId(1), 0);
        queues.enqueue(IDLE, 0);
        queues.enqueue(ThreadId(2), 0);

        queues.change_policy(SchedulingPolicy::MultilevelFeedback, Some(IDLE));

        // The idle thread is pinned to the bottom level;
        // everything else stays at level 0.
        assert_eq!(queues.level_len(0), 2);
        assert_eq!(queues.level_len(RUN_QUEUE_LEVELS - 1), 1);

        let priority = |_| 5;
        assert_eq!(queues.next(priority), Some(ThreadId(1)));
        assert_eq!(queues.next(priority), Some(ThreadId(2)));
        assert_eq!(queues.next(priority), Some(IDLE));
    }

    #[test]
    fn test_change_policy_is_idempotent() {
        let mut queues = RunQueues::new();
        queues.enqueue(ThreadId(1), 1);

        queues.change_policy(SchedulingPolicy::MultilevelFeedback, Some(IDLE));
        assert_eq!(queues.level_len(1), 1);
    }
}
