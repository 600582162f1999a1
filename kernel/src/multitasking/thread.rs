// Copyright 2022 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Implements kernel threads and their lifecycle.
//!
//! Each thread owns one stack frame and a saved stack pointer, which is
//! the thread's resumption point. A new thread's stack is populated with
//! a synthetic frame that makes it look as if the thread had been
//! suspended by the context switch: when the scheduler switches to it
//! for the first time, the switch path "resumes" it into a launch stub,
//! which starts the thread's body.
//!
//! Threads are reference counted. A detached thread holds only the
//! implicit self-reference; a joinable thread's creator holds a second
//! reference, dropped by [`join`]. When the count reaches zero the
//! thread is handed to the reaper, which disposes of its stack and
//! metadata away from the exiting thread's own stack.

use crate::queues::WaitQueue;
use crate::scheduler;
use crate::switch;
use crate::tlocal;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use ember_abi::Error;
use interrupts::{begin_atomic, end_atomic, in_atomic_section, with_atomic};
use physmem::Frame;
use userspace::UserContext;
use x86_64::VirtAddr;

/// The priority of the idle thread. Nothing else should
/// use this priority.
///
pub const PRIORITY_IDLE: i32 = 0;

/// The priority given to user processes.
///
pub const PRIORITY_USER: i32 = 1;

/// The priority for low-importance kernel threads.
///
pub const PRIORITY_LOW: i32 = 2;

/// The default priority for kernel threads.
///
pub const PRIORITY_NORMAL: i32 = 5;

/// The priority for latency-sensitive kernel threads.
///
pub const PRIORITY_HIGH: i32 = 10;

/// The RFLAGS value seen by a thread's launch stub:
/// interrupts disabled, with the always-set reserved bit.
///
const DEFAULT_RFLAGS: u64 = 0x2;

/// The RFLAGS value a user process starts with: interrupts
/// enabled.
///
const USER_RFLAGS: u64 = 0x202;

/// THREADS stores all living threads, referencing them by
/// their thread id.
///
/// This doubles as the all-threads list: [`lookup`] walks
/// it, and the reaper removes corpses from it. A thread's
/// entry here keeps its stack alive until the reaper is
/// done with it.
///
pub(crate) static THREADS: spin::Mutex<BTreeMap<ThreadId, Arc<Thread>>> =
    spin::Mutex::new(BTreeMap::new());

/// CURRENT_THREAD is the thread that currently has the
/// CPU. It is replaced only by the context switch.
///
pub(crate) static CURRENT_THREAD: spin::Mutex<Option<Arc<Thread>>> = spin::Mutex::new(None);

/// Uniquely identifies a thread. The id doubles as the
/// process id seen by user mode.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ThreadId(pub u64);

impl ThreadId {
    /// Allocates and returns the next available ThreadId.
    ///
    fn new() -> Self {
        static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);
        ThreadId(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns a numerical representation for the thread
    /// id.
    ///
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread {}", self.0)
    }
}

/// Contains the metadata for a thread of execution.
///
pub struct Thread {
    // This thread's unique id.
    id: ThreadId,

    // The thread's base priority.
    priority: i32,

    // The creator that may join this thread, or None if
    // the thread is detached.
    owner: Option<ThreadId>,

    // The thread's stack. The kernel's initial thread has
    // no frame here, as it inherits the boot stack.
    stack: Option<Frame>,

    // The thread's saved stack pointer. While the thread
    // is executing, this value is stale; it is rewritten
    // each time the thread is switched out.
    stack_pointer: UnsafeCell<u64>,

    // Timer ticks accumulated since the thread was last
    // scheduled.
    pub(crate) ticks: AtomicU64,

    // The run queue level the thread should be placed on
    // when it next becomes runnable. Only meaningful under
    // the multi-level feedback policy.
    pub(crate) level: AtomicUsize,

    // Whether the thread sits on a wait queue rather than
    // a run queue.
    pub(crate) blocked: AtomicBool,

    // False once the thread has exited.
    alive: AtomicBool,

    // The exit code, valid once alive is false.
    exit_code: AtomicI64,

    // The number of references to this thread: the
    // implicit self-reference, plus the owner's reference
    // for joinable threads.
    ref_count: AtomicUsize,

    // Threads waiting in join for this thread to exit.
    join_queue: WaitQueue,

    // The user context, if this thread runs a process.
    user_context: spin::Mutex<Option<Arc<UserContext>>>,

    // Thread-local slot values; see the tlocal module.
    pub(crate) tlocal: UnsafeCell<[*mut u8; tlocal::MAX_TLOCAL_KEYS]>,
}

// Thread is not thread-safe by default, as its stack
// pointer and thread-local slots live in UnsafeCells.
// However, we only ever access those while the thread is
// running or inside an atomic section, which can only
// happen on one CPU at a time, so this is thread-safe in
// practice.
//
unsafe impl Sync for Thread {}
unsafe impl Send for Thread {}

impl Thread {
    /// Creates a new raw thread object with a fresh stack,
    /// registering it in the all-threads table.
    ///
    fn create(priority: i32, detached: bool) -> Result<Arc<Thread>, Error> {
        let stack = physmem::allocate_frame().ok_or(Error::OutOfMemory)?;
        let stack_top = stack.end_address() as u64;

        let owner = if detached {
            None
        } else {
            Some(current_thread().id)
        };

        let thread = Arc::new(Thread {
            id: ThreadId::new(),
            priority,
            owner,
            stack: Some(stack),
            stack_pointer: UnsafeCell::new(stack_top),
            ticks: AtomicU64::new(0),
            level: AtomicUsize::new(0),
            blocked: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            exit_code: AtomicI64::new(0),
            // The thread has an implicit self-reference.
            // If the thread is not detached, then its
            // owner also has a reference to it.
            ref_count: AtomicUsize::new(if detached { 1 } else { 2 }),
            join_queue: WaitQueue::new(),
            user_context: spin::Mutex::new(None),
            tlocal: UnsafeCell::new([core::ptr::null_mut(); tlocal::MAX_TLOCAL_KEYS]),
        });

        with_atomic(|| {
            THREADS.lock().insert(thread.id, thread.clone());
        });

        Ok(thread)
    }

    /// Turns the kernel's boot flow of control into the
    /// initial thread.
    ///
    /// The initial thread inherits the boot stack; the
    /// stack pointer stored here is never read, as the
    /// real value is saved at the first context switch.
    ///
    pub(crate) fn create_initial_thread() -> Arc<Thread> {
        Arc::new(Thread {
            id: ThreadId::new(),
            priority: PRIORITY_NORMAL,
            owner: None,
            stack: None,
            stack_pointer: UnsafeCell::new(0),
            ticks: AtomicU64::new(0),
            level: AtomicUsize::new(0),
            blocked: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            exit_code: AtomicI64::new(0),
            ref_count: AtomicUsize::new(1),
            join_queue: WaitQueue::new(),
            user_context: spin::Mutex::new(None),
            tlocal: UnsafeCell::new([core::ptr::null_mut(); tlocal::MAX_TLOCAL_KEYS]),
        })
    }

    /// Returns the thread's unique id.
    ///
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Returns the thread's base priority.
    ///
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Returns whether the thread has not yet exited.
    ///
    pub fn alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Returns the creator that may join this thread, or
    /// None for a detached thread.
    ///
    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    /// Returns a pointer to the cell holding the thread's
    /// saved stack pointer.
    ///
    pub(crate) fn stack_pointer_cell(&self) -> *mut u64 {
        self.stack_pointer.get()
    }

    /// Returns the top of the thread's kernel stack, used
    /// when a trap arrives while the thread is in user
    /// mode. The initial thread returns the null address,
    /// as it never enters user mode.
    ///
    pub fn kernel_stack_top(&self) -> VirtAddr {
        match &self.stack {
            Some(frame) => VirtAddr::new(frame.end_address() as u64),
            None => VirtAddr::zero(),
        }
    }

    /// Returns the thread's user context, if it runs a
    /// process.
    ///
    pub fn user_context(&self) -> Option<Arc<UserContext>> {
        self.user_context.lock().clone()
    }

    /// Associates the given user context with this thread,
    /// making it a process. The context's reference count
    /// rises by one.
    ///
    pub fn attach_user_context(&self, context: Arc<UserContext>) {
        let mut slot = self.user_context.lock();
        debug_assert!(slot.is_none());
        *slot = Some(context);
    }

    /// Clears the thread's user context. If this was the
    /// last reference, the context's memory and descriptor
    /// resources are released.
    ///
    pub fn detach_user_context(&self) {
        self.user_context.lock().take();
    }

    /// Pushes a value onto the thread's stack. Used to
    /// build the synthetic frame before the thread first
    /// runs.
    ///
    fn push(&self, value: u64) {
        unsafe {
            let cell = self.stack_pointer.get();
            let rsp = (*cell - 8) as *mut u64;
            rsp.write(value);
            *cell = rsp as u64;
        }
    }

    /// Pushes initial values for the registers restored by
    /// the context switch. The actual values of the
    /// general-purpose registers are not important.
    ///
    fn push_switch_registers(&self) {
        self.push(0); // RBP.
        self.push(0); // RBX.
        self.push(0); // R12.
        self.push(0); // R13.
        self.push(0); // R14.
        self.push(0); // R15.
        self.push(DEFAULT_RFLAGS);
    }

    /// Builds the synthetic stack for a kernel-mode-only
    /// thread.
    ///
    /// When first switched to, the thread "returns" into
    /// the launch stub, which enables interrupts and calls
    /// `entry_point` with `arg`. If the entry point
    /// returns, the stub exits the thread with code 0.
    ///
    fn setup_kernel_thread(&self, entry_point: fn(u64), arg: u64) {
        self.push(arg);
        self.push(entry_point as usize as u64);
        self.push(switch::launch_kernel_thread as usize as u64);
        self.push_switch_registers();
    }

    /// Builds the synthetic stack for a thread that starts
    /// in user mode.
    ///
    /// The frame mirrors a trap taken just before the
    /// process's entry instruction: user code and data
    /// selectors, the user stack pointer, and the entry
    /// address, with `rsi` preloaded with the argument
    /// block's user address.
    ///
    fn setup_user_thread(&self, context: &UserContext) {
        let (user_code, user_data) = segmentation::user_selectors();
        let cs = user_code.0 as u64;
        let ds = user_data.0 as u64;

        // The trap frame popped by iretq.
        self.push(ds); // SS.
        self.push(context.initial_stack_pointer()); // User RSP.
        self.push(USER_RFLAGS);
        self.push(cs);
        self.push(context.entry_address()); // User RIP.

        // Values consumed by the launch stub.
        self.push(ds);
        self.push(context.argument_block_address()); // RSI.
        self.push(switch::launch_user_thread as usize as u64);
        self.push_switch_registers();
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        // Return the stack to the frame pool. The user
        // context, if any, drops with the struct, which
        // releases the context once its last thread is
        // gone.
        if let Some(frame) = self.stack.take() {
            physmem::free_frame(frame);
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("alive", &self.alive())
            .field("blocked", &self.blocked.load(Ordering::SeqCst))
            .field("level", &self.level.load(Ordering::SeqCst))
            .finish()
    }
}

/// Returns the thread that currently has the CPU.
///
/// # Panics
///
/// `current_thread` will panic if the scheduler has not
/// been initialised.
///
pub fn current_thread() -> Arc<Thread> {
    with_atomic(|| {
        CURRENT_THREAD
            .lock()
            .as_ref()
            .expect("current_thread() called before the scheduler was initialised")
            .clone()
    })
}

/// Starts a kernel-mode-only thread, using the given
/// function as its body and passing it `arg`.
///
/// Use `detached` for threads that will never be joined;
/// a non-detached thread must eventually be joined by its
/// creator, or its metadata is never reclaimed.
///
pub fn start_kernel_thread(
    entry_point: fn(u64),
    arg: u64,
    priority: i32,
    detached: bool,
) -> Result<Arc<Thread>, Error> {
    let thread = Thread::create(priority, detached)?;
    thread.setup_kernel_thread(entry_point, arg);
    scheduler::make_runnable_atomic(&thread);
    Ok(thread)
}

/// Starts a user-mode thread (a process) running the given
/// user context.
///
pub fn start_user_thread(
    context: Arc<UserContext>,
    detached: bool,
) -> Result<Arc<Thread>, Error> {
    let thread = Thread::create(PRIORITY_USER, detached)?;
    thread.setup_user_thread(&context);
    thread.attach_user_context(context);
    scheduler::make_runnable_atomic(&thread);
    Ok(thread)
}

/// Called when a reference to the thread is broken.
///
/// When the last reference is dropped, the thread is
/// handed to the reaper for disposal.
///
pub(crate) fn detach_thread(thread: &Arc<Thread>) {
    debug_assert!(in_atomic_section());

    let remaining = thread.ref_count.fetch_sub(1, Ordering::SeqCst) - 1;
    if remaining == 0 {
        crate::reaper::reap_thread(thread.id);
    }
}

/// Exits the current thread with the given exit code.
///
/// Any thread-local destructors run first, then the
/// thread's owner (if any) is woken and the implicit
/// self-reference dropped. Never returns: the scheduler
/// picks another thread and this one is eventually
/// reclaimed by the reaper.
///
pub fn exit(exit_code: i64) -> ! {
    let _token = begin_atomic();

    let current = current_thread();
    current.exit_code.store(exit_code, Ordering::SeqCst);
    current.alive.store(false, Ordering::SeqCst);

    // Clean up any thread-local data.
    tlocal::tlocal_exit(&current);

    // Notify the thread's owner, if any.
    scheduler::wake_up(&current.join_queue);

    // Remove the thread's implicit reference to itself.
    detach_thread(&current);
    drop(current);

    // Since this thread was not placed on any queue, it
    // will not be scheduled again.
    scheduler::schedule();

    unreachable!("exited thread was re-scheduled somehow");
}

/// Waits for the given thread to exit and returns its exit
/// code, dropping the owner's reference to it.
///
/// Only the thread's owner may join it.
///
pub fn join(thread: &Arc<Thread>) -> Result<i64, Error> {
    let current = current_thread();
    if thread.owner != Some(current.id) {
        return Err(Error::AccessDenied);
    }

    let token = begin_atomic();

    // Wait for it to die.
    while thread.alive() {
        scheduler::wait(&thread.join_queue);
    }

    let exit_code = thread.exit_code.load(Ordering::SeqCst);

    // Release our reference to the thread.
    detach_thread(thread);

    end_atomic(token);

    Ok(exit_code)
}

/// Looks up a thread by its process id.
///
/// The thread is only returned if the caller is its owner;
/// anyone else gets None.
///
pub fn lookup(pid: u64) -> Option<Arc<Thread>> {
    with_atomic(|| {
        let current = current_thread();
        let threads = THREADS.lock();
        for thread in threads.values() {
            if thread.id.as_u64() == pid {
                return if thread.owner == Some(current.id) {
                    Some(thread.clone())
                } else {
                    None
                };
            }
        }

        None
    })
}

/// Print the current set of threads and their scheduling
/// state, for debugging.
///
pub fn debug() {
    with_atomic(|| {
        let threads = THREADS.lock();
        for thread in threads.values() {
            serial::println!("{:?}", thread);
        }
    });
}
