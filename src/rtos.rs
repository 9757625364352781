//! Host-side FreeRTOS runtime: the concurrency primitives the stub fabric's
//! FreeRTOS pack binds guest `xTaskCreate`/`xQueue*`/`xSemaphore*`/
//! `xEventGroup*`/`xTimer*` calls to (`SPEC_FULL.md` §3, §4.5). Every object
//! is slot-allocated in a fixed-size table and addressed by guests as a
//! small opaque integer handle, exactly the way the original maps FreeRTOS's
//! opaque pointers onto host pthread primitives — the table replaces the
//! pointer cast (DESIGN.md §9 "opaque void-pointer handles").
//!
//! Nothing here is reachable from the interpreter directly; only stub code
//! calls into it, synchronously, from the CPU thread.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::RtosError;

/// Tick period used to convert guest tick counts to real/virtual durations.
pub const TICK_PERIOD_MS: u64 = 1;
/// Guest's `portMAX_DELAY` sentinel: block forever.
pub const PORT_MAX_DELAY: u32 = 0xFFFF_FFFF;
/// Slice used by the deadline helper so every wait can re-check shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// An absolute wait deadline, or "wait forever". Every blocking primitive
/// below is built on this (DESIGN.md §9 "dynamic deadline math").
#[derive(Debug, Clone, Copy)]
pub enum Deadline {
    Infinite,
    At(Instant),
}

impl Deadline {
    #[must_use]
    pub fn from_ticks(ticks: u32) -> Self {
        if ticks == PORT_MAX_DELAY {
            Self::Infinite
        } else {
            Self::At(Instant::now() + Duration::from_millis(u64::from(ticks) * TICK_PERIOD_MS))
        }
    }

    fn remaining(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::At(at) => Some(at.saturating_duration_since(Instant::now())),
        }
    }

    fn is_past(self) -> bool {
        matches!(self, Self::At(at) if Instant::now() >= at)
    }
}

/// Waits on `cond`/`guard` in ≤100ms slices until `predicate` holds, the
/// deadline passes, or `shutdown` flips true. Returns `true` if the
/// predicate was observed true.
fn wait_with_deadline<'a, T, F>(
    cond: &Condvar,
    mut guard: std::sync::MutexGuard<'a, T>,
    shutdown: &AtomicBool,
    deadline: Deadline,
    mut predicate: F,
) -> (std::sync::MutexGuard<'a, T>, bool)
where
    F: FnMut(&T) -> bool,
{
    loop {
        if predicate(&guard) {
            return (guard, true);
        }
        if shutdown.load(Ordering::SeqCst) {
            return (guard, false);
        }
        if deadline.is_past() {
            return (guard, false);
        }
        let slice = deadline.remaining().map_or(SHUTDOWN_POLL, |r| r.min(SHUTDOWN_POLL));
        let (g, _timeout) = cond.wait_timeout(guard, slice).unwrap_or_else(std::sync::PoisonError::into_inner);
        guard = g;
    }
}

/// Shared shutdown flag + broadcast condvar used to wake every blocked
/// runtime primitive when the session tears down.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

struct RuntimeInner {
    shutdown: Arc<AtomicBool>,
    tasks: Mutex<Vec<TaskSlot>>,
    /// Guest-visible tick counter (`xTaskGetTickCount`). Advanced explicitly
    /// by the FreeRTOS pack's `vTaskDelay` stub rather than derived from host
    /// wall time, so a guest observes exactly the ticks it asked to wait for
    /// regardless of how long the host's `delay_real_briefly` actually took
    /// (`SPEC_FULL.md` §5, §8 scenario 7).
    ticks: AtomicU64,
    /// Set by `advance_ticks` (a task voluntarily yielding), consumed by
    /// `take_preemption_tick`: the moment a delay advances the guest clock
    /// is also the moment it's safe to hand a parked core to the next
    /// queued task.
    preempt_tick: AtomicBool,
}

struct TaskSlot {
    join: Option<JoinHandle<()>>,
    alive: bool,
}

impl Runtime {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                shutdown: Arc::new(AtomicBool::new(false)),
                tasks: Mutex::new(Vec::new()),
                ticks: AtomicU64::new(0),
                preempt_tick: AtomicBool::new(false),
            }),
        }
    }

    /// The shared shutdown flag, handed to each runtime object at creation
    /// so it can unblock its own waiters when the session tears down.
    #[must_use]
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.shutdown)
    }

    /// The guest's view of `xTaskGetTickCount`: a counter advanced only by
    /// `advance_ticks`, not wall time.
    #[must_use]
    pub fn tick_count(&self) -> u32 {
        self.inner.ticks.load(Ordering::SeqCst) as u32
    }

    /// Fast-forwards the tick counter by `n`, called by `vTaskDelay`'s stub
    /// with the full requested tick count regardless of how briefly the
    /// calling thread actually slept.
    pub fn advance_ticks(&self, n: u32) {
        self.inner.ticks.fetch_add(u64::from(n), Ordering::SeqCst);
        self.inner.preempt_tick.store(true, Ordering::SeqCst);
    }

    /// Consumes a pending scheduler-tick signal. `true` at most once per
    /// `advance_ticks` call, letting the session treat a task's voluntary
    /// delay as a cooperative hand-off point to the next queued task.
    pub fn take_preemption_tick(&self) -> bool {
        self.inner.preempt_tick.swap(false, Ordering::SeqCst)
    }

    /// Spawns a host thread for a guest task-create call. `alive` tracks
    /// whether the task has been asked to stop (checked cooperatively, as
    /// the original's pthreads are never forcibly killed).
    pub fn spawn_task<F: FnOnce() + Send + 'static>(&self, body: F) -> Result<usize, RtosError> {
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(slot) = tasks.iter_mut().find(|t| !t.alive) {
            slot.join = Some(std::thread::spawn(body));
            slot.alive = true;
            return Ok(tasks.len() - 1);
        }
        const MAX_TASKS: usize = 32;
        if tasks.len() >= MAX_TASKS {
            return Err(RtosError::TaskTableFull);
        }
        tasks.push(TaskSlot { join: Some(std::thread::spawn(body)), alive: true });
        Ok(tasks.len() - 1)
    }

    /// Signals shutdown, wakes everything waiting on the shutdown flag, and
    /// joins every task thread. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for slot in tasks.iter_mut() {
            if let Some(handle) = slot.join.take() {
                let _ = handle.join();
            }
            slot.alive = false;
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// `vTaskDelay`-style fast-forward: briefly parks the calling (CPU) thread
/// while letting the caller separately advance virtual time by the full
/// tick duration, regardless of how long the real sleep took
/// (`SPEC_FULL.md` §5).
pub fn delay_real_briefly() {
    std::thread::sleep(Duration::from_millis(1));
}

/// Which kind of semaphore a `Semaphore` was created as; governs whether
/// `give` bumps a count or just toggles a binary flag, and whether `take`
/// honors reentrancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreKind {
    Mutex,
    Binary,
    Counting,
    Recursive,
}

struct SemaphoreState {
    count: u32,
    max_count: u32,
    owner: Option<std::thread::ThreadId>,
    recurse_depth: u32,
}

/// A mutex/binary/counting/recursive semaphore, all unified behind one
/// struct per `SPEC_FULL.md` §3's data model.
pub struct Semaphore {
    kind: SemaphoreKind,
    mutex: Mutex<SemaphoreState>,
    cond: Condvar,
    shutdown: Arc<AtomicBool>,
}

impl Semaphore {
    #[must_use]
    pub fn new(kind: SemaphoreKind, initial: u32, max_count: u32, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            kind,
            mutex: Mutex::new(SemaphoreState { count: initial, max_count, owner: None, recurse_depth: 0 }),
            cond: Condvar::new(),
            shutdown,
        }
    }

    /// Blocking (or `ticks=0` non-blocking) take. Recursive semaphores are
    /// reentrant for the calling thread: a nested take by the owner bumps
    /// `recurse_depth` without touching `count`.
    pub fn take(&self, deadline: Deadline) -> Result<(), RtosError> {
        let this_thread = std::thread::current().id();
        let mut guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if self.kind == SemaphoreKind::Recursive && guard.owner == Some(this_thread) {
            guard.recurse_depth += 1;
            return Ok(());
        }

        let (mut guard, ok) =
            wait_with_deadline(&self.cond, guard, &self.shutdown, deadline, |s: &SemaphoreState| s.count > 0);
        if !ok {
            return Err(RtosError::TimedOut);
        }
        guard.count -= 1;
        if self.kind == SemaphoreKind::Recursive || self.kind == SemaphoreKind::Mutex {
            guard.owner = Some(this_thread);
            guard.recurse_depth = 1;
        }
        Ok(())
    }

    /// Non-blocking give. Returns `Err(SemaphoreSaturated)` if already at
    /// `max_count` (`SPEC_FULL.md` §8 scenario 4).
    pub fn give(&self) -> Result<(), RtosError> {
        let this_thread = std::thread::current().id();
        let mut guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        if self.kind == SemaphoreKind::Recursive && guard.owner == Some(this_thread) && guard.recurse_depth > 1 {
            guard.recurse_depth -= 1;
            return Ok(());
        }
        if guard.count >= guard.max_count {
            return Err(RtosError::SemaphoreSaturated);
        }
        guard.count += 1;
        if guard.owner == Some(this_thread) {
            guard.owner = None;
            guard.recurse_depth = 0;
        }
        self.cond.notify_one();
        Ok(())
    }
}

/// A fixed-capacity ring-buffer queue of `item_size`-byte items, stored as
/// raw bytes (the stub fabric copies guest memory in and out).
pub struct Queue {
    mutex: Mutex<QueueState>,
    cond_recv: Condvar,
    cond_send: Condvar,
    item_size: usize,
    capacity: usize,
    shutdown: Arc<AtomicBool>,
}

struct QueueState {
    items: VecDeque<Vec<u8>>,
}

impl Queue {
    #[must_use]
    pub fn new(item_size: usize, capacity: usize, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            mutex: Mutex::new(QueueState { items: VecDeque::with_capacity(capacity) }),
            cond_recv: Condvar::new(),
            cond_send: Condvar::new(),
            item_size,
            capacity,
            shutdown,
        }
    }

    #[must_use]
    pub fn item_size(&self) -> usize {
        self.item_size
    }

    pub fn send_back(&self, item: Vec<u8>, deadline: Deadline) -> Result<(), RtosError> {
        self.send(item, deadline, false)
    }

    pub fn send_front(&self, item: Vec<u8>, deadline: Deadline) -> Result<(), RtosError> {
        self.send(item, deadline, true)
    }

    fn send(&self, item: Vec<u8>, deadline: Deadline, front: bool) -> Result<(), RtosError> {
        let guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (mut guard, ok) =
            wait_with_deadline(&self.cond_send, guard, &self.shutdown, deadline, |s: &QueueState| s.items.len() < self.capacity);
        if !ok {
            return Err(RtosError::QueueFull);
        }
        if front {
            guard.items.push_front(item);
        } else {
            guard.items.push_back(item);
        }
        self.cond_recv.notify_one();
        Ok(())
    }

    /// `xQueueOverwrite`: for capacity-1 queues, discards whatever is
    /// present (if anything) and inserts unconditionally.
    pub fn overwrite(&self, item: Vec<u8>) {
        let mut guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.items.clear();
        guard.items.push_back(item);
        self.cond_recv.notify_one();
    }

    pub fn receive(&self, deadline: Deadline) -> Result<Vec<u8>, RtosError> {
        let guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (mut guard, ok) =
            wait_with_deadline(&self.cond_recv, guard, &self.shutdown, deadline, |s: &QueueState| !s.items.is_empty());
        if !ok {
            return Err(RtosError::QueueEmpty);
        }
        let item = guard.items.pop_front().expect("predicate guarantees a front item");
        self.cond_send.notify_one();
        Ok(item)
    }

    /// Copies the head item without removing it.
    pub fn peek(&self, deadline: Deadline) -> Result<Vec<u8>, RtosError> {
        let guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (guard, ok) =
            wait_with_deadline(&self.cond_recv, guard, &self.shutdown, deadline, |s: &QueueState| !s.items.is_empty());
        if !ok {
            return Err(RtosError::QueueEmpty);
        }
        Ok(guard.items.front().expect("predicate guarantees a front item").clone())
    }

    /// Empties the queue and wakes every blocked sender.
    pub fn reset(&self) {
        let mut guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.items.clear();
        self.cond_send.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner).items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// How an event group's `wait_bits` predicate is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    All,
    Any,
}

/// A 32-bit event group: set/clear bits, and wait for a mask under an
/// all-or-any predicate, optionally clearing the matched bits on success.
pub struct EventGroup {
    mutex: Mutex<u32>,
    cond: Condvar,
    shutdown: Arc<AtomicBool>,
}

impl EventGroup {
    #[must_use]
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self { mutex: Mutex::new(0), cond: Condvar::new(), shutdown }
    }

    /// Sets `bits` and returns the bits observed *after* the set, matching
    /// `xEventGroupSetBits`'s return contract.
    pub fn set_bits(&self, bits: u32) -> u32 {
        let mut guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard |= bits;
        let after = *guard;
        drop(guard);
        self.cond.notify_all();
        after
    }

    /// Clears `bits` and returns the bits observed *before* the clear,
    /// matching `xEventGroupClearBits`'s return contract.
    pub fn clear_bits(&self, bits: u32) -> u32 {
        let mut guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = *guard;
        *guard &= !bits;
        before
    }

    #[must_use]
    pub fn get_bits(&self) -> u32 {
        *self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Waits for `mask` under `mode`, optionally clearing the matched bits
    /// on success. Returns the bits observed satisfying the predicate, or
    /// the last observed bits on timeout.
    pub fn wait_bits(&self, mask: u32, mode: WaitMode, clear_on_exit: bool, deadline: Deadline) -> u32 {
        let predicate = |bits: &u32| match mode {
            WaitMode::All => *bits & mask == mask,
            WaitMode::Any => *bits & mask != 0,
        };
        let guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let (mut guard, satisfied) = wait_with_deadline(&self.cond, guard, &self.shutdown, deadline, predicate);
        let observed = *guard;
        if satisfied && clear_on_exit {
            *guard &= !mask;
        }
        observed
    }
}

/// A software timer. Firing is driven by a single daemon thread shared by
/// every timer created through this module (`SPEC_FULL.md` §4.5), matching
/// the original's single-timer-daemon shape rather than one thread per
/// timer.
pub struct TimerHandle {
    pub id: u32,
}

struct TimerEntry {
    period_ms: u64,
    auto_reload: bool,
    next_fire: Instant,
    active: bool,
    callback: Box<dyn FnMut() + Send>,
}

/// Table of software timers plus the daemon thread that fires them.
/// Distinct from `esp_timer`'s table even though the shape is identical,
/// matching the original keeping the two subsystems independent.
pub struct TimerDaemon {
    state: Arc<Mutex<Vec<Option<TimerEntry>>>>,
    cond: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerDaemon {
    const MAX_TIMERS: usize = 32;

    #[must_use]
    pub fn new(shutdown: Arc<AtomicBool>) -> Self {
        Self { state: Arc::new(Mutex::new(Vec::new())), cond: Arc::new(Condvar::new()), shutdown, thread: Mutex::new(None) }
    }

    fn ensure_started(&self) {
        let mut thread = self.thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if thread.is_some() {
            return;
        }
        let state = Arc::clone(&self.state);
        let cond = Arc::clone(&self.cond);
        let shutdown = Arc::clone(&self.shutdown);
        *thread = Some(std::thread::spawn(move || Self::daemon_loop(&state, &cond, &shutdown)));
    }

    fn daemon_loop(state: &Mutex<Vec<Option<TimerEntry>>>, cond: &Condvar, shutdown: &AtomicBool) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            let mut fired: Vec<usize> = Vec::new();
            {
                let mut guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let now = Instant::now();
                for (i, slot) in guard.iter_mut().enumerate() {
                    if let Some(timer) = slot {
                        if timer.active && now >= timer.next_fire {
                            fired.push(i);
                        }
                    }
                }
                for &i in &fired {
                    if let Some(timer) = guard[i].as_mut() {
                        if timer.auto_reload {
                            timer.next_fire = now + Duration::from_millis(timer.period_ms);
                        } else {
                            timer.active = false;
                        }
                    }
                }
            }
            // Run callbacks with the table lock released, per SPEC_FULL.md §4.5.
            for i in fired {
                let mut guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(timer) = guard[i].as_mut() {
                    (timer.callback)();
                }
            }

            let guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let (_guard, _) = wait_with_deadline(cond, guard, shutdown, Deadline::At(Instant::now() + SHUTDOWN_POLL), |_| false);
        }
    }

    /// Creates a timer in the first free slot. Does not start it.
    pub fn create(&self, period_ms: u64, auto_reload: bool, callback: Box<dyn FnMut() + Send>) -> Result<u32, RtosError> {
        self.ensure_started();
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = TimerEntry { period_ms, auto_reload, next_fire: Instant::now(), active: false, callback };
        if let Some((i, slot)) = guard.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            *slot = Some(entry);
            return Ok(i as u32);
        }
        if guard.len() >= Self::MAX_TIMERS {
            return Err(RtosError::TimerTableFull);
        }
        guard.push(Some(entry));
        Ok((guard.len() - 1) as u32)
    }

    pub fn start(&self, id: u32) -> Result<(), RtosError> {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let timer = guard.get_mut(id as usize).and_then(|s| s.as_mut()).ok_or(RtosError::InvalidHandle)?;
        timer.active = true;
        timer.next_fire = Instant::now() + Duration::from_millis(timer.period_ms);
        self.cond.notify_all();
        Ok(())
    }

    pub fn stop(&self, id: u32) -> Result<(), RtosError> {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let timer = guard.get_mut(id as usize).and_then(|s| s.as_mut()).ok_or(RtosError::InvalidHandle)?;
        timer.active = false;
        Ok(())
    }

    pub fn delete(&self, id: u32) -> Result<(), RtosError> {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let slot = guard.get_mut(id as usize).ok_or(RtosError::InvalidHandle)?;
        if slot.is_none() {
            return Err(RtosError::InvalidHandle);
        }
        *slot = None;
        Ok(())
    }

    pub fn shutdown(&self) {
        self.cond.notify_all();
        if let Some(handle) = self.thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner).take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn shutdown_flag() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_scenario_vtaskdelay_advances_ticks_by_requested_amount() {
        let runtime = Runtime::new();
        let before = runtime.tick_count();
        runtime.advance_ticks(100);
        assert_eq!(runtime.tick_count(), before + 100);
    }

    #[test]
    fn test_preemption_tick_set_by_advance_ticks_and_consumed_once() {
        let runtime = Runtime::new();
        assert!(!runtime.take_preemption_tick());
        runtime.advance_ticks(5);
        assert!(runtime.take_preemption_tick());
        assert!(!runtime.take_preemption_tick());
    }

    #[test]
    fn test_counting_semaphore_saturates_at_max() {
        let sem = Semaphore::new(SemaphoreKind::Counting, 0, 3, shutdown_flag());
        assert!(sem.give().is_ok());
        assert!(sem.give().is_ok());
        assert!(sem.give().is_ok());
        assert!(matches!(sem.give(), Err(RtosError::SemaphoreSaturated)));
    }

    #[test]
    fn test_counting_semaphore_take_fails_when_empty() {
        let sem = Semaphore::new(SemaphoreKind::Counting, 0, 3, shutdown_flag());
        assert!(sem.take(Deadline::from_ticks(0)).is_err());
        sem.give().unwrap();
        assert!(sem.take(Deadline::from_ticks(0)).is_ok());
    }

    #[test]
    fn test_recursive_mutex_reentry_does_not_touch_count() {
        let sem = Semaphore::new(SemaphoreKind::Recursive, 1, 1, shutdown_flag());
        sem.take(Deadline::from_ticks(0)).unwrap();
        sem.take(Deadline::from_ticks(0)).unwrap();
        sem.give().unwrap();
        // One more give is needed before another thread could take it.
        assert!(matches!(sem.give(), Ok(())));
    }

    #[test]
    fn test_queue_fifo_order() {
        let queue = Queue::new(4, 4, shutdown_flag());
        queue.send_back(vec![1], Deadline::from_ticks(0)).unwrap();
        queue.send_back(vec![2], Deadline::from_ticks(0)).unwrap();
        assert_eq!(queue.receive(Deadline::from_ticks(0)).unwrap(), vec![1]);
        assert_eq!(queue.receive(Deadline::from_ticks(0)).unwrap(), vec![2]);
    }

    #[test]
    fn test_queue_send_to_front_observed_first() {
        let queue = Queue::new(4, 4, shutdown_flag());
        queue.send_back(vec![1], Deadline::from_ticks(0)).unwrap();
        queue.send_front(vec![9], Deadline::from_ticks(0)).unwrap();
        assert_eq!(queue.receive(Deadline::from_ticks(0)).unwrap(), vec![9]);
    }

    #[test]
    fn test_queue_full_returns_error() {
        let queue = Queue::new(4, 1, shutdown_flag());
        queue.send_back(vec![1], Deadline::from_ticks(0)).unwrap();
        assert!(matches!(queue.send_back(vec![2], Deadline::from_ticks(0)), Err(RtosError::QueueFull)));
    }

    #[test]
    fn test_queue_overwrite_replaces_single_slot() {
        let queue = Queue::new(4, 1, shutdown_flag());
        queue.send_back(vec![1], Deadline::from_ticks(0)).unwrap();
        queue.overwrite(vec![2]);
        assert_eq!(queue.receive(Deadline::from_ticks(0)).unwrap(), vec![2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_queue_reset_clears_and_wakes_senders() {
        let queue = Queue::new(4, 1, shutdown_flag());
        queue.send_back(vec![1], Deadline::from_ticks(0)).unwrap();
        queue.reset();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_event_group_wait_all_clears_only_requested_bits() {
        let group = EventGroup::new(shutdown_flag());
        group.set_bits(0b111);
        let observed = group.wait_bits(0b011, WaitMode::All, true, Deadline::from_ticks(0));
        assert_eq!(observed & 0b011, 0b011);
        assert_eq!(group.get_bits(), 0b100);
    }

    #[test]
    fn test_event_group_wait_any_succeeds_on_partial_match() {
        let group = EventGroup::new(shutdown_flag());
        group.set_bits(0b010);
        let observed = group.wait_bits(0b011, WaitMode::Any, false, Deadline::from_ticks(0));
        assert_eq!(observed & 0b010, 0b010);
    }

    #[test]
    fn test_set_bits_returns_bits_after_clear_bits_returns_before() {
        let group = EventGroup::new(shutdown_flag());
        let after_set = group.set_bits(0b001);
        assert_eq!(after_set, 0b001);
        let before_clear = group.clear_bits(0b001);
        assert_eq!(before_clear, 0b001);
        assert_eq!(group.get_bits(), 0);
    }

    #[test]
    fn test_timer_daemon_fires_periodic_timer_in_expected_range() {
        let shutdown = shutdown_flag();
        let daemon = TimerDaemon::new(Arc::clone(&shutdown));
        let fire_count = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&fire_count);
        let id = daemon.create(50, true, Box::new(move || { counter.fetch_add(1, Ordering::SeqCst); })).unwrap();
        daemon.start(id).unwrap();
        std::thread::sleep(Duration::from_millis(280));
        daemon.shutdown();
        let fires = fire_count.load(Ordering::SeqCst);
        assert!((4..=7).contains(&fires), "expected 4..=7 fires, got {fires}");
    }

    #[test]
    fn test_timer_delete_then_operate_is_invalid_handle() {
        let shutdown = shutdown_flag();
        let daemon = TimerDaemon::new(shutdown);
        let id = daemon.create(10, false, Box::new(|| {})).unwrap();
        daemon.delete(id).unwrap();
        assert!(matches!(daemon.start(id), Err(RtosError::InvalidHandle)));
    }
}
