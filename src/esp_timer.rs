//! The `esp_timer` subsystem: a fixed table of one-shot/periodic timers plus
//! a single daemon thread, kept intentionally separate from the FreeRTOS
//! software-timer daemon in `rtos.rs` even though the shape is identical —
//! the original keeps the two subsystems independent (`SPEC_FULL.md` §3,
//! §4.4), and unlike the FreeRTOS daemon (which fires every expired timer
//! per wake), this daemon fires only the single earliest timer per wake,
//! matching `examples/original_source/src/emu_timer.c`.
//!
//! `esp_timer_get_time` is deliberately *not* wired to wall-clock time the
//! way the original implements it: per `SPEC_FULL.md` §4.4/§9 it derives
//! from the CPU's cycle-based `virtual_time_us`, which the session supplies
//! on every call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::error::RtosError;

const MAX_TIMERS: usize = 32;
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

struct Entry {
    periodic: bool,
    period_us: u64,
    next_fire: Instant,
    active: bool,
    callback: Box<dyn FnMut() + Send>,
}

/// The esp_timer table and its daemon thread.
pub struct EspTimerDaemon {
    state: Arc<Mutex<Vec<Option<Entry>>>>,
    cond: Arc<Condvar>,
    shutdown: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EspTimerDaemon {
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

    /// Picks the single earliest active timer, waits until it's due (or
    /// 100ms, to re-check shutdown), fires it, then loops — unlike the
    /// FreeRTOS daemon, which scans and fires every expired timer per wake.
    fn daemon_loop(state: &Mutex<Vec<Option<Entry>>>, cond: &Condvar, shutdown: &AtomicBool) {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
            let earliest = {
                let guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                guard
                    .iter()
                    .enumerate()
                    .filter_map(|(i, e)| e.as_ref().filter(|e| e.active).map(|e| (i, e.next_fire)))
                    .min_by_key(|&(_, fire)| fire)
            };

            let Some((index, fire_at)) = earliest else {
                let guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let _ = cond.wait_timeout(guard, SHUTDOWN_POLL);
                continue;
            };

            let now = Instant::now();
            if fire_at > now {
                let wait = (fire_at - now).min(SHUTDOWN_POLL);
                let guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let _ = cond.wait_timeout(guard, wait);
                continue;
            }

            let mut guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let Some(entry) = guard.get_mut(index).and_then(|s| s.as_mut()) else { continue };
            if entry.periodic {
                entry.next_fire = now + Duration::from_micros(entry.period_us);
            } else {
                entry.active = false;
            }
            drop(guard);

            let mut guard = state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(entry) = guard.get_mut(index).and_then(|s| s.as_mut()) {
                (entry.callback)();
            }
        }
    }

    pub fn create(&self, periodic: bool, period_us: u64, callback: Box<dyn FnMut() + Send>) -> Result<u32, RtosError> {
        self.ensure_started();
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = Entry { periodic, period_us, next_fire: Instant::now(), active: false, callback };
        if let Some((i, slot)) = guard.iter_mut().enumerate().find(|(_, s)| s.is_none()) {
            *slot = Some(entry);
            return Ok(i as u32);
        }
        if guard.len() >= MAX_TIMERS {
            return Err(RtosError::TimerTableFull);
        }
        guard.push(Some(entry));
        Ok((guard.len() - 1) as u32)
    }

    pub fn start(&self, id: u32) -> Result<(), RtosError> {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = guard.get_mut(id as usize).and_then(|s| s.as_mut()).ok_or(RtosError::InvalidHandle)?;
        entry.active = true;
        entry.next_fire = Instant::now() + Duration::from_micros(entry.period_us);
        self.cond.notify_all();
        Ok(())
    }

    pub fn stop(&self, id: u32) -> Result<(), RtosError> {
        let mut guard = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = guard.get_mut(id as usize).and_then(|s| s.as_mut()).ok_or(RtosError::InvalidHandle)?;
        entry.active = false;
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

    #[test]
    fn test_periodic_timer_fires_in_expected_range() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let daemon = EspTimerDaemon::new(shutdown);
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let id = daemon.create(true, 50_000, Box::new(move || { c.fetch_add(1, Ordering::SeqCst); })).unwrap();
        daemon.start(id).unwrap();
        std::thread::sleep(Duration::from_millis(280));
        daemon.shutdown();
        let fires = count.load(Ordering::SeqCst);
        assert!((4..=7).contains(&fires), "expected 4..=7 fires, got {fires}");
    }

    #[test]
    fn test_one_shot_timer_fires_once() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let daemon = EspTimerDaemon::new(shutdown);
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let id = daemon.create(false, 20_000, Box::new(move || { c.fetch_add(1, Ordering::SeqCst); })).unwrap();
        daemon.start(id).unwrap();
        std::thread::sleep(Duration::from_millis(150));
        daemon.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delete_invalidates_handle() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let daemon = EspTimerDaemon::new(shutdown);
        let id = daemon.create(false, 1000, Box::new(|| {})).unwrap();
        daemon.delete(id).unwrap();
        assert!(matches!(daemon.stop(id), Err(RtosError::InvalidHandle)));
    }
}
