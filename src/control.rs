//! State shared between the training thread and the web front end.

use crate::game::GameView;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

pub const MAX_LOG_MESSAGES: usize = 100;
const PAUSE_POLL: Duration = Duration::from_millis(100);
const MIN_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(50);
const SPEED_RANGE: (f32, f32) = (0.1, 100.0);

/// Run/pause/speed flags polled by the training loop.
pub struct TrainingControl {
    running: AtomicBool,
    paused: AtomicBool,
    speed: AtomicU32, // f32 bits
}

impl Default for TrainingControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainingControl {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            speed: AtomicU32::new(1.0f32.to_bits()),
        }
    }

    /// Called at the top of every step. Blocks while paused; `false` means stop now.
    pub fn checkpoint(&self) -> bool {
        while self.paused.load(Ordering::Acquire) && self.running.load(Ordering::Acquire) {
            thread::sleep(PAUSE_POLL);
        }
        self.running.load(Ordering::Acquire)
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn speed(&self) -> f32 {
        f32::from_bits(self.speed.load(Ordering::Acquire))
    }

    /// Clamped to a sane range; non-finite values are ignored. Returns the applied speed.
    pub fn set_speed(&self, speed: f32) -> f32 {
        if speed.is_finite() {
            let s = speed.clamp(SPEED_RANGE.0, SPEED_RANGE.1);
            self.speed.store(s.to_bits(), Ordering::Release);
        }
        self.speed()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String, // HH:MM:SS
    pub message: String,
}

/// Everything the dashboard shows. Written by the training thread only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingSnapshot {
    pub running: bool,
    pub episode: usize,
    pub total_episodes: usize,
    pub score: u32,
    pub avg_score: f32,
    pub epsilon: f32,
    pub step: usize,
    pub total_steps: u64,
    pub timeouts: usize,
    pub scores: Vec<f32>,
    pub avg_scores: Vec<f32>,
    pub epsilons: Vec<f32>,
    pub losses: Vec<f32>,
    pub game: Option<GameView>,
}

/// Snapshot plus control flags and recent log lines, as served by `/api/state`.
#[derive(Debug, Clone, Serialize)]
pub struct StateView {
    #[serde(flatten)]
    pub snapshot: TrainingSnapshot,
    pub paused: bool,
    pub speed: f32,
    pub log_messages: Vec<LogEntry>,
}

pub struct SharedState {
    pub control: TrainingControl,
    snapshot: RwLock<TrainingSnapshot>,
    logs: Mutex<VecDeque<LogEntry>>,
    last_update: Mutex<Option<Instant>>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            control: TrainingControl::new(),
            snapshot: RwLock::new(TrainingSnapshot { running: true, ..Default::default() }),
            logs: Mutex::new(VecDeque::with_capacity(MAX_LOG_MESSAGES)),
            last_update: Mutex::new(None),
        }
    }

    /// Applies `f` under one write lock. Non-forced updates are dropped when the
    /// previous one was less than 50 ms ago. Returns whether `f` ran.
    pub fn update<F: FnOnce(&mut TrainingSnapshot)>(&self, force: bool, f: F) -> bool {
        {
            let mut last = match self.last_update.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !force {
                if let Some(t) = *last {
                    if t.elapsed() < MIN_SNAPSHOT_INTERVAL {
                        return false;
                    }
                }
            }
            *last = Some(Instant::now());
        }
        let mut snap = match self.snapshot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut snap);
        true
    }

    pub fn snapshot(&self) -> TrainingSnapshot {
        match self.snapshot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn view(&self) -> StateView {
        StateView {
            snapshot: self.snapshot(),
            paused: self.control.is_paused(),
            speed: self.control.speed(),
            log_messages: self.logs(),
        }
    }

    /// Appends a timestamped message, keeping the newest 100.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        let entry = LogEntry { timestamp: chrono::Local::now().format("%H:%M:%S").to_string(), message };
        let mut logs = match self.logs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if logs.len() == MAX_LOG_MESSAGES {
            logs.pop_front();
        }
        logs.push_back(entry);
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        match self.logs.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn checkpoint_blocks_while_paused() {
        let control = Arc::new(TrainingControl::new());
        control.pause();
        let c = control.clone();
        let handle = thread::spawn(move || {
            let start = Instant::now();
            let keep_going = c.checkpoint();
            (keep_going, start.elapsed())
        });
        thread::sleep(Duration::from_millis(250));
        control.resume();
        let (keep_going, waited) = handle.join().unwrap();
        assert!(keep_going);
        assert!(waited >= Duration::from_millis(200));
    }

    #[test]
    fn stop_releases_paused_loop() {
        let control = TrainingControl::new();
        control.pause();
        control.stop();
        assert!(!control.checkpoint());
    }

    #[test]
    fn speed_is_clamped() {
        let control = TrainingControl::new();
        assert_eq!(control.speed(), 1.0);
        assert_eq!(control.set_speed(4.0), 4.0);
        assert_eq!(control.set_speed(0.0), 0.1);
        assert_eq!(control.set_speed(f32::NAN), 0.1);
    }

    #[test]
    fn log_ring_keeps_newest_entries() {
        let state = SharedState::new();
        for i in 0..(MAX_LOG_MESSAGES + 5) {
            state.log(format!("msg {}", i));
        }
        let logs = state.logs();
        assert_eq!(logs.len(), MAX_LOG_MESSAGES);
        assert_eq!(logs[0].message, "msg 5");
        assert_eq!(logs[MAX_LOG_MESSAGES - 1].message, format!("msg {}", MAX_LOG_MESSAGES + 4));
    }

    #[test]
    fn updates_are_rate_limited_unless_forced() {
        let state = SharedState::new();
        assert!(state.update(false, |s| s.episode = 1));
        assert!(!state.update(false, |s| s.episode = 2));
        assert_eq!(state.snapshot().episode, 1);
        assert!(state.update(true, |s| s.episode = 3));
        assert_eq!(state.snapshot().episode, 3);
    }

    #[test]
    fn view_carries_flags_and_logs() {
        let state = SharedState::new();
        state.control.pause();
        state.log("hello");
        let v = state.view();
        assert!(v.paused);
        assert_eq!(v.log_messages.len(), 1);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json["paused"], true);
        assert_eq!(json["episode"], 0);
    }
}
