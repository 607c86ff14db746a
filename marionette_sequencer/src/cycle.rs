//! Fixed-rate playback tick loop: interpolate → validate → dispatch.
//!
//! One dedicated task owns the loop. Pacing uses absolute deadlines
//! (`epoch + n·period`) so jitter never accumulates into drift, and the
//! wait doubles as the command receive point so control transitions take
//! effect before the next tick executes. Per-channel faults are isolated;
//! only total sink loss across consecutive ticks stops a playback.
//!
//! ## RT Setup
//!
//! With the `rt` feature the task can be promoted before entering the
//! loop: lock memory pages, prefault the stack, pin to a core, and switch
//! to `SCHED_FIFO`. Without the feature all RT calls are no-ops and the
//! loop paces itself with ordinary monotonic waits.

use crate::command::ControlCommand;
use crate::config::{SequencerSettings, StopBehavior};
use crate::safety::{RejectionReason, SafetyValidator};
use crate::sequence::Sequence;
use crate::state::{PlaybackEvent, PlaybackMachine, TransitionResult};
use marionette_common::consts::MAX_CHANNELS;
use marionette_common::sink::ActuatorSink;
use marionette_common::status::{AlertFlags, PlaybackStatus, StatusSnapshot, TickStats};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-tick timing statistics.
///
/// Updated every tick with no allocation.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total ticks executed.
    pub tick_count: u64,
    /// Last tick body duration [ns].
    pub last_tick_ns: u64,
    /// Minimum tick body duration [ns].
    pub min_tick_ns: u64,
    /// Maximum tick body duration [ns].
    pub max_tick_ns: u64,
    /// Running sum for average computation.
    pub sum_tick_ns: u64,
    /// Ticks that exceeded the frame period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns] (actual wake past the deadline).
    pub max_latency_ns: u64,
}

impl CycleStats {
    /// Create a new zeroed stats instance.
    pub const fn new() -> Self {
        Self {
            tick_count: 0,
            last_tick_ns: 0,
            min_tick_ns: u64::MAX,
            max_tick_ns: 0,
            sum_tick_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
        }
    }

    /// Record a tick duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: u64, latency_ns: u64) {
        self.tick_count += 1;
        self.last_tick_ns = duration_ns;
        if duration_ns < self.min_tick_ns {
            self.min_tick_ns = duration_ns;
        }
        if duration_ns > self.max_tick_ns {
            self.max_tick_ns = duration_ns;
        }
        self.sum_tick_ns += duration_ns;
        if latency_ns > self.max_latency_ns {
            self.max_latency_ns = latency_ns;
        }
    }

    /// Average tick time [ns] (returns 0 if no ticks).
    #[inline]
    pub fn avg_tick_ns(&self) -> u64 {
        if self.tick_count == 0 {
            0
        } else {
            self.sum_tick_ns / self.tick_count
        }
    }

    /// Compact summary for the status mirror.
    pub fn summary(&self) -> TickStats {
        TickStats {
            ticks: self.tick_count,
            last_tick_us: self.last_tick_ns / 1_000,
            max_tick_us: if self.tick_count == 0 {
                0
            } else {
                self.max_tick_ns / 1_000
            },
            avg_tick_us: self.avg_tick_ns() / 1_000,
            overruns: self.overruns,
        }
    }
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

/// Errors during RT task promotion.
#[derive(Debug, thiserror::Error)]
#[error("RT setup error: {0}")]
pub struct RtSetupError(String);

/// Lock all current and future memory pages (prevent page faults in the loop).
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), RtSetupError> {
    use nix::sys::mman::{MlockAllFlags, mlockall};
    mlockall(MlockAllFlags::MCL_CURRENT | MlockAllFlags::MCL_FUTURE)
        .map_err(|e| RtSetupError(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), RtSetupError> {
    Ok(()) // No-op in simulation mode
}

/// Prefault stack pages to prevent page faults during playback.
fn prefault_stack() {
    // Touch 256 KB of stack to prefault pages.
    let mut buf = [0u8; 256 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: writing a byte to owned stack memory.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

/// Pin the current thread to a specific CPU core.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), RtSetupError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| RtSetupError(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| RtSetupError(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), RtSetupError> {
    Ok(()) // No-op in simulation mode
}

/// Set SCHED_FIFO with the given RT priority.
///
/// No-op when the `rt` feature is not enabled.
#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), RtSetupError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: plain syscall on the current thread with a valid param struct.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(RtSetupError(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), RtSetupError> {
    Ok(()) // No-op in simulation mode
}

/// Perform the full RT setup sequence for the tick task.
///
/// In simulation mode (no `rt` feature), all RT calls are no-ops.
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), RtSetupError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Playback Session ──────────────────────────────────────────────

/// Mutable state of one playback, created at `Play` and destroyed when the
/// playback reaches a terminal state.
struct Session {
    sequence: Arc<Sequence>,
    machine: PlaybackMachine,
    /// Monotonic origin of sequence time (advanced on loop wrap / resume).
    origin: Instant,
    /// Elapsed offset preserved across pause/resume.
    elapsed_at_pause: Duration,
    /// Scheduling anchor for absolute tick deadlines.
    epoch: Instant,
    /// Ticks scheduled since `epoch`.
    tick_index: u64,
    loops_completed: u32,
    /// Consecutive ticks in which every attempted dispatch failed.
    consecutive_comm_failures: u32,
    stats: CycleStats,
}

impl Session {
    fn start(sequence: Arc<Sequence>, now: Instant) -> Self {
        let mut machine = PlaybackMachine::new();
        machine.handle_event(PlaybackEvent::Play);
        Self {
            sequence,
            machine,
            origin: now,
            elapsed_at_pause: Duration::ZERO,
            epoch: now,
            tick_index: 0,
            loops_completed: 0,
            consecutive_comm_failures: 0,
            stats: CycleStats::new(),
        }
    }

    fn frame_period(&self) -> Duration {
        self.sequence.frame_period()
    }

    /// Absolute deadline of the next tick.
    fn next_deadline(&self) -> Instant {
        let period_ns = self.frame_period().as_nanos() as u64;
        self.epoch + Duration::from_nanos(period_ns * self.tick_index)
    }

    fn elapsed(&self, now: Instant) -> Duration {
        match self.machine.state() {
            PlaybackStatus::Paused => self.elapsed_at_pause,
            _ => now.saturating_duration_since(self.origin),
        }
    }
}

/// Completion hook invoked with the sequence name.
pub type CompletionHook = Box<dyn Fn(&str) + Send>;

// ─── Tick Runner ────────────────────────────────────────────────────

/// The playback engine's dedicated tick task.
///
/// Owns the command receiver and the active session; shares the validator,
/// sink, and status mirror with the control plane.
pub struct TickRunner {
    cmd_rx: Receiver<ControlCommand>,
    validator: Arc<SafetyValidator>,
    sink: Arc<Mutex<Box<dyn ActuatorSink>>>,
    status: Arc<Mutex<StatusSnapshot>>,
    settings: SequencerSettings,
    on_complete: Option<CompletionHook>,
    session: Option<Session>,
    /// Last position actually written per channel (for `HoldLast`).
    last_commanded: [Option<f64>; MAX_CHANNELS],
}

impl TickRunner {
    /// Assemble a runner from the engine's shared parts.
    pub fn new(
        cmd_rx: Receiver<ControlCommand>,
        validator: Arc<SafetyValidator>,
        sink: Arc<Mutex<Box<dyn ActuatorSink>>>,
        status: Arc<Mutex<StatusSnapshot>>,
        settings: SequencerSettings,
        on_complete: Option<CompletionHook>,
    ) -> Self {
        Self {
            cmd_rx,
            validator,
            sink,
            status,
            settings,
            on_complete,
            session: None,
            last_commanded: [None; MAX_CHANNELS],
        }
    }

    /// Enter the tick loop. Returns when a `Shutdown` command arrives or
    /// the control plane drops its sender.
    pub fn run(mut self) {
        let _guard = CrashGuard {
            validator: Arc::clone(&self.validator),
            sink: Arc::clone(&self.sink),
            status: Arc::clone(&self.status),
            drive_emergency: self.settings.fault_drives_emergency,
        };

        info!("sequencer tick task started");
        loop {
            let ticking = self
                .session
                .as_ref()
                .is_some_and(|s| s.machine.is_running());

            if !ticking {
                // Idle or paused: nothing to schedule, block for a command.
                match self.cmd_rx.recv() {
                    Ok(cmd) => {
                        if self.handle_command(cmd) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                continue;
            }

            // Wait out the absolute deadline, handling commands as they
            // arrive so stop/pause take effect before the next tick.
            if self.wait_for_deadline() {
                break;
            }

            if self
                .session
                .as_ref()
                .is_some_and(|s| s.machine.is_running())
            {
                self.tick_body();
            }
        }
        info!("sequencer tick task exiting");
    }

    /// Sleep until the session's next deadline. Returns true on shutdown.
    fn wait_for_deadline(&mut self) -> bool {
        loop {
            let Some(session) = self.session.as_ref() else {
                return false;
            };
            if !session.machine.is_running() {
                return false;
            }

            let deadline = session.next_deadline();
            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            match self.cmd_rx.recv_timeout(deadline - now) {
                Ok(cmd) => {
                    if self.handle_command(cmd) {
                        return true;
                    }
                }
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return true,
            }
        }
    }

    /// Apply one control command. Returns true on shutdown.
    fn handle_command(&mut self, cmd: ControlCommand) -> bool {
        match cmd {
            ControlCommand::Play(sequence) => {
                // Last-writer-wins: an active playback is displaced.
                if let Some(old) = self.session.take() {
                    if !old.machine.state().is_terminal() {
                        info!(
                            old = old.sequence.name(),
                            new = sequence.name(),
                            "replacing active playback"
                        );
                    }
                }
                info!(sequence = sequence.name(), rate = sequence.frame_rate(), "play");
                let session = Session::start(sequence, Instant::now());
                self.publish(&session, AlertFlags::empty());
                self.session = Some(session);
            }
            ControlCommand::Pause => {
                if let Some(session) = self.session.as_mut() {
                    let now = Instant::now();
                    let elapsed = session.elapsed(now);
                    match session.machine.handle_event(PlaybackEvent::Pause) {
                        TransitionResult::Ok(_) => {
                            session.elapsed_at_pause = elapsed;
                            info!(elapsed_s = elapsed.as_secs_f64(), "paused");
                        }
                        TransitionResult::Rejected(reason) => {
                            debug!(reason, "pause rejected");
                        }
                    }
                }
                if let Some(session) = self.session.as_ref() {
                    self.publish(session, AlertFlags::empty());
                }
            }
            ControlCommand::Resume => {
                if let Some(session) = self.session.as_mut() {
                    match session.machine.handle_event(PlaybackEvent::Resume) {
                        TransitionResult::Ok(_) => {
                            let now = Instant::now();
                            session.origin = now - session.elapsed_at_pause;
                            // Re-anchor scheduling so no missed deadlines pile up.
                            session.epoch = now;
                            session.tick_index = 0;
                            info!("resumed");
                        }
                        TransitionResult::Rejected(reason) => {
                            debug!(reason, "resume rejected");
                        }
                    }
                }
                if let Some(session) = self.session.as_ref() {
                    self.publish(session, AlertFlags::empty());
                }
            }
            ControlCommand::Stop => {
                if let Some(mut session) = self.session.take() {
                    match session.machine.handle_event(PlaybackEvent::Stop) {
                        TransitionResult::Ok(_) => {
                            info!(sequence = session.sequence.name(), "stopped");
                            self.dispatch_stop_positions(&session);
                            self.publish(&session, AlertFlags::empty());
                            // Session dropped: Stopped is terminal.
                        }
                        TransitionResult::Rejected(reason) => {
                            debug!(reason, "stop rejected");
                            self.session = Some(session);
                        }
                    }
                }
            }
            ControlCommand::Shutdown => {
                info!("shutdown command received");
                if let Some(mut session) = self.session.take() {
                    if let TransitionResult::Ok(_) =
                        session.machine.handle_event(PlaybackEvent::Stop)
                    {
                        self.dispatch_stop_positions(&session);
                        self.publish(&session, AlertFlags::empty());
                    }
                }
                return true;
            }
        }
        false
    }

    /// One evaluation-and-dispatch cycle.
    fn tick_body(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };

        let deadline = session.next_deadline();
        let tick_start = Instant::now();
        let latency = tick_start.saturating_duration_since(deadline);
        session.tick_index += 1;

        // Emergency latch forces the playback to Stopped; positions were
        // already written by the direct emergency path.
        if self.validator.emergency_active() {
            session.machine.force_stop();
            warn!("playback stopped by emergency latch");
            self.publish(&session, AlertFlags::EMERGENCY_ACTIVE);
            return; // session dropped
        }

        let duration = Duration::from_secs_f64(session.sequence.duration());
        let mut elapsed = session.elapsed(tick_start);

        // End-of-sequence: wrap or complete.
        while elapsed >= duration {
            if session.sequence.is_looping() {
                // Phase-preserving wrap keeps positions_at(D+ε) == positions_at(ε).
                session.origin += duration;
                session.loops_completed += 1;
                elapsed -= duration;
                debug!(loops = session.loops_completed, "loop wrap");
            } else {
                session.machine.handle_event(PlaybackEvent::Complete);
                info!(sequence = session.sequence.name(), "completed");
                self.publish(&session, AlertFlags::empty());
                if let Some(hook) = self.on_complete.as_ref() {
                    hook(session.sequence.name());
                }
                return; // session dropped
            }
        }

        // Interpolate, validate, dispatch.
        let snapshot = session.sequence.positions_at(elapsed.as_secs_f64());
        let mut alerts = AlertFlags::empty();
        let mut attempted = 0u32;
        let mut sink_failures = 0u32;
        {
            let mut sink = lock_sink(&self.sink);
            for target in &snapshot {
                match self.validator.validate(target.channel_id, target.position_us) {
                    Ok(position_us) => {
                        attempted += 1;
                        match sink.set_channel_position(target.channel_id, position_us) {
                            Ok(()) => {
                                self.last_commanded[target.channel_id as usize] =
                                    Some(position_us);
                            }
                            Err(e) => {
                                sink_failures += 1;
                                alerts |= AlertFlags::SINK_CHANNEL_FAULT;
                                debug!(channel = target.channel_id, error = %e, "dispatch failed");
                            }
                        }
                    }
                    Err(RejectionReason::EmergencyActive) => {
                        // Latch raced the check above; next tick stops.
                        alerts |= AlertFlags::EMERGENCY_ACTIVE;
                    }
                    Err(reason) => {
                        alerts |= AlertFlags::VALIDATION_REJECTED;
                        debug!(channel = target.channel_id, %reason, "validation rejected");
                    }
                }
            }
        }

        // Escalate only on total communication loss, never on a local fault.
        if attempted > 0 && sink_failures == attempted {
            session.consecutive_comm_failures += 1;
        } else {
            session.consecutive_comm_failures = 0;
        }
        if session.consecutive_comm_failures >= self.settings.sink_failure_limit {
            error!(
                consecutive = session.consecutive_comm_failures,
                "total sink failure; stopping playback"
            );
            session.machine.force_stop();
            alerts |= AlertFlags::SINK_COMM_LOST;
            self.publish(&session, alerts);
            return; // session dropped; no stop dispatch, the sink is gone
        }

        let body = tick_start.elapsed();
        if body > session.frame_period() {
            session.stats.overruns += 1;
            alerts |= AlertFlags::TICK_OVERRUN;
            warn!(
                body_us = body.as_micros() as u64,
                period_us = session.frame_period().as_micros() as u64,
                "tick overrun"
            );
        }
        session
            .stats
            .record(body.as_nanos() as u64, latency.as_nanos() as u64);

        self.publish(&session, alerts);
        self.session = Some(session);
    }

    /// Final dispatch after an operator stop, per configured behavior.
    fn dispatch_stop_positions(&mut self, session: &Session) {
        match self.settings.stop_behavior {
            StopBehavior::NoOp => {}
            StopBehavior::HoldLast => {
                let mut sink = lock_sink(&self.sink);
                for channel_id in session.sequence.channel_ids() {
                    let Some(position_us) = self.last_commanded[channel_id as usize] else {
                        continue;
                    };
                    if let Ok(position_us) = self.validator.validate(channel_id, position_us) {
                        if let Err(e) = sink.set_channel_position(channel_id, position_us) {
                            debug!(channel = channel_id, error = %e, "hold-last write failed");
                        }
                    }
                }
            }
            StopBehavior::GoToHome => {
                let homes: Vec<(u8, f64)> = self.validator.with_table(|table| {
                    session
                        .sequence
                        .channel_ids()
                        .filter_map(|id| table.get(id).map(|l| (id, l.home_position_us)))
                        .collect()
                });
                let mut sink = lock_sink(&self.sink);
                for (channel_id, home_us) in homes {
                    if let Ok(position_us) = self.validator.validate(channel_id, home_us) {
                        if let Err(e) = sink.set_channel_position(channel_id, position_us) {
                            debug!(channel = channel_id, error = %e, "go-to-home write failed");
                        }
                    }
                }
            }
        }
    }

    /// Update the status mirror from a session.
    fn publish(&self, session: &Session, new_alerts: AlertFlags) {
        let mut status = lock_status(&self.status);
        status.status = session.machine.state();
        status.sequence = Some(session.sequence.name().to_owned());
        status.elapsed_s = session.elapsed(Instant::now()).as_secs_f64();
        status.loops_completed = session.loops_completed;
        status.emergency_active = self.validator.emergency_active();
        status.alerts |= new_alerts;
        status.stats = session.stats.summary();
    }
}

pub(crate) fn lock_sink(
    sink: &Mutex<Box<dyn ActuatorSink>>,
) -> std::sync::MutexGuard<'_, Box<dyn ActuatorSink>> {
    sink.lock().unwrap_or_else(|poison| poison.into_inner())
}

pub(crate) fn lock_status(
    status: &Mutex<StatusSnapshot>,
) -> std::sync::MutexGuard<'_, StatusSnapshot> {
    status.lock().unwrap_or_else(|poison| poison.into_inner())
}

// ─── Crash Guard ────────────────────────────────────────────────────

/// Safe-state fallback if the tick task dies.
///
/// On panic the guard marks the engine Stopped with a `SEQUENCER_FAULT`
/// alert. Channels hold their last commanded position — no new commands —
/// unless the configuration explicitly requests the emergency path.
struct CrashGuard {
    validator: Arc<SafetyValidator>,
    sink: Arc<Mutex<Box<dyn ActuatorSink>>>,
    status: Arc<Mutex<StatusSnapshot>>,
    drive_emergency: bool,
}

impl Drop for CrashGuard {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            return;
        }
        error!("sequencer tick task panicked; entering safe state");
        {
            let mut status = lock_status(&self.status);
            status.status = PlaybackStatus::Stopped;
            status.alerts |= AlertFlags::SEQUENCER_FAULT;
        }
        if self.drive_emergency {
            let mut sink = lock_sink(&self.sink);
            self.validator.trip_emergency(&mut **sink);
            let mut status = lock_status(&self.status);
            status.alerts |= AlertFlags::EMERGENCY_ACTIVE;
            status.emergency_active = true;
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_stats_basic() {
        let mut stats = CycleStats::new();
        assert_eq!(stats.tick_count, 0);
        assert_eq!(stats.avg_tick_ns(), 0);

        stats.record(500_000, 1_000);
        assert_eq!(stats.tick_count, 1);
        assert_eq!(stats.last_tick_ns, 500_000);
        assert_eq!(stats.min_tick_ns, 500_000);
        assert_eq!(stats.max_tick_ns, 500_000);
        assert_eq!(stats.max_latency_ns, 1_000);
        assert_eq!(stats.avg_tick_ns(), 500_000);

        stats.record(600_000, 500);
        assert_eq!(stats.tick_count, 2);
        assert_eq!(stats.min_tick_ns, 500_000);
        assert_eq!(stats.max_tick_ns, 600_000);
        assert_eq!(stats.max_latency_ns, 1_000); // Max unchanged.
        assert_eq!(stats.avg_tick_ns(), 550_000);
    }

    #[test]
    fn cycle_stats_summary_in_microseconds() {
        let mut stats = CycleStats::new();
        stats.record(1_500_000, 0);
        stats.overruns = 2;
        let summary = stats.summary();
        assert_eq!(summary.ticks, 1);
        assert_eq!(summary.last_tick_us, 1_500);
        assert_eq!(summary.max_tick_us, 1_500);
        assert_eq!(summary.avg_tick_us, 1_500);
        assert_eq!(summary.overruns, 2);
    }

    #[test]
    fn empty_stats_summary_is_zeroed() {
        let summary = CycleStats::new().summary();
        assert_eq!(summary.ticks, 0);
        assert_eq!(summary.max_tick_us, 0);
        assert_eq!(summary.avg_tick_us, 0);
    }

    #[test]
    fn rt_setup_no_rt_feature_is_noop() {
        #[cfg(not(feature = "rt"))]
        {
            assert!(rt_setup(0, 80).is_ok());
        }
    }
}
