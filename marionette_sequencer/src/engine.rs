//! Sequencer engine: the control surface over the tick task.
//!
//! One engine per process, with every collaborator passed in explicitly —
//! no global state. Control operations are non-blocking state transitions:
//! they validate against the status mirror, post a command, and return.
//! The emergency path bypasses the tick task entirely and writes hardware
//! synchronously through the safety validator.

use crate::command::{ControlCommand, ControlError};
use crate::config::{LoadedConfig, SequencerSettings};
use crate::cycle::{CompletionHook, TickRunner, lock_sink, lock_status};
use crate::library::SequenceLibrary;
use crate::safety::{EmergencyReport, SafetyValidator};
use marionette_common::channel::{ChannelLimits, ChannelTable};
use marionette_common::sink::ActuatorSink;
use marionette_common::status::{AlertFlags, PlaybackStatus, StatusSnapshot};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, warn};

/// The animatronic motion engine.
///
/// Owns the sequence library and the tick task; shares the safety
/// validator, actuator sink, and status mirror with it.
pub struct SequencerEngine {
    library: SequenceLibrary,
    validator: Arc<SafetyValidator>,
    sink: Arc<Mutex<Box<dyn ActuatorSink>>>,
    status: Arc<Mutex<StatusSnapshot>>,
    cmd_tx: Sender<ControlCommand>,
    tick_thread: Option<JoinHandle<()>>,
}

impl SequencerEngine {
    /// Construct the engine and spawn its tick task.
    pub fn new(
        table: ChannelTable,
        library: SequenceLibrary,
        settings: SequencerSettings,
        sink: Box<dyn ActuatorSink>,
    ) -> Self {
        Self::with_completion_hook(table, library, settings, sink, None)
    }

    /// Construct from a loaded configuration bundle.
    pub fn from_config(config: LoadedConfig, sink: Box<dyn ActuatorSink>) -> Self {
        Self::new(
            config.table,
            config.library,
            config.engine.sequencer,
            sink,
        )
    }

    /// Construct with an optional completion hook, invoked with the
    /// sequence name whenever a playback completes naturally.
    pub fn with_completion_hook(
        table: ChannelTable,
        library: SequenceLibrary,
        settings: SequencerSettings,
        sink: Box<dyn ActuatorSink>,
        on_complete: Option<CompletionHook>,
    ) -> Self {
        let validator = Arc::new(SafetyValidator::new(table));
        let sink = Arc::new(Mutex::new(sink));
        let status = Arc::new(Mutex::new(StatusSnapshot::default()));
        let (cmd_tx, cmd_rx) = mpsc::channel();

        let runner = TickRunner::new(
            cmd_rx,
            Arc::clone(&validator),
            Arc::clone(&sink),
            Arc::clone(&status),
            settings,
            on_complete,
        );
        let tick_thread = std::thread::Builder::new()
            .name("sequencer-tick".into())
            .spawn(move || runner.run())
            .ok();
        if tick_thread.is_none() {
            warn!("failed to spawn tick task; engine is down");
        }

        Self {
            library,
            validator,
            sink,
            status,
            cmd_tx,
            tick_thread,
        }
    }

    // ─── Control Surface ────────────────────────────────────────────

    /// Start playing a named sequence (last-writer-wins).
    pub fn play(&self, name: &str) -> Result<(), ControlError> {
        if self.validator.emergency_active() {
            return Err(ControlError::EmergencyActive);
        }
        let sequence = self
            .library
            .get(name)
            .ok_or_else(|| ControlError::UnknownSequence(name.to_owned()))?;
        self.send(ControlCommand::Play(sequence))
    }

    /// Freeze the active playback at its current offset.
    pub fn pause(&self) -> Result<(), ControlError> {
        match self.status().status {
            PlaybackStatus::Running => self.send(ControlCommand::Pause),
            _ => Err(ControlError::NotRunning),
        }
    }

    /// Continue a paused playback.
    pub fn resume(&self) -> Result<(), ControlError> {
        if self.validator.emergency_active() {
            return Err(ControlError::EmergencyActive);
        }
        match self.status().status {
            PlaybackStatus::Paused => self.send(ControlCommand::Resume),
            _ => Err(ControlError::NotPaused),
        }
    }

    /// Cancel the active playback.
    pub fn stop(&self) -> Result<(), ControlError> {
        match self.status().status {
            PlaybackStatus::Running | PlaybackStatus::Paused => {
                self.send(ControlCommand::Stop)
            }
            _ => Err(ControlError::NotActive),
        }
    }

    /// Trip the emergency stop.
    ///
    /// Synchronous: the latch is set and every enabled channel is written
    /// to its emergency position on the caller's thread, independent of
    /// whatever the tick task is doing. The report lists what was
    /// commanded and what failed.
    pub fn emergency_stop(&self) -> EmergencyReport {
        let report = {
            let mut sink = lock_sink(&self.sink);
            self.validator.trip_emergency(&mut **sink)
        };

        {
            let mut status = lock_status(&self.status);
            if !status.status.is_terminal() {
                status.status = PlaybackStatus::Stopped;
            }
            status.emergency_active = true;
            status.alerts |= AlertFlags::EMERGENCY_ACTIVE;
        }

        // Wake the tick task so it drops its session promptly; the latch
        // already blocks any dispatch it might race in.
        let _ = self.cmd_tx.send(ControlCommand::Stop);
        report
    }

    /// Clear the emergency latch. Requires operator confirmation.
    pub fn reset_emergency(&self, confirmed: bool) -> bool {
        let cleared = self.validator.reset_emergency(confirmed);
        if cleared {
            let mut status = lock_status(&self.status);
            status.emergency_active = false;
        }
        cleared
    }

    /// Last known engine state plus unacknowledged alerts.
    pub fn status(&self) -> StatusSnapshot {
        let mut snapshot = lock_status(&self.status).clone();
        snapshot.emergency_active = self.validator.emergency_active();
        snapshot
    }

    /// Clear and return the unacknowledged alert set.
    pub fn acknowledge_alerts(&self) -> AlertFlags {
        let mut status = lock_status(&self.status);
        let acked = status.alerts;
        status.alerts = AlertFlags::empty();
        acked
    }

    /// Installed sequence names, sorted.
    pub fn sequence_names(&self) -> Vec<String> {
        self.library.names()
    }

    // ─── Channel Administration ─────────────────────────────────────

    /// Dispatch every enabled channel to its home position.
    ///
    /// Only valid while no playback is active; returns the number of
    /// channels homed.
    pub fn home_all(&self) -> Result<usize, ControlError> {
        if self.validator.emergency_active() {
            return Err(ControlError::EmergencyActive);
        }
        let status = self.status().status;
        if matches!(status, PlaybackStatus::Running | PlaybackStatus::Paused) {
            return Err(ControlError::NotActive);
        }

        let homes: Vec<(u8, f64)> = self.validator.with_table(|table| {
            table
                .iter_enabled()
                .map(|l| (l.channel_id, l.home_position_us))
                .collect()
        });

        let mut homed = 0;
        let mut sink = lock_sink(&self.sink);
        for (channel_id, home_us) in homes {
            if let Ok(position_us) = self.validator.validate(channel_id, home_us) {
                if sink.set_channel_position(channel_id, position_us).is_ok() {
                    homed += 1;
                }
            }
        }
        info!(channels = homed, "homed all enabled channels");
        Ok(homed)
    }

    /// Replace one channel's limits.
    ///
    /// Refused while the active playback commands that channel —
    /// reconfiguration waits for idle or an explicit stop first.
    pub fn reconfigure_channel(&self, limits: ChannelLimits) -> Result<(), ControlError> {
        self.ensure_channel_idle(limits.channel_id)?;
        self.validator.replace_limits(limits)?;
        info!(channel = limits.channel_id, "channel limits reconfigured");
        Ok(())
    }

    /// Administratively enable or disable a channel.
    pub fn set_channel_enabled(&self, channel_id: u8, enabled: bool) -> Result<(), ControlError> {
        self.validator.set_channel_enabled(channel_id, enabled)?;
        Ok(())
    }

    /// Flag or clear a channel's forbidden zone.
    pub fn set_channel_forbidden(
        &self,
        channel_id: u8,
        forbidden: bool,
    ) -> Result<(), ControlError> {
        self.validator.set_channel_forbidden(channel_id, forbidden)?;
        Ok(())
    }

    /// Stop the tick task and shut the sink down.
    pub fn shutdown(mut self) {
        self.shutdown_inner();
    }

    // ─── Internals ──────────────────────────────────────────────────

    fn send(&self, cmd: ControlCommand) -> Result<(), ControlError> {
        self.cmd_tx.send(cmd).map_err(|_| ControlError::EngineDown)
    }

    fn ensure_channel_idle(&self, channel_id: u8) -> Result<(), ControlError> {
        let snapshot = self.status();
        if !matches!(
            snapshot.status,
            PlaybackStatus::Running | PlaybackStatus::Paused
        ) {
            return Ok(());
        }
        let busy = snapshot
            .sequence
            .as_deref()
            .and_then(|name| self.library.get(name))
            .is_some_and(|seq| seq.channel_ids().any(|id| id == channel_id));
        if busy {
            return Err(ControlError::ChannelBusy(channel_id));
        }
        Ok(())
    }

    fn shutdown_inner(&mut self) {
        let _ = self.cmd_tx.send(ControlCommand::Shutdown);
        if let Some(handle) = self.tick_thread.take() {
            let _ = handle.join();
        }
        let mut sink = lock_sink(&self.sink);
        if let Err(e) = sink.shutdown() {
            warn!(error = %e, "sink shutdown failed");
        }
        info!("engine shut down");
    }
}

impl Drop for SequencerEngine {
    fn drop(&mut self) {
        if self.tick_thread.is_some() {
            self.shutdown_inner();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::easing::EasingKind;
    use crate::sequence::SequenceDef;
    use crate::track::{Keyframe, Track};
    use marionette_common::sink::SimulatedSink;

    fn limits(channel_id: u8) -> ChannelLimits {
        ChannelLimits {
            channel_id,
            min_position_us: 1000.0,
            max_position_us: 2000.0,
            home_position_us: 1400.0,
            emergency_position_us: 1200.0,
            max_speed: 0,
            max_acceleration: 0,
            enabled: true,
            forbidden: false,
        }
    }

    fn library_with(names: &[&str]) -> SequenceLibrary {
        let mut library = SequenceLibrary::new();
        for name in names {
            library
                .insert(SequenceDef {
                    name: (*name).into(),
                    duration: 10.0,
                    frame_rate: 50,
                    looped: false,
                    tracks: vec![Track {
                        channel_id: 0,
                        speed_multiplier: 1.0,
                        keyframes: vec![Keyframe {
                            time_offset: 0.0,
                            position_us: 1500.0,
                            easing: EasingKind::Linear,
                        }],
                    }],
                })
                .unwrap();
        }
        library
    }

    fn engine(names: &[&str]) -> SequencerEngine {
        let table = ChannelTable::from_limits(&[limits(0), limits(1)]).unwrap();
        SequencerEngine::new(
            table,
            library_with(names),
            SequencerSettings::default(),
            Box::new(SimulatedSink::new()),
        )
    }

    #[test]
    fn unknown_sequence_is_rejected() {
        let engine = engine(&["wave"]);
        assert!(matches!(
            engine.play("missing"),
            Err(ControlError::UnknownSequence(_))
        ));
        engine.shutdown();
    }

    #[test]
    fn pause_without_playback_is_rejected() {
        let engine = engine(&["wave"]);
        assert!(matches!(engine.pause(), Err(ControlError::NotRunning)));
        assert!(matches!(engine.resume(), Err(ControlError::NotPaused)));
        assert!(matches!(engine.stop(), Err(ControlError::NotActive)));
        engine.shutdown();
    }

    #[test]
    fn play_rejected_while_emergency_active() {
        let engine = engine(&["wave"]);
        engine.emergency_stop();
        assert!(matches!(
            engine.play("wave"),
            Err(ControlError::EmergencyActive)
        ));
        assert!(engine.reset_emergency(true));
        assert!(engine.play("wave").is_ok());
        engine.shutdown();
    }

    #[test]
    fn status_starts_idle() {
        let engine = engine(&["wave"]);
        let snapshot = engine.status();
        assert_eq!(snapshot.status, PlaybackStatus::Idle);
        assert!(snapshot.sequence.is_none());
        assert!(!snapshot.emergency_active);
        assert!(snapshot.alerts.is_empty());
        engine.shutdown();
    }

    #[test]
    fn acknowledge_clears_alerts() {
        let engine = engine(&["wave"]);
        engine.emergency_stop();
        let acked = engine.acknowledge_alerts();
        assert!(acked.contains(AlertFlags::EMERGENCY_ACTIVE));
        assert!(engine.status().alerts.is_empty());
        engine.shutdown();
    }

    #[test]
    fn home_all_when_idle() {
        let engine = engine(&["wave"]);
        assert_eq!(engine.home_all().unwrap(), 2);
        engine.shutdown();
    }

    #[test]
    fn reconfigure_idle_channel() {
        let engine = engine(&["wave"]);
        let mut new_limits = limits(1);
        new_limits.max_position_us = 1800.0;
        assert!(engine.reconfigure_channel(new_limits).is_ok());
        engine.shutdown();
    }

    #[test]
    fn sequence_names_sorted() {
        let engine = engine(&["wave", "nod"]);
        assert_eq!(
            engine.sequence_names(),
            vec!["nod".to_owned(), "wave".to_owned()]
        );
        engine.shutdown();
    }
}
