//! # Marionette Sequencer Library
//!
//! Motion sequencing brain for an animatronic replica prop. Takes named
//! keyframe sequences (per-channel tracks with timestamps and easing
//! curves), plays them back on a fixed-rate tick, and routes every computed
//! position through a safety validator before it reaches the actuator sink.
//!
//! ## Architecture
//!
//! 1. **Track / Sequence** — immutable keyframe data model + interpolation
//! 2. **SequenceLibrary** — named, read-only sequence store
//! 3. **SafetyValidator** — clamp/reject gate with the emergency latch
//! 4. **TickRunner** — drift-free fixed-rate playback loop
//! 5. **SequencerEngine** — control surface (play/pause/stop/emergency)
//!
//! ## Hot-Path Discipline
//!
//! The tick loop performs no heap allocation: position snapshots use a
//! fixed-capacity `heapless::Vec`, channel lookups hit a fixed-slot table,
//! and all playback state is created at `play()` time.

pub mod command;
pub mod config;
pub mod cycle;
pub mod easing;
pub mod engine;
pub mod library;
pub mod safety;
pub mod sequence;
pub mod state;
pub mod track;
