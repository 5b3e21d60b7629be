//! Audio command vocabulary relayed out of the isolated context.
//!
//! The board never synthesizes sound itself; it describes what should be
//! played and the host owning the real audio device carries it out.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One instruction for the host-side audio device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum AudioCommand {
    /// Play `frequency` Hz for `beats`, completing after the full duration.
    PlayTone { frequency: f64, beats: f64 },
    /// Start `frequency` Hz and keep it sounding until stopped.
    RingTone { frequency: f64 },
    /// Stay silent for `beats`.
    Rest { beats: f64 },
    /// Silence whatever is playing. Idempotent.
    Stop,
}

impl AudioCommand {
    /// How long the host must wait before acknowledging this command.
    pub fn duration(&self, ms_per_beat: u64) -> Duration {
        let beats = match self {
            AudioCommand::PlayTone { beats, .. } | AudioCommand::Rest { beats } => *beats,
            AudioCommand::RingTone { .. } | AudioCommand::Stop => 0.0,
        };
        if beats.is_nan() || beats <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(beats * ms_per_beat as f64 / 1000.0).unwrap_or(Duration::MAX)
    }

    pub fn name(&self) -> &'static str {
        match self {
            AudioCommand::PlayTone { .. } => "play_tone",
            AudioCommand::RingTone { .. } => "ring_tone",
            AudioCommand::Rest { .. } => "rest",
            AudioCommand::Stop => "stop",
        }
    }
}
