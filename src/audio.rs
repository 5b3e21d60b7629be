//! Host-side audio relay.
//!
//! The worker never touches an audio device. It sends [`AudioCommand`]s across
//! the boundary, and the [`AudioRelay`] plays them on the single
//! [`ToneOutput`] it owns. Tones never overlap: every command first silences
//! whatever the previous one started.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use microbit_sandbox_types::AudioCommand;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

/// Default tempo: 120 beats per minute.
pub const DEFAULT_MS_PER_BEAT: u64 = 500;

/// A device that can sound one tone at a time.
pub trait ToneOutput: Send {
    fn start_tone(&mut self, frequency: f64);
    fn stop_tone(&mut self);
}

struct Device {
    output: Box<dyn ToneOutput>,
    playing: bool,
    /// Bumped by every command; a timed tone only stops itself if still current.
    generation: u64,
}

impl Device {
    fn silence(&mut self) {
        if self.playing {
            self.output.stop_tone();
            self.playing = false;
        }
    }

    fn sound(&mut self, frequency: f64) {
        self.silence();
        self.output.start_tone(frequency);
        self.playing = true;
    }
}

pub struct AudioRelay {
    device: Mutex<Device>,
    ms_per_beat: u64,
}

impl AudioRelay {
    pub fn new(output: impl ToneOutput + 'static, ms_per_beat: u64) -> Arc<Self> {
        Arc::new(Self {
            device: Mutex::new(Device {
                output: Box::new(output),
                playing: false,
                generation: 0,
            }),
            ms_per_beat,
        })
    }

    pub fn ms_per_beat(&self) -> u64 {
        self.ms_per_beat
    }

    pub fn is_playing(&self) -> bool {
        self.device.lock().playing
    }

    /// Apply `command` to the device now.
    ///
    /// The returned future resolves when the command is complete: after the
    /// full duration for `PlayTone` and `Rest`, immediately otherwise.
    pub fn begin(self: &Arc<Self>, command: AudioCommand) -> BoxFuture<'static, ()> {
        let duration = command.duration(self.ms_per_beat);
        let generation = {
            let mut device = self.device.lock();
            device.generation += 1;
            match command {
                AudioCommand::PlayTone { frequency, .. } | AudioCommand::RingTone { frequency } => {
                    device.sound(frequency)
                }
                AudioCommand::Rest { .. } | AudioCommand::Stop => device.silence(),
            }
            device.generation
        };
        debug!(command = command.name(), duration_ms = duration.as_millis() as u64, "audio");

        if duration.is_zero() {
            return futures::future::ready(()).boxed();
        }
        let relay = self.clone();
        let timed_tone = matches!(command, AudioCommand::PlayTone { .. });
        async move {
            tokio::time::sleep(duration).await;
            if timed_tone {
                relay.finish(generation);
            }
        }
        .boxed()
    }

    /// Play `command` and wait for it to complete.
    pub async fn play(self: &Arc<Self>, command: AudioCommand) {
        self.begin(command).await
    }

    fn finish(&self, generation: u64) {
        let mut device = self.device.lock();
        if device.generation == generation {
            trace!(generation, "timed tone finished");
            device.silence();
        }
    }

    /// Beats to wall-clock time at this relay's tempo.
    pub fn beats(&self, beats: f64) -> Duration {
        AudioCommand::Rest { beats }.duration(self.ms_per_beat)
    }
}

/// What a [`RecordingOutput`] saw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "tone", content = "frequency", rename_all = "snake_case")]
pub enum ToneEvent {
    Start(f64),
    Stop,
}

/// A [`ToneOutput`] that only records calls. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutput {
    log: Arc<Mutex<Vec<ToneEvent>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ToneEvent> {
        self.log.lock().clone()
    }
}

impl ToneOutput for RecordingOutput {
    fn start_tone(&mut self, frequency: f64) {
        self.log.lock().push(ToneEvent::Start(frequency));
    }

    fn stop_tone(&mut self) {
        self.log.lock().push(ToneEvent::Stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn relay() -> (Arc<AudioRelay>, RecordingOutput) {
        let output = RecordingOutput::new();
        (AudioRelay::new(output.clone(), DEFAULT_MS_PER_BEAT), output)
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_tone_waits_for_duration() {
        let (relay, output) = relay();
        let start = Instant::now();
        relay
            .play(AudioCommand::PlayTone {
                frequency: 440.0,
                beats: 2.0,
            })
            .await;
        assert_eq!(start.elapsed(), Duration::from_millis(1000));
        assert_eq!(output.events(), vec![ToneEvent::Start(440.0), ToneEvent::Stop]);
        assert!(!relay.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_tone_stops_previous() {
        let (relay, output) = relay();
        let first = relay.begin(AudioCommand::PlayTone {
            frequency: 262.0,
            beats: 1.0,
        });
        relay.play(AudioCommand::RingTone { frequency: 330.0 }).await;
        first.await;
        // The expired first tone must not cut off the ring tone.
        assert!(relay.is_playing());
        assert_eq!(
            output.events(),
            vec![ToneEvent::Start(262.0), ToneEvent::Stop, ToneEvent::Start(330.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent_and_rest_is_silent() {
        let (relay, output) = relay();
        relay.play(AudioCommand::Stop).await;
        relay.play(AudioCommand::Stop).await;
        assert!(output.events().is_empty());

        let start = Instant::now();
        relay.play(AudioCommand::Rest { beats: 0.5 }).await;
        assert_eq!(start.elapsed(), relay.beats(0.5));
        assert!(output.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_tone_keeps_sounding() {
        let (relay, output) = relay();
        let tone = relay.begin(AudioCommand::PlayTone {
            frequency: 440.0,
            beats: 1e300,
        });
        let waited = tokio::time::timeout(Duration::from_secs(3600), tone).await;
        assert!(waited.is_err());
        assert!(relay.is_playing());

        relay.play(AudioCommand::Stop).await;
        assert_eq!(output.events(), vec![ToneEvent::Start(440.0), ToneEvent::Stop]);
    }
}
