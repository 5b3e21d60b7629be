//! The `music` namespace: a relay of [`AudioCommand`]s to whoever owns the
//! audio device.

use std::cell::RefCell;
use std::rc::Rc;

use futures::future::{self, FutureExt, LocalBoxFuture};
use microbit_sandbox_types::{AudioCommand, BoardState};
use tokio::time::sleep;
use tracing::debug;

use super::{reset_on_event, HardwareModule, Surface};
use crate::event_hub::EventHub;
use crate::script::{expect_args, ScriptResult, Value};

/// Receives audio commands.
///
/// `dispatch` hands the command over before it returns; the returned future
/// resolves when the device has finished it (after the full duration for
/// `PlayTone` and `Rest`).
pub trait AudioSink {
    fn dispatch(&self, command: AudioCommand) -> LocalBoxFuture<'static, ()>;
}

impl<F> AudioSink for F
where
    F: Fn(AudioCommand) -> LocalBoxFuture<'static, ()>,
{
    fn dispatch(&self, command: AudioCommand) -> LocalBoxFuture<'static, ()> {
        self(command)
    }
}

pub struct Music {
    ms_per_beat: u64,
    sink: RefCell<Option<Rc<dyn AudioSink>>>,
}

impl Music {
    pub fn new(ms_per_beat: u64, hub: &EventHub) -> Rc<Self> {
        let music = Rc::new(Self {
            ms_per_beat,
            sink: RefCell::new(None),
        });
        reset_on_event(hub, &music);
        music
    }

    pub fn set_sink(&self, sink: Option<Rc<dyn AudioSink>>) {
        *self.sink.borrow_mut() = sink;
    }

    /// Send `command`; the future resolves once it has been carried out.
    /// Without a sink, timed commands still take their duration.
    pub fn play(&self, command: AudioCommand) -> LocalBoxFuture<'static, ()> {
        let sink = self.sink.borrow().clone();
        match sink {
            Some(sink) => sink.dispatch(command),
            None => {
                let duration = command.duration(self.ms_per_beat);
                if duration.is_zero() {
                    future::ready(()).boxed_local()
                } else {
                    sleep(duration).boxed_local()
                }
            }
        }
    }
}

fn timed(music: &Rc<Music>, command: ScriptResult<AudioCommand>) -> LocalBoxFuture<'static, ScriptResult<Value>> {
    match command {
        Ok(command) => {
            let done = music.play(command);
            async move {
                done.await;
                Ok(Value::None)
            }
            .boxed_local()
        }
        Err(e) => future::ready(Err(e)).boxed_local(),
    }
}

impl HardwareModule for Music {
    fn name(&self) -> &'static str {
        "music"
    }

    fn install(self: Rc<Self>, surface: &Surface) {
        let ns = surface.namespace("music");

        let m = self.clone();
        ns.define_async("play_tone", move |args| {
            let command = expect_args("play_tone", &args, 2, 2).and_then(|_| {
                Ok(AudioCommand::PlayTone {
                    frequency: args[0].to_float()?,
                    beats: args[1].to_float()?,
                })
            });
            timed(&m, command)
        });

        let m = self.clone();
        ns.define_async("rest", move |args| {
            let command = expect_args("rest", &args, 1, 1).and_then(|_| {
                Ok(AudioCommand::Rest {
                    beats: args[0].to_float()?,
                })
            });
            timed(&m, command)
        });

        let m = self.clone();
        ns.define_sync("ring_tone", move |args| {
            expect_args("ring_tone", args, 1, 1)?;
            drop(m.play(AudioCommand::RingTone {
                frequency: args[0].to_float()?,
            }));
            Ok(Value::None)
        });

        for name in ["stop", "stop_all_sounds"] {
            let m = self.clone();
            ns.define_sync(name, move |args| {
                expect_args(name, args, 0, 0)?;
                drop(m.play(AudioCommand::Stop));
                Ok(Value::None)
            });
        }
    }

    fn write_state(&self, _state: &mut BoardState) {}

    fn reset(&self) {
        if self.sink.borrow().is_some() {
            debug!("silencing audio on reset");
            drop(self.play(AudioCommand::Stop));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microbit_sandbox_types::BoardEvent;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_without_sink_durations_are_honoured() {
        let music = Music::new(500, &EventHub::new());
        let start = tokio::time::Instant::now();
        music
            .play(AudioCommand::PlayTone {
                frequency: 440.0,
                beats: 1.0,
            })
            .await;
        music.play(AudioCommand::Rest { beats: 0.5 }).await;
        music.play(AudioCommand::RingTone { frequency: 262.0 }).await;
        assert_eq!(start.elapsed(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn test_commands_reach_sink_and_reset_stops() {
        let hub = EventHub::new();
        let music = Music::new(500, &hub);
        let sent = Rc::new(RefCell::new(Vec::new()));
        let log = sent.clone();
        let sink = move |command: AudioCommand| -> LocalBoxFuture<'static, ()> {
            log.borrow_mut().push(command);
            future::ready(()).boxed_local()
        };
        music.set_sink(Some(Rc::new(sink)));

        music.play(AudioCommand::RingTone { frequency: 262.0 }).await;
        hub.emit(BoardEvent::Reset {});
        assert_eq!(
            *sent.borrow(),
            vec![AudioCommand::RingTone { frequency: 262.0 }, AudioCommand::Stop]
        );
    }
}
