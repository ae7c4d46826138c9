pub mod tone;

use tone::AlarmTone;

use anyhow::{anyhow, Result};
use rodio::{OutputStream, Sink};
use std::sync::{
    mpsc::{self, Sender},
    Mutex,
};
use std::thread;
use std::time::Duration;

use crate::agent::ToneFallback;

const START_TIMEOUT: Duration = Duration::from_secs(2);

enum AudioCommand {
    PlayAlarm {
        freq: f32,
        reply: Sender<Result<(), String>>,
    },
    Stop,
}

/// Owns the audio output on a dedicated thread; rodio streams are not `Send`.
pub struct ToneEngineHandle {
    tx: Mutex<Option<Sender<AudioCommand>>>,
    freq: f32,
}

impl ToneEngineHandle {
    pub fn new() -> Self {
        Self::with_frequency(880.0)
    }

    pub fn with_frequency(freq: f32) -> Self {
        Self {
            tx: Mutex::new(None),
            freq,
        }
    }

    fn ensure_thread(&self) -> Result<Sender<AudioCommand>> {
        let mut guard = self
            .tx
            .lock()
            .map_err(|_| anyhow!("tone engine lock poisoned"))?;
        if let Some(tx) = guard.as_ref() {
            return Ok(tx.clone());
        }

        let (tx, rx) = mpsc::channel::<AudioCommand>();

        thread::Builder::new()
            .name("alarm-tone".to_string())
            .spawn(move || {
                let mut _stream: Option<OutputStream> = None;
                let mut sink: Option<Sink> = None;

                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        AudioCommand::PlayAlarm { freq, reply } => {
                            if let Some(old) = sink.take() {
                                old.stop();
                            }
                            _stream = None;

                            let opened = OutputStream::try_default()
                                .map_err(|e| format!("Failed to create audio output stream: {e}"))
                                .and_then(|(stream, handle)| {
                                    Sink::try_new(&handle)
                                        .map(|new_sink| (stream, new_sink))
                                        .map_err(|e| format!("Failed to create audio sink: {e}"))
                                });

                            let result = opened.map(|(stream, new_sink)| {
                                new_sink.append(AlarmTone::new(freq, 5));
                                _stream = Some(stream);
                                sink = Some(new_sink);
                            });
                            let _ = reply.send(result);
                        }
                        AudioCommand::Stop => {
                            if let Some(old) = sink.take() {
                                old.stop();
                            }
                            _stream = None;
                        }
                    }
                }
            })
            .map_err(|e| anyhow!("failed to spawn alarm tone thread: {e}"))?;

        *guard = Some(tx.clone());
        Ok(tx)
    }

    pub fn stop(&self) {
        if let Ok(Some(tx)) = self.tx.lock().map(|g| g.clone()) {
            let _ = tx.send(AudioCommand::Stop);
        }
    }
}

impl Default for ToneEngineHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ToneFallback for ToneEngineHandle {
    /// Blocks until the output device is open and the tone is queued.
    fn play_alarm_tone(&self) -> Result<()> {
        let tx = self.ensure_thread()?;
        let (reply_tx, reply_rx) = mpsc::channel();
        tx.send(AudioCommand::PlayAlarm {
            freq: self.freq,
            reply: reply_tx,
        })
        .map_err(|_| anyhow!("alarm tone thread has exited"))?;

        reply_rx
            .recv_timeout(START_TIMEOUT)
            .map_err(|_| anyhow!("audio output did not start within {START_TIMEOUT:?}"))?
            .map_err(|e| anyhow!(e))
    }
}
