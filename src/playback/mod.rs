//! Local audio output
//!
//! A rodio-backed [`AudioSink`] for running the soundboard against the
//! machine's own speakers instead of a remote voice connection. The output
//! stream lives on a dedicated audio thread (it is bound to the thread that
//! created it); play requests arrive over a channel and are decoded and
//! played one at a time, each reporting completion through its callback
//! exactly once — also when cut short by [`stop`].
//!
//! [`stop`]: AudioSink::stop

use crate::room::{AudioSink, Clip, DoneCallback};
use crate::{ChimeError, Result};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufReader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use tracing::debug;

struct PlayRequest {
    clip: Clip,
    done: DoneCallback,
}

/// Plays clips on the default local audio device.
pub struct LocalSink {
    tx: Mutex<Option<mpsc::Sender<PlayRequest>>>,
    current: Arc<Mutex<Option<Arc<rodio::Sink>>>>,
    connected: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LocalSink {
    /// Open the default output device and start the audio thread.
    pub fn open() -> Result<Self> {
        let (tx, rx) = mpsc::channel::<PlayRequest>();
        let current: Arc<Mutex<Option<Arc<rodio::Sink>>>> = Arc::new(Mutex::new(None));
        let connected = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread_current = current.clone();
        let thread_connected = connected.clone();
        let worker = thread::Builder::new()
            .name("chime-audio".to_string())
            .spawn(move || {
                // The output stream must stay on this thread for its lifetime
                let (_stream, handle) = match rodio::OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(ChimeError::Playback(format!(
                            "no audio output device: {}",
                            e
                        ))));
                        return;
                    }
                };
                thread_connected.store(true, Ordering::SeqCst);
                let _ = ready_tx.send(Ok(()));

                for request in rx {
                    let PlayRequest { clip, done } = request;
                    let result = play_clip(&handle, &thread_current, &clip);
                    *thread_current.lock() = None;
                    // Release a rendered artifact before reporting completion
                    drop(clip);
                    done(result);
                }
                thread_connected.store(false, Ordering::SeqCst);
            })
            .map_err(|e| ChimeError::Playback(format!("failed to spawn audio thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(LocalSink {
                tx: Mutex::new(Some(tx)),
                current,
                connected,
                worker: Mutex::new(Some(worker)),
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(ChimeError::Playback(
                    "audio thread did not start".to_string(),
                ))
            }
        }
    }

    /// Stop accepting play requests and join the audio thread. Queued
    /// requests still complete (with their callbacks) first.
    pub fn close(&self) {
        self.tx.lock().take();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for LocalSink {
    fn drop(&mut self) {
        self.close();
    }
}

impl AudioSink for LocalSink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn play(&self, clip: Clip, done: DoneCallback) {
        let guard = self.tx.lock();
        match guard.as_ref() {
            Some(tx) => {
                if let Err(mpsc::SendError(request)) = tx.send(PlayRequest { clip, done }) {
                    (request.done)(Err(ChimeError::Playback(
                        "audio thread is gone".to_string(),
                    )));
                }
            }
            None => done(Err(ChimeError::Playback(
                "audio output is closed".to_string(),
            ))),
        }
    }

    fn stop(&self) {
        let sink = self.current.lock().clone();
        if let Some(sink) = sink {
            sink.stop();
        }
    }
}

/// Decode and play one clip to the end (or until stopped).
fn play_clip(
    handle: &rodio::OutputStreamHandle,
    current: &Arc<Mutex<Option<Arc<rodio::Sink>>>>,
    clip: &Clip,
) -> Result<()> {
    let sink = Arc::new(
        rodio::Sink::try_new(handle)
            .map_err(|e| ChimeError::Playback(format!("failed to open playback sink: {}", e)))?,
    );
    // Publish before appending so stop() can reach an in-flight play
    *current.lock() = Some(sink.clone());

    let file = File::open(clip.path())?;
    let source = rodio::Decoder::new(BufReader::new(file)).map_err(|e| {
        ChimeError::Playback(format!("failed to decode '{}': {}", clip.path().display(), e))
    })?;
    sink.set_volume(clip.gain());
    sink.append(source);
    debug!(path = %clip.path().display(), gain = clip.gain(), "playing clip");
    sink.sleep_until_end();
    Ok(())
}
