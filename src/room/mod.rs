//! Room playback queues and the drain state machine
//!
//! Each room owns a FIFO of resolved assets and a `playing` flag. A single
//! engine thread consumes room signals (`Ready`, `Finished`) and runs the
//! drain cycle: dequeue up to a batch cap, drop entries whose backing file
//! vanished, play a lone survivor directly or hand the batch to the overlap
//! mixer, and on completion re-drain immediately so queued bursts empty
//! without external triggering.
//!
//! The `playing` flag is the per-room mutual exclusion: it is set before the
//! mixer is invoked and cleared only by the completion signal, so no two
//! drain cycles for the same room ever overlap. Mixing and playback of one
//! batch run on a short-lived worker thread, keeping one room's render from
//! stalling another room's drain.
//!
//! The voice connection itself is external; it plugs in through
//! [`AudioSink`].

use crate::mixer::Mixer;
use crate::{AssetRef, ChimeError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tempfile::TempPath;
use tracing::{debug, warn};

/// Default cap on assets consumed by one drain cycle.
pub const DEFAULT_BATCH_CAP: usize = 10;

/// Identifier of a chat room (guild, server, space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a voice channel inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion callback handed to [`AudioSink::play`]; must run exactly once.
pub type DoneCallback = Box<dyn FnOnce(Result<()>) + Send + 'static>;

/// Contract for a room's audio output (the external voice connection).
///
/// Implementations must not block in [`play`]: start playback, return, and
/// invoke the callback later — exactly once per play, on success, on
/// failure, and when playback is cut short by [`stop`].
///
/// [`play`]: AudioSink::play
/// [`stop`]: AudioSink::stop
pub trait AudioSink: Send + Sync {
    /// Whether the sink can currently emit audio.
    fn is_connected(&self) -> bool;

    /// Begin playing a clip; report completion through `done`.
    fn play(&self, clip: Clip, done: DoneCallback);

    /// Halt the active playback, if any. A no-op when idle.
    fn stop(&self);
}

/// A playable unit handed to a sink.
///
/// Either a direct reference to a stored sound file played at a fixed gain,
/// or a rendered mix that owns its temporary artifact — dropping the clip
/// after playback removes the artifact on every exit path.
#[derive(Debug)]
pub struct Clip {
    path: PathBuf,
    gain: f32,
    scratch: Option<TempPath>,
}

impl Clip {
    /// A clip backed by a stored sound file, attenuated to `gain`.
    pub fn file(path: impl Into<PathBuf>, gain: f32) -> Self {
        Clip {
            path: path.into(),
            gain,
            scratch: None,
        }
    }

    /// A clip backed by a rendered mix artifact, played as-is.
    ///
    /// The per-track attenuation already happened inside the mix.
    pub fn rendered(scratch: TempPath) -> Self {
        Clip {
            path: scratch.to_path_buf(),
            gain: 1.0,
            scratch: Some(scratch),
        }
    }

    /// Path of the audio to play.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gain to apply during playback (1.0 = unchanged).
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Whether this clip owns a temporary render artifact.
    pub fn is_rendered(&self) -> bool {
        self.scratch.is_some()
    }
}

/// Signals consumed by the engine thread.
enum RoomSignal {
    /// Assets were added or a sink attached; try to drain.
    Ready(RoomId),
    /// A playback (or failed mix) finished; clear `playing`, re-drain.
    Finished(RoomId),
    /// Stop the engine thread.
    Shutdown,
}

/// The room's voice link: which channel we occupy, and the sink playing
/// into it.
#[derive(Clone)]
struct VoiceLink {
    channel: ChannelId,
    sink: Arc<dyn AudioSink>,
}

/// Mutable per-room playback state. Created lazily, reset only by explicit
/// clear, never destroyed.
#[derive(Default)]
struct RoomState {
    queue: VecDeque<AssetRef>,
    playing: bool,
    link: Option<VoiceLink>,
}

struct Shared {
    rooms: Mutex<HashMap<RoomId, RoomState>>,
    mixer: Mixer,
    batch_cap: usize,
    tx: Mutex<mpsc::Sender<RoomSignal>>,
}

impl Shared {
    fn signal(&self, signal: RoomSignal) {
        // The engine thread may already be gone during shutdown
        let _ = self.tx.lock().send(signal);
    }
}

/// Per-room playback queues driven by a single engine thread.
pub struct RoomEngine {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RoomEngine {
    /// Start the engine with its drain-loop thread.
    pub fn new(mixer: Mixer, batch_cap: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            rooms: Mutex::new(HashMap::new()),
            mixer,
            batch_cap: batch_cap.max(1),
            tx: Mutex::new(tx),
        });
        let loop_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("chime-rooms".to_string())
            .spawn(move || run_loop(loop_shared, rx))
            .map_err(|e| ChimeError::Playback(format!("failed to spawn room engine: {}", e)))?;
        Ok(RoomEngine {
            shared,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Append an asset to a room's queue (creating the room lazily) and
    /// nudge the drain loop.
    pub fn enqueue(&self, room: RoomId, asset: AssetRef) {
        {
            let mut rooms = self.shared.rooms.lock();
            rooms.entry(room).or_default().queue.push_back(asset);
        }
        self.shared.signal(RoomSignal::Ready(room));
    }

    /// Attach (or replace) the room's voice link and nudge the drain loop in
    /// case assets queued up while disconnected.
    pub fn connect(&self, room: RoomId, channel: ChannelId, sink: Arc<dyn AudioSink>) {
        {
            let mut rooms = self.shared.rooms.lock();
            rooms.entry(room).or_default().link = Some(VoiceLink { channel, sink });
        }
        self.shared.signal(RoomSignal::Ready(room));
    }

    /// Drop the room's voice link, halting playback and emptying the queue.
    /// Returns whether a link existed.
    pub fn disconnect(&self, room: RoomId) -> bool {
        let link = {
            let mut rooms = self.shared.rooms.lock();
            let Some(state) = rooms.get_mut(&room) else {
                return false;
            };
            state.queue.clear();
            state.link.take()
        };
        match link {
            Some(link) => {
                link.sink.stop();
                true
            }
            None => false,
        }
    }

    /// Channel the room's sink is linked to, if any.
    pub fn linked_channel(&self, room: RoomId) -> Option<ChannelId> {
        self.shared
            .rooms
            .lock()
            .get(&room)
            .and_then(|s| s.link.as_ref().map(|l| l.channel))
    }

    /// Whether a playback (or mix) is active for the room.
    pub fn is_playing(&self, room: RoomId) -> bool {
        self.shared
            .rooms
            .lock()
            .get(&room)
            .map(|s| s.playing)
            .unwrap_or(false)
    }

    /// Current queue depth for the room.
    pub fn queue_len(&self, room: RoomId) -> usize {
        self.shared
            .rooms
            .lock()
            .get(&room)
            .map(|s| s.queue.len())
            .unwrap_or(0)
    }

    /// Empty the room's queue without touching an active playback.
    /// Returns the number of entries dropped.
    pub fn clear(&self, room: RoomId) -> usize {
        let mut rooms = self.shared.rooms.lock();
        match rooms.get_mut(&room) {
            Some(state) => {
                let cleared = state.queue.len();
                state.queue.clear();
                cleared
            }
            None => 0,
        }
    }

    /// Halt the active playback (if any) and empty the queue.
    /// Returns the number of queued entries dropped.
    pub fn stop(&self, room: RoomId) -> usize {
        let (cleared, sink) = {
            let mut rooms = self.shared.rooms.lock();
            let Some(state) = rooms.get_mut(&room) else {
                return 0;
            };
            let cleared = state.queue.len();
            state.queue.clear();
            (cleared, state.link.as_ref().map(|l| l.sink.clone()))
        };
        if let Some(sink) = sink {
            sink.stop();
        }
        cleared
    }

    /// Stop the engine thread. Queued signals already sent are processed
    /// first; in-flight batch workers finish on their own.
    pub fn close(&self) {
        self.shared.signal(RoomSignal::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RoomEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_loop(shared: Arc<Shared>, rx: mpsc::Receiver<RoomSignal>) {
    for signal in rx {
        match signal {
            RoomSignal::Ready(room) => drain(&shared, room),
            RoomSignal::Finished(room) => {
                if let Some(state) = shared.rooms.lock().get_mut(&room) {
                    state.playing = false;
                }
                drain(&shared, room);
            }
            RoomSignal::Shutdown => break,
        }
    }
}

/// One drain attempt: a no-op unless the room is idle, linked and non-empty.
/// Re-checks the queue when a whole batch turns out stale.
fn drain(shared: &Arc<Shared>, room: RoomId) {
    loop {
        let (batch, sink) = {
            let mut rooms = shared.rooms.lock();
            let Some(state) = rooms.get_mut(&room) else {
                return;
            };
            if state.playing {
                return;
            }
            let Some(link) = state.link.as_ref() else {
                return;
            };
            if !link.sink.is_connected() {
                return;
            }
            if state.queue.is_empty() {
                return;
            }

            let mut batch = Vec::new();
            while batch.len() < shared.batch_cap {
                let Some(asset) = state.queue.pop_front() else {
                    break;
                };
                if asset.path().exists() {
                    batch.push(asset);
                } else {
                    debug!(room = %room, asset = %asset, "dropping stale queue entry");
                }
            }
            if batch.is_empty() {
                continue;
            }
            state.playing = true;
            (batch, link.sink.clone())
        };
        start_batch(shared.clone(), room, batch, sink);
        return;
    }
}

/// Mix (when needed) and play one batch off the engine thread.
fn start_batch(shared: Arc<Shared>, room: RoomId, batch: Vec<AssetRef>, sink: Arc<dyn AudioSink>) {
    let worker_shared = shared.clone();
    let spawned = thread::Builder::new()
        .name(format!("chime-batch-{room}"))
        .spawn(move || {
            let clip = if batch.len() == 1 {
                Clip::file(batch[0].path(), worker_shared.mixer.gain())
            } else {
                match worker_shared.mixer.mix(&batch) {
                    Ok(mixed) => mixed.into_clip(),
                    Err(e) => {
                        warn!(
                            room = %room,
                            clips = batch.len(),
                            "mix failed, discarding batch: {}", e
                        );
                        worker_shared.signal(RoomSignal::Finished(room));
                        return;
                    }
                }
            };
            let done_shared = worker_shared.clone();
            sink.play(
                clip,
                Box::new(move |result| {
                    if let Err(e) = result {
                        warn!(room = %room, "playback finished with error: {}", e);
                    }
                    done_shared.signal(RoomSignal::Finished(room));
                }),
            );
        });
    if let Err(e) = spawned {
        warn!(room = %room, "failed to spawn batch worker: {}", e);
        shared.signal(RoomSignal::Finished(room));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mixer::MixerConfig;

    fn engine() -> RoomEngine {
        RoomEngine::new(Mixer::new(MixerConfig::default()), DEFAULT_BATCH_CAP).unwrap()
    }

    #[test]
    fn test_room_state_is_lazy() {
        let engine = engine();
        let room = RoomId(1);
        assert_eq!(engine.queue_len(room), 0);
        assert!(!engine.is_playing(room));
        assert_eq!(engine.linked_channel(room), None);

        engine.enqueue(room, AssetRef::new("a.mp3"));
        assert_eq!(engine.queue_len(room), 1);
    }

    #[test]
    fn test_unlinked_room_keeps_its_queue() {
        let engine = engine();
        let room = RoomId(2);
        engine.enqueue(room, AssetRef::new("a.mp3"));
        engine.enqueue(room, AssetRef::new("b.mp3"));
        // No sink linked: the drain cycle must leave the queue alone
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(engine.queue_len(room), 2);
        assert!(!engine.is_playing(room));
    }

    #[test]
    fn test_clear_reports_count() {
        let engine = engine();
        let room = RoomId(3);
        engine.enqueue(room, AssetRef::new("a.mp3"));
        engine.enqueue(room, AssetRef::new("b.mp3"));
        assert_eq!(engine.clear(room), 2);
        assert_eq!(engine.queue_len(room), 0);
        assert_eq!(engine.clear(room), 0);
    }

    #[test]
    fn test_rendered_clip_owns_artifact() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let temp = file.into_temp_path();
        let path = temp.to_path_buf();
        let clip = Clip::rendered(temp);
        assert!(clip.is_rendered());
        assert_eq!(clip.gain(), 1.0);
        assert!(path.exists());
        drop(clip);
        assert!(!path.exists());
    }
}
