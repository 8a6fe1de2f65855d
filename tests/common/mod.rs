//! Shared test doubles for the integration suites.

#![allow(dead_code)]

use chime::room::{AudioSink, Clip, DoneCallback};
use chime::AssetRef;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Scripted audio sink: records every play and either completes it
/// immediately or holds the completion until the test releases it.
pub struct ScriptedSink {
    connected: AtomicBool,
    hold: bool,
    plays: Mutex<Vec<(PathBuf, f32)>>,
    pending: Mutex<Vec<(Clip, DoneCallback)>>,
}

impl ScriptedSink {
    /// Completions fire inside `play`, as if every clip were instant.
    pub fn immediate() -> Arc<Self> {
        Self::build(false)
    }

    /// Completions wait until [`release_one`] or [`stop`] fires them.
    ///
    /// [`release_one`]: ScriptedSink::release_one
    /// [`stop`]: AudioSink::stop
    pub fn holding() -> Arc<Self> {
        Self::build(true)
    }

    fn build(hold: bool) -> Arc<Self> {
        Arc::new(ScriptedSink {
            connected: AtomicBool::new(true),
            hold,
            plays: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn play_count(&self) -> usize {
        self.plays.lock().len()
    }

    pub fn plays(&self) -> Vec<(PathBuf, f32)> {
        self.plays.lock().clone()
    }

    /// Complete the most recent held play; false when nothing is pending.
    pub fn release_one(&self) -> bool {
        let entry = self.pending.lock().pop();
        match entry {
            Some((clip, done)) => {
                drop(clip);
                done(Ok(()));
                true
            }
            None => false,
        }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl AudioSink for ScriptedSink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn play(&self, clip: Clip, done: DoneCallback) {
        self.plays
            .lock()
            .push((clip.path().to_path_buf(), clip.gain()));
        if self.hold {
            self.pending.lock().push((clip, done));
        } else {
            done(Ok(()));
        }
    }

    fn stop(&self) {
        let pending: Vec<(Clip, DoneCallback)> = std::mem::take(&mut *self.pending.lock());
        for (clip, done) in pending {
            drop(clip);
            done(Ok(()));
        }
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Create `count` placeholder clip files under `dir`.
pub fn make_assets(dir: &Path, count: usize) -> Vec<AssetRef> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("clip{i}.mp3"));
            std::fs::write(&path, b"placeholder clip bytes").unwrap();
            AssetRef::new(path)
        })
        .collect()
}
