//! Sound discovery
//!
//! Finding and fetching a clip for an unresolved token is an external
//! capability (clip search, download, whatever suggests the search phrase);
//! this module owns the seam: the [`SoundDiscoverer`] contract, a bounded
//! worker pool that keeps resolutions off the message-handling path, and a
//! filesystem-backed sample discoverer for local setups and tests.
//!
//! Callers must hold the cache's discovery guard for a token before
//! submitting it and release the guard exactly once when the outcome
//! callback has run.

use crate::token::EmojiToken;
use crate::{AssetRef, ChimeError, Result};
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Simultaneous in-flight resolutions per pool.
pub const DEFAULT_WORKERS: usize = 3;

/// Definitive outcome of a resolution attempt.
///
/// A transport or API failure is *not* a `NotFound`; it surfaces as an `Err`
/// from [`SoundDiscoverer::resolve`] and must not poison the cache.
#[derive(Debug, Clone)]
pub enum Discovery {
    /// A playable asset was produced for the token.
    Found(AssetRef),
    /// The discoverer definitively found no sound for the token.
    NotFound,
}

/// External capability that turns a token into a playable asset.
pub trait SoundDiscoverer: Send + Sync {
    /// Whether the discoverer has the credentials/configuration it needs.
    ///
    /// When this is `false` the engine skips resolution with a one-time
    /// warning instead of recording a negative entry.
    fn ready(&self) -> bool {
        true
    }

    /// Resolve a token to an asset, blocking for the duration of the call.
    ///
    /// `hint` carries a human-readable name for the glyph when one is known
    /// (custom glyphs only).
    fn resolve(&self, token: &EmojiToken, hint: Option<&str>) -> Result<Discovery>;
}

type DoneFn = Box<dyn FnOnce(&EmojiToken, Result<Discovery>) + Send + 'static>;

struct Job {
    token: EmojiToken,
    done: DoneFn,
}

/// Bounded worker pool running resolutions off the event-delivery path.
///
/// A fixed number of worker threads consume submitted tokens from a shared
/// channel; the outcome callback runs on the worker that handled the job.
/// Closing the pool drains already-submitted jobs, then joins the workers.
pub struct DiscoveryPool {
    tx: Mutex<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryPool {
    /// Spawn a pool with `workers` threads (at least one) resolving through
    /// `discoverer`.
    pub fn new(discoverer: Arc<dyn SoundDiscoverer>, workers: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let mut handles = Vec::new();
        for n in 0..workers.max(1) {
            let rx = rx.clone();
            let discoverer = discoverer.clone();
            let handle = thread::Builder::new()
                .name(format!("chime-discover-{n}"))
                .spawn(move || loop {
                    // Hold the receiver lock only for the dequeue, not the
                    // resolution itself
                    let job = rx.lock().recv();
                    let Ok(job) = job else { break };
                    let hint = job.token.discovery_hint().map(str::to_owned);
                    debug!(token = %job.token, "resolving sound");
                    let outcome = discoverer.resolve(&job.token, hint.as_deref());
                    (job.done)(&job.token, outcome);
                })
                .map_err(|e| {
                    ChimeError::Discovery(format!("failed to spawn discovery worker: {}", e))
                })?;
            handles.push(handle);
        }
        Ok(DiscoveryPool {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        })
    }

    /// Queue a token for resolution; `done` runs on a worker thread with the
    /// token and the outcome.
    pub fn submit<F>(&self, token: EmojiToken, done: F) -> Result<()>
    where
        F: FnOnce(&EmojiToken, Result<Discovery>) + Send + 'static,
    {
        let guard = self.tx.lock();
        let tx = guard
            .as_ref()
            .ok_or_else(|| ChimeError::Discovery("discovery pool is closed".to_string()))?;
        tx.send(Job {
            token,
            done: Box::new(done),
        })
        .map_err(|_| ChimeError::Discovery("discovery pool is closed".to_string()))
    }

    /// Stop accepting jobs, finish the ones already queued, join workers.
    pub fn close(&self) {
        self.tx.lock().take();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Drop for DiscoveryPool {
    fn drop(&mut self) {
        self.close();
    }
}

/// Filesystem-backed discoverer for local setups and tests.
///
/// Looks for `<asset name>.mp3` in a library directory and copies it into
/// the sounds directory. No credentials, always ready.
pub struct DirectoryDiscoverer {
    library: PathBuf,
    sounds_dir: PathBuf,
}

impl DirectoryDiscoverer {
    /// A discoverer serving clips out of `library`, installing them under
    /// `sounds_dir`.
    pub fn new(library: impl Into<PathBuf>, sounds_dir: impl Into<PathBuf>) -> Self {
        DirectoryDiscoverer {
            library: library.into(),
            sounds_dir: sounds_dir.into(),
        }
    }
}

impl SoundDiscoverer for DirectoryDiscoverer {
    fn resolve(&self, token: &EmojiToken, hint: Option<&str>) -> Result<Discovery> {
        let name = asset_name(token, hint);
        let source = self.library.join(format!("{name}.mp3"));
        if !source.is_file() {
            return Ok(Discovery::NotFound);
        }
        fs::create_dir_all(&self.sounds_dir)?;
        let dest = self.sounds_dir.join(format!("{name}.mp3"));
        if !dest.exists() {
            fs::copy(&source, &dest)?;
        }
        Ok(Discovery::Found(AssetRef::new(dest)))
    }
}

/// Stored-asset file stem for a token.
///
/// A known glyph name becomes a sanitized lowercase identifier; everything
/// else falls back to the token's hyphen-joined codepoints.
pub fn asset_name(token: &EmojiToken, hint: Option<&str>) -> String {
    if let Some(name) = hint {
        let safe: String = name
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if !safe.is_empty() {
            return safe;
        }
    }
    let codepoints: Vec<String> = token
        .raw()
        .chars()
        .map(|c| format!("{:04x}", c as u32))
        .collect();
    format!("emoji_{}", codepoints.join("-"))
}
