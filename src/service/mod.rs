//! Soundboard service and command surface
//!
//! [`Soundboard`] wires the tokenizer, resolution cache, discovery pool and
//! room engine together and exposes the two entry points a chat gateway
//! needs: the message trigger ([`handle_message`]) and the room-scoped
//! commands. Command replies are plain strings; presenting them privately to
//! the invoker is the gateway's business, as is the voice connection itself
//! (provided through [`VoiceConnector`]).
//!
//! [`handle_message`]: Soundboard::handle_message

use crate::cache::{Lookup, ResolutionCache, ResolutionEntry};
use crate::config::Config;
use crate::discover::{Discovery, DiscoveryPool, SoundDiscoverer};
use crate::mixer::Mixer;
use crate::room::{AudioSink, ChannelId, RoomEngine, RoomId};
use crate::token::EmojiToken;
use crate::{tokenize, AssetRef, Result};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use tracing::{debug, info, warn};

/// Entries shown by the `sounds` status listing.
const SOUNDS_SAMPLE_LIMIT: usize = 20;

/// The author of an incoming message, as the gateway sees them.
#[derive(Debug, Clone)]
pub struct Speaker {
    /// Bot authors never trigger sounds.
    pub is_bot: bool,
    /// Voice channel the author currently sits in, if any.
    pub voice_channel: Option<ChannelId>,
}

/// Gateway capability to open a voice connection for a room.
pub trait VoiceConnector {
    /// Connect (or move) to `channel` and return the sink playing into it.
    fn connect(&self, room: RoomId, channel: ChannelId) -> Result<Arc<dyn AudioSink>>;
}

/// Outcome of one resolution attempt after the cache was updated.
enum Applied {
    Found(AssetRef),
    Negative,
    Failed(String),
}

/// The assembled soundboard: cache, discovery pool and room engine behind
/// the message trigger and the command surface.
pub struct Soundboard {
    cfg: Config,
    cache: Arc<ResolutionCache>,
    pool: Arc<DiscoveryPool>,
    engine: Arc<RoomEngine>,
    discoverer: Arc<dyn SoundDiscoverer>,
    credentials_warned: AtomicBool,
}

impl Soundboard {
    /// Validate the config, load the cache and start the worker threads.
    pub fn open(cfg: Config, discoverer: Arc<dyn SoundDiscoverer>) -> Result<Self> {
        cfg.validate()?;
        fs::create_dir_all(&cfg.sounds_dir)?;
        let cache = Arc::new(ResolutionCache::open(&cfg.cache_file)?);
        let pool = Arc::new(DiscoveryPool::new(
            discoverer.clone(),
            cfg.discovery_workers,
        )?);
        let engine = Arc::new(RoomEngine::new(
            Mixer::new(cfg.mixer.clone()),
            cfg.batch_cap,
        )?);
        Ok(Soundboard {
            cfg,
            cache,
            pool,
            engine,
            discoverer,
            credentials_warned: AtomicBool::new(false),
        })
    }

    /// Graceful shutdown: drain and join the discovery pool, then the room
    /// engine thread. Safe to call more than once.
    pub fn close(&self) {
        self.pool.close();
        self.engine.close();
    }

    /// The room engine (queue state, voice links).
    pub fn engine(&self) -> &RoomEngine {
        &self.engine
    }

    /// The resolution cache.
    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Message-driven trigger.
    ///
    /// Bot authors are ignored, as are authors who are not sitting in the
    /// voice channel this room's sink is linked to. Known tokens whose asset
    /// file still exists queue immediately; a vanished file is skipped
    /// without re-discovery (`redo` forces that); negatives stay silent;
    /// unknown tokens start a guarded discovery and queue on success.
    ///
    /// Returns the number of sounds queued immediately.
    pub fn handle_message(&self, room: RoomId, speaker: &Speaker, text: &str) -> usize {
        if speaker.is_bot {
            return 0;
        }
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return 0;
        }
        let Some(channel) = speaker.voice_channel else {
            return 0;
        };
        if self.engine.linked_channel(room) != Some(channel) {
            return 0;
        }

        let mut queued = 0;
        for token in tokens {
            match self.cache.lookup(&token) {
                Lookup::Resolved(asset) if asset.path().exists() => {
                    self.engine.enqueue(room, asset);
                    queued += 1;
                }
                Lookup::Resolved(asset) => {
                    debug!(
                        token = %token,
                        asset = %asset,
                        "cached asset file is gone; staying silent until a redo"
                    );
                }
                Lookup::Negative => {}
                Lookup::Unknown => self.spawn_discovery(room, token),
            }
        }
        queued
    }

    /// `join`: connect to the invoker's voice channel; a no-op when already
    /// there, a move when connected elsewhere.
    pub fn join(
        &self,
        room: RoomId,
        invoker_channel: Option<ChannelId>,
        connector: &dyn VoiceConnector,
    ) -> String {
        let Some(channel) = invoker_channel else {
            return "You are not in a voice channel.".to_string();
        };
        let current = self.engine.linked_channel(room);
        if current == Some(channel) {
            return "Already connected to your voice channel.".to_string();
        }
        match connector.connect(room, channel) {
            Ok(sink) => {
                self.engine.connect(room, channel, sink);
                if current.is_some() {
                    format!("Moved to voice channel {channel}.")
                } else {
                    format!("Connected to voice channel {channel}.")
                }
            }
            Err(e) => format!("Could not connect: {e}"),
        }
    }

    /// `leave`: disconnect from voice and clear the room's queue.
    pub fn leave(&self, room: RoomId) -> String {
        if self.engine.disconnect(room) {
            "Disconnected and cleared the queue.".to_string()
        } else {
            "Not connected to a voice channel.".to_string()
        }
    }

    /// `skip`: halt the current playback and empty the queue.
    pub fn skip(&self, room: RoomId) -> String {
        let was_playing = self.engine.is_playing(room);
        let cleared = self.engine.stop(room);
        if was_playing {
            format!("Skipped; cleared {cleared} queued sound(s).")
        } else if cleared > 0 {
            format!("Removed {cleared} queued sound(s).")
        } else {
            "Nothing is playing.".to_string()
        }
    }

    /// `sounds`: how many tokens have a known sound, with a short sample.
    pub fn sounds(&self) -> String {
        let count = self.cache.positive_count();
        let sample: Vec<String> = self
            .cache
            .positive_tokens()
            .into_iter()
            .take(SOUNDS_SAMPLE_LIMIT)
            .collect();
        if sample.is_empty() {
            "No sounds discovered yet. Join a voice channel and type some emoji.".to_string()
        } else {
            format!("{} sound(s) available. Sample: {}", count, sample.join(" "))
        }
    }

    /// `queue`: current queue depth for the room.
    pub fn queue_report(&self, room: RoomId) -> String {
        match self.engine.queue_len(room) {
            0 => "Queue is empty.".to_string(),
            n => format!("{n} sound(s) in queue."),
        }
    }

    /// `discover`: resolve the first emoji in `argument` outside the message
    /// path, or report the existing mapping when one is known.
    ///
    /// A negative entry does not short-circuit here; asking explicitly is
    /// the manual way to retry a token that previously came up empty.
    pub fn discover(&self, argument: &str) -> String {
        let Some(token) = EmojiToken::parse(argument) else {
            return "No valid emoji found.".to_string();
        };
        if let Lookup::Resolved(asset) = self.cache.lookup(&token) {
            return format!(
                "A sound already exists for {}{}: {}",
                token,
                describe_custom(&token),
                asset
            );
        }
        match self.resolve_blocking(&token) {
            Applied::Found(asset) => format!(
                "Discovered a sound for {}{}: {}",
                token,
                describe_custom(&token),
                asset
            ),
            Applied::Negative => {
                format!("No sound found for {}{}.", token, describe_custom(&token))
            }
            Applied::Failed(reason) => format!("Discovery failed for {token}: {reason}"),
        }
    }

    /// `redo`: delete the stored asset and cache entry for the first emoji
    /// in `argument`, then force a fresh discovery regardless of prior
    /// positive or negative state.
    pub fn redo(&self, argument: &str) -> String {
        let Some(token) = EmojiToken::parse(argument) else {
            return "No valid emoji found.".to_string();
        };
        let mut notes = Vec::new();
        match self.cache.remove(&token) {
            Ok(Some(ResolutionEntry::Resolved(asset))) => {
                if asset.path().exists() {
                    match fs::remove_file(asset.path()) {
                        Ok(()) => notes.push(format!("Removed the old sound file for {token}.")),
                        Err(e) => notes.push(format!("Could not delete the old file: {e}.")),
                    }
                }
            }
            Ok(_) => {}
            Err(e) => notes.push(format!("Could not update the cache: {e}.")),
        }
        let outcome = match self.resolve_blocking(&token) {
            Applied::Found(asset) => format!("Re-discovered a sound for {token}: {asset}"),
            Applied::Negative => format!("Re-discovery found no sound for {token}."),
            Applied::Failed(reason) => format!("Re-discovery failed for {token}: {reason}"),
        };
        notes.push(outcome);
        notes.join(" ")
    }

    /// `adminclear`: wipe every stored sound and the whole resolution cache.
    /// Requires the literal confirmation phrase; anything else refuses and
    /// touches nothing.
    pub fn adminclear(&self, confirm: &str) -> String {
        if confirm.trim().to_lowercase() != self.cfg.confirm_phrase {
            return format!(
                "Confirmation text does not match '{}'; nothing was deleted.",
                self.cfg.confirm_phrase
            );
        }
        let deleted = purge_sounds_dir(&self.cfg.sounds_dir);
        match self.cache.clear() {
            Ok(()) => {
                info!(deleted, "destructive reset completed");
                format!("Deleted {deleted} stored sound(s) and cleared the resolution cache.")
            }
            Err(e) => {
                format!("Deleted {deleted} stored sound(s), but clearing the cache failed: {e}")
            }
        }
    }

    /// Start a guarded discovery for an unknown token; a success queues the
    /// asset to the triggering room.
    fn spawn_discovery(&self, room: RoomId, token: EmojiToken) {
        if !self.cache.begin_discovery(&token) {
            return;
        }
        if !self.discoverer.ready() {
            self.warn_missing_credentials();
            self.cache.end_discovery(&token);
            return;
        }
        let cache = self.cache.clone();
        let engine = self.engine.clone();
        let submitted = self.pool.submit(token.clone(), move |token, outcome| {
            apply_outcome(&cache, Some((engine.as_ref(), room)), token, outcome);
            cache.end_discovery(token);
        });
        if let Err(e) = submitted {
            warn!(token = %token, "discovery not submitted: {}", e);
            self.cache.end_discovery(&token);
        }
    }

    /// Run one guarded resolution to completion on the pool, blocking the
    /// calling (command) thread for the outcome.
    fn resolve_blocking(&self, token: &EmojiToken) -> Applied {
        if !self.cache.begin_discovery(token) {
            return Applied::Failed("a discovery for this emoji is already in flight".to_string());
        }
        if !self.discoverer.ready() {
            self.warn_missing_credentials();
            self.cache.end_discovery(token);
            return Applied::Failed("discovery is not configured".to_string());
        }
        let cache = self.cache.clone();
        let (tx, rx) = mpsc::channel();
        let submitted = self.pool.submit(token.clone(), move |token, outcome| {
            let applied = apply_outcome(&cache, None, token, outcome);
            cache.end_discovery(token);
            let _ = tx.send(applied);
        });
        if let Err(e) = submitted {
            self.cache.end_discovery(token);
            return Applied::Failed(e.to_string());
        }
        rx.recv()
            .unwrap_or_else(|_| Applied::Failed("discovery worker went away".to_string()))
    }

    fn warn_missing_credentials(&self) {
        if !self.credentials_warned.swap(true, Ordering::Relaxed) {
            warn!("sound discovery is not configured; unknown emoji will stay silent");
        }
    }
}

/// Parenthesized glyph name for replies about custom tokens.
fn describe_custom(token: &EmojiToken) -> String {
    match token.discovery_hint() {
        Some(name) => format!(" ({name})"),
        None => String::new(),
    }
}

/// Update the cache from a resolution outcome and optionally queue the new
/// asset. Transient failures record nothing, so the token stays eligible.
fn apply_outcome(
    cache: &ResolutionCache,
    enqueue: Option<(&RoomEngine, RoomId)>,
    token: &EmojiToken,
    outcome: Result<Discovery>,
) -> Applied {
    match outcome {
        Ok(Discovery::Found(asset)) => {
            if let Err(e) = cache.record(token, ResolutionEntry::Resolved(asset.clone())) {
                warn!(token = %token, "failed to persist resolution: {}", e);
            }
            info!(token = %token, asset = %asset, "cached new sound");
            if let Some((engine, room)) = enqueue {
                engine.enqueue(room, asset.clone());
            }
            Applied::Found(asset)
        }
        Ok(Discovery::NotFound) => {
            if let Err(e) = cache.record(token, ResolutionEntry::Negative) {
                warn!(token = %token, "failed to persist negative entry: {}", e);
            }
            debug!(token = %token, "no sound exists; recorded negative entry");
            Applied::Negative
        }
        Err(e) => {
            warn!(token = %token, "discovery failed: {}", e);
            Applied::Failed(e.to_string())
        }
    }
}

/// Delete every stored `.mp3` under `dir`; a missing directory is zero.
fn purge_sounds_dir(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return 0,
    };
    let mut deleted = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map(|ext| ext == "mp3").unwrap_or(false) {
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(path = %path.display(), "failed to delete stored sound: {}", e),
            }
        }
    }
    deleted
}
