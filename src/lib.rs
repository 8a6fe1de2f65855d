//! Emoji-triggered soundboard engine
//!
//! Turns emoji typed into a chat room into short sound clips played over the
//! room's voice session. Bursts of emoji are folded into a single blended
//! audio event: pending clips are dequeued in batches and rendered into one
//! stream with staggered, partially overlapping start times instead of being
//! played back to back.
//!
//! # Features
//! - Emoji tokenizer for free-form text, including multi-codepoint joined
//!   glyphs and platform-custom glyph markup
//! - Durable emoji-to-sound mapping with an in-flight guard so the same
//!   unresolved emoji is never looked up twice concurrently
//! - Per-room playback queue with a batch-draining state machine
//! - Overlap mixer producing one 48 kHz stereo stream per batch via ffmpeg
//! - Bounded worker pool for sound discovery, off the message path
//! - Room-scoped command surface (`join`, `leave`, `skip`, `sounds`,
//!   `queue`, `discover`, `redo`, `adminclear`)
//!
//! # Crate feature flags
//! - `playback` (opt-in): Local audio output and the interactive CLI
//!   (enables the optional `rodio` dep)
//!
//! # Quick start
//! ## Tokenizing
//! ```
//! use chime::token::tokenize;
//!
//! let tokens = tokenize("nice shot 🔥🔥 <:pog:123456789012345678>");
//! assert_eq!(tokens.len(), 3);
//! assert_eq!(tokens[0].raw(), "🔥");
//! ```
//!
//! ## Running a soundboard
//! ```no_run
//! use chime::{Config, DirectoryDiscoverer, Soundboard, Speaker};
//! use chime::room::{ChannelId, RoomId};
//! use std::sync::Arc;
//!
//! # fn main() -> chime::Result<()> {
//! let cfg = Config::default();
//! let discoverer = Arc::new(DirectoryDiscoverer::new("library", &cfg.sounds_dir));
//! let board = Soundboard::open(cfg, discoverer)?;
//!
//! // The chat gateway feeds messages in; known emoji queue immediately,
//! // unknown ones are resolved on the worker pool and queue on success.
//! let speaker = Speaker { is_bot: false, voice_channel: Some(ChannelId(7)) };
//! board.handle_message(RoomId(1), &speaker, "🔥🔥🔥");
//! board.close();
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

// Domain modules (leaf to root)
pub mod cache; // Resolution cache and discovery guard
pub mod config; // Engine configuration
pub mod discover; // Discoverer contract and bounded worker pool
pub mod mixer; // Overlap mix planning and rendering
#[cfg(feature = "playback")]
pub mod playback; // Local audio output (rodio)
pub mod room; // Per-room queues and the drain state machine
pub mod service; // Soundboard service and command surface
pub mod token; // Emoji tokenizer

use std::path::{Path, PathBuf};

pub use cache::{Lookup, ResolutionCache, ResolutionEntry};
pub use config::Config;
pub use discover::{DirectoryDiscoverer, Discovery, DiscoveryPool, SoundDiscoverer};
pub use mixer::{MixPlan, Mixer, MixerConfig};
pub use room::{AudioSink, Clip, RoomEngine, RoomId};
pub use service::{Soundboard, Speaker, VoiceConnector};
pub use token::{tokenize, EmojiToken};

/// Error types for soundboard operations
#[derive(thiserror::Error, Debug)]
pub enum ChimeError {
    /// Cache persistence failed; the in-memory table is still valid
    #[error("Cache persistence error: {0}")]
    Cache(String),

    /// Sound discovery failed (transient external error)
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// The mixer failed to render a batch
    #[error("Mix error: {0}")]
    Mix(String),

    /// Audio output error
    #[error("Playback error: {0}")]
    Playback(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error from filesystem or subprocess
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for ChimeError {
    /// Converts a String into `ChimeError::Other`.
    fn from(s: String) -> Self {
        ChimeError::Other(s)
    }
}

impl From<&str> for ChimeError {
    /// Converts a &str into `ChimeError::Other`.
    fn from(s: &str) -> Self {
        ChimeError::Other(s.to_string())
    }
}

/// Result type for soundboard operations
pub type Result<T> = std::result::Result<T, ChimeError>;

/// A resolved, playable sound file reference.
///
/// Immutable and cheap to clone; equality is by path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AssetRef {
    path: PathBuf,
}

impl AssetRef {
    /// Create a reference to a playable sound file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        AssetRef { path: path.into() }
    }

    /// Path of the backing sound file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume the reference and return the backing path.
    pub fn into_path(self) -> PathBuf {
        self.path
    }
}

impl std::fmt::Display for AssetRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
