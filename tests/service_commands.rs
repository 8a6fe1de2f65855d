//! Command surface and message-trigger behavior of the soundboard service.

mod common;

use chime::cache::{Lookup, ResolutionEntry};
use chime::discover::{Discovery, SoundDiscoverer};
use chime::room::{AudioSink, ChannelId, RoomId};
use chime::token::EmojiToken;
use chime::{AssetRef, ChimeError, Config, Soundboard, Speaker, VoiceConnector};
use common::{wait_until, ScriptedSink};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);
const ROOM: RoomId = RoomId(1);
const CHANNEL: ChannelId = ChannelId(5);

/// Discoverer answering from a fixed token-to-path map.
#[derive(Default)]
struct MapDiscoverer {
    map: Mutex<HashMap<String, PathBuf>>,
    unready: bool,
    fail: AtomicBool,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl MapDiscoverer {
    fn with_entry(token: &str, path: impl Into<PathBuf>) -> Self {
        let discoverer = MapDiscoverer::default();
        discoverer.map.lock().insert(token.to_string(), path.into());
        discoverer
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SoundDiscoverer for MapDiscoverer {
    fn ready(&self) -> bool {
        !self.unready
    }

    fn resolve(&self, token: &EmojiToken, _hint: Option<&str>) -> chime::Result<Discovery> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChimeError::Discovery("backend unreachable".to_string()));
        }
        match self.map.lock().get(token.raw()) {
            Some(path) => Ok(Discovery::Found(AssetRef::new(path.clone()))),
            None => Ok(Discovery::NotFound),
        }
    }
}

struct StubConnector {
    sink: Arc<ScriptedSink>,
}

impl VoiceConnector for StubConnector {
    fn connect(&self, _room: RoomId, _channel: ChannelId) -> chime::Result<Arc<dyn AudioSink>> {
        Ok(self.sink.clone())
    }
}

fn board_with(discoverer: Arc<dyn SoundDiscoverer>) -> (tempfile::TempDir, Soundboard) {
    let dir = tempfile::tempdir().unwrap();
    let cfg = Config {
        cache_file: dir.path().join("cache.json"),
        sounds_dir: dir.path().join("sounds"),
        ..Config::default()
    };
    let board = Soundboard::open(cfg, discoverer).unwrap();
    (dir, board)
}

fn token(text: &str) -> EmojiToken {
    EmojiToken::parse(text).expect("test text must tokenize")
}

fn write_clip(path: &Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, b"placeholder clip bytes").unwrap();
}

fn speaker_in(channel: ChannelId) -> Speaker {
    Speaker {
        is_bot: false,
        voice_channel: Some(channel),
    }
}

#[test]
fn test_adminclear_requires_the_exact_phrase() {
    let (dir, board) = board_with(Arc::new(MapDiscoverer::default()));
    let sounds = dir.path().join("sounds");
    write_clip(&sounds.join("fire.mp3"));
    write_clip(&sounds.join("bell.mp3"));
    fs::write(sounds.join("notes.txt"), b"keep me").unwrap();
    board
        .cache()
        .record(
            &token("🔥"),
            ResolutionEntry::Resolved(AssetRef::new(sounds.join("fire.mp3"))),
        )
        .unwrap();

    let refusal = board.adminclear("nope");
    assert!(refusal.contains("nothing was deleted"));
    assert!(sounds.join("fire.mp3").exists());
    assert!(sounds.join("bell.mp3").exists());
    assert_eq!(board.cache().positive_count(), 1);

    // Confirmation is case/whitespace tolerant but must be the phrase
    let reply = board.adminclear(" PLEASE ");
    assert!(reply.contains("Deleted 2 stored sound(s)"));
    assert!(!sounds.join("fire.mp3").exists());
    assert!(!sounds.join("bell.mp3").exists());
    assert!(sounds.join("notes.txt").exists(), "only clips are purged");
    assert!(board.cache().is_empty());
    board.close();
}

#[test]
fn test_discover_caches_and_reports_existing_mappings() {
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("sounds").join("fire.mp3");
    write_clip(&clip);
    let discoverer = Arc::new(MapDiscoverer::with_entry("🔥", &clip));
    let (_dir, board) = board_with(discoverer.clone());

    let reply = board.discover("🔥 please");
    assert!(reply.contains("Discovered a sound"), "got: {reply}");
    assert!(matches!(
        board.cache().lookup(&token("🔥")),
        Lookup::Resolved(_)
    ));
    assert_eq!(discoverer.calls(), 1);

    // A known-positive mapping short-circuits to a report
    let reply = board.discover("🔥");
    assert!(reply.contains("already exists"), "got: {reply}");
    assert_eq!(discoverer.calls(), 1);
    board.close();
}

#[test]
fn test_discover_retries_a_negative_entry() {
    let discoverer = Arc::new(MapDiscoverer::default());
    let (_dir, board) = board_with(discoverer.clone());

    let reply = board.discover("🔔");
    assert!(reply.contains("No sound found"), "got: {reply}");
    assert_eq!(board.cache().lookup(&token("🔔")), Lookup::Negative);

    // Asking explicitly is the manual retry path for negatives
    let _ = board.discover("🔔");
    assert_eq!(discoverer.calls(), 2);
    board.close();
}

#[test]
fn test_transient_failure_does_not_poison_the_cache() {
    let discoverer = Arc::new(MapDiscoverer::default());
    discoverer.fail.store(true, Ordering::SeqCst);
    let (_dir, board) = board_with(discoverer.clone());

    let reply = board.discover("🔥");
    assert!(reply.contains("Discovery failed"), "got: {reply}");
    assert_eq!(board.cache().lookup(&token("🔥")), Lookup::Unknown);
    assert!(!board.cache().is_discovering(&token("🔥")));
    board.close();
}

#[test]
fn test_redo_deletes_the_old_asset_and_rediscovers() {
    let dir = tempfile::tempdir().unwrap();
    let old_clip = dir.path().join("sounds").join("old.mp3");
    let new_clip = dir.path().join("sounds").join("new.mp3");
    write_clip(&old_clip);
    write_clip(&new_clip);

    let discoverer = Arc::new(MapDiscoverer::with_entry("🔥", &new_clip));
    let (_dir, board) = board_with(discoverer.clone());
    board
        .cache()
        .record(
            &token("🔥"),
            ResolutionEntry::Resolved(AssetRef::new(&old_clip)),
        )
        .unwrap();

    let reply = board.redo("🔥");
    assert!(reply.contains("Re-discovered"), "got: {reply}");
    assert!(!old_clip.exists(), "old asset file is removed");
    assert_eq!(discoverer.calls(), 1);
    assert_eq!(
        board.cache().lookup(&token("🔥")),
        Lookup::Resolved(AssetRef::new(&new_clip))
    );
    board.close();
}

#[test]
fn test_redo_overrides_a_negative_entry() {
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("sounds").join("bell.mp3");
    write_clip(&clip);
    let discoverer = Arc::new(MapDiscoverer::with_entry("🔔", &clip));
    let (_dir, board) = board_with(discoverer.clone());
    board
        .cache()
        .record(&token("🔔"), ResolutionEntry::Negative)
        .unwrap();

    let reply = board.redo("🔔");
    assert!(reply.contains("Re-discovered"), "got: {reply}");
    assert!(matches!(
        board.cache().lookup(&token("🔔")),
        Lookup::Resolved(_)
    ));
    board.close();
}

#[test]
fn test_message_trigger_gating() {
    let discoverer = Arc::new(MapDiscoverer::default());
    let (_dir, board) = board_with(discoverer.clone());

    // Not linked to any voice channel yet
    assert_eq!(board.handle_message(ROOM, &speaker_in(CHANNEL), "🔥"), 0);
    assert_eq!(discoverer.calls(), 0);

    let sink = ScriptedSink::immediate();
    board.engine().connect(ROOM, CHANNEL, sink);

    // Bot authors never trigger sounds
    let bot = Speaker {
        is_bot: true,
        voice_channel: Some(CHANNEL),
    };
    assert_eq!(board.handle_message(ROOM, &bot, "🔥"), 0);

    // Authors outside the linked channel are ignored
    assert_eq!(board.handle_message(ROOM, &speaker_in(ChannelId(9)), "🔥"), 0);
    let no_voice = Speaker {
        is_bot: false,
        voice_channel: None,
    };
    assert_eq!(board.handle_message(ROOM, &no_voice, "🔥"), 0);
    assert_eq!(discoverer.calls(), 0);
    board.close();
}

#[test]
fn test_known_token_queues_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("sounds").join("fire.mp3");
    write_clip(&clip);
    let (_dir, board) = board_with(Arc::new(MapDiscoverer::default()));
    board
        .cache()
        .record(&token("🔥"), ResolutionEntry::Resolved(AssetRef::new(&clip)))
        .unwrap();

    let sink = ScriptedSink::immediate();
    board.engine().connect(ROOM, CHANNEL, sink.clone());

    assert_eq!(board.handle_message(ROOM, &speaker_in(CHANNEL), "🔥"), 1);
    assert!(wait_until(WAIT, || sink.play_count() == 1));
    assert!(wait_until(WAIT, || !board.engine().is_playing(ROOM)));
    board.close();
}

#[test]
fn test_stale_positive_is_skipped_without_rediscovery() {
    let dir = tempfile::tempdir().unwrap();
    let gone = dir.path().join("sounds").join("gone.mp3");
    let discoverer = Arc::new(MapDiscoverer::default());
    let (_dir, board) = board_with(discoverer.clone());
    board
        .cache()
        .record(&token("🔥"), ResolutionEntry::Resolved(AssetRef::new(&gone)))
        .unwrap();

    let sink = ScriptedSink::immediate();
    board.engine().connect(ROOM, CHANNEL, sink.clone());

    assert_eq!(board.handle_message(ROOM, &speaker_in(CHANNEL), "🔥"), 0);
    assert_eq!(discoverer.calls(), 0, "sticky entries never auto-rediscover");
    assert!(matches!(
        board.cache().lookup(&token("🔥")),
        Lookup::Resolved(_)
    ));
    assert_eq!(sink.play_count(), 0);
    board.close();
}

#[test]
fn test_unknown_token_discovers_and_enqueues_on_success() {
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("sounds").join("bell.mp3");
    write_clip(&clip);
    let discoverer = Arc::new(MapDiscoverer::with_entry("🔔", &clip));
    let (_dir, board) = board_with(discoverer.clone());

    let sink = ScriptedSink::immediate();
    board.engine().connect(ROOM, CHANNEL, sink.clone());

    // Nothing queues immediately; the resolution lands asynchronously
    assert_eq!(board.handle_message(ROOM, &speaker_in(CHANNEL), "🔔"), 0);
    assert!(wait_until(WAIT, || sink.play_count() == 1));
    assert!(matches!(
        board.cache().lookup(&token("🔔")),
        Lookup::Resolved(_)
    ));
    assert!(!board.cache().is_discovering(&token("🔔")));
    board.close();
}

#[test]
fn test_inflight_guard_deduplicates_discovery() {
    let discoverer = Arc::new(MapDiscoverer {
        delay: Some(Duration::from_millis(150)),
        ..MapDiscoverer::default()
    });
    let (_dir, board) = board_with(discoverer.clone());
    let sink = ScriptedSink::immediate();
    board.engine().connect(ROOM, CHANNEL, sink);

    board.handle_message(ROOM, &speaker_in(CHANNEL), "🔔");
    board.handle_message(ROOM, &speaker_in(CHANNEL), "🔔");

    assert!(wait_until(WAIT, || {
        board.cache().lookup(&token("🔔")) == Lookup::Negative
    }));
    assert!(wait_until(WAIT, || !board
        .cache()
        .is_discovering(&token("🔔"))));
    assert_eq!(discoverer.calls(), 1, "second trigger hits the guard");
    board.close();
}

#[test]
fn test_unready_discoverer_short_circuits_without_negative() {
    let discoverer = Arc::new(MapDiscoverer {
        unready: true,
        ..MapDiscoverer::default()
    });
    let (_dir, board) = board_with(discoverer.clone());
    let sink = ScriptedSink::immediate();
    board.engine().connect(ROOM, CHANNEL, sink);

    board.handle_message(ROOM, &speaker_in(CHANNEL), "🔥");
    assert_eq!(discoverer.calls(), 0);
    // No negative entry: discovery resumes untouched once configured
    assert_eq!(board.cache().lookup(&token("🔥")), Lookup::Unknown);
    assert!(!board.cache().is_discovering(&token("🔥")));
    board.close();
}

#[test]
fn test_join_moves_and_leaves() {
    let (_dir, board) = board_with(Arc::new(MapDiscoverer::default()));
    let connector = StubConnector {
        sink: ScriptedSink::immediate(),
    };

    assert_eq!(
        board.join(ROOM, None, &connector),
        "You are not in a voice channel."
    );
    assert_eq!(
        board.join(ROOM, Some(ChannelId(5)), &connector),
        "Connected to voice channel 5."
    );
    assert_eq!(
        board.join(ROOM, Some(ChannelId(5)), &connector),
        "Already connected to your voice channel."
    );
    assert_eq!(
        board.join(ROOM, Some(ChannelId(6)), &connector),
        "Moved to voice channel 6."
    );
    assert_eq!(board.engine().linked_channel(ROOM), Some(ChannelId(6)));

    assert_eq!(board.leave(ROOM), "Disconnected and cleared the queue.");
    assert_eq!(board.leave(ROOM), "Not connected to a voice channel.");
    board.close();
}

#[test]
fn test_skip_and_queue_reports() {
    let dir = tempfile::tempdir().unwrap();
    let fire = dir.path().join("sounds").join("fire.mp3");
    let bell = dir.path().join("sounds").join("bell.mp3");
    write_clip(&fire);
    write_clip(&bell);
    let (_dir, board) = board_with(Arc::new(MapDiscoverer::default()));
    board
        .cache()
        .record(&token("🔥"), ResolutionEntry::Resolved(AssetRef::new(&fire)))
        .unwrap();
    board
        .cache()
        .record(&token("🔔"), ResolutionEntry::Resolved(AssetRef::new(&bell)))
        .unwrap();

    let sink = ScriptedSink::holding();
    board.engine().connect(ROOM, CHANNEL, sink.clone());

    assert_eq!(board.skip(ROOM), "Nothing is playing.");
    assert_eq!(board.queue_report(ROOM), "Queue is empty.");

    board.handle_message(ROOM, &speaker_in(CHANNEL), "🔥");
    assert!(wait_until(WAIT, || board.engine().is_playing(ROOM)));
    board.handle_message(ROOM, &speaker_in(CHANNEL), "🔔");
    assert_eq!(board.queue_report(ROOM), "1 sound(s) in queue.");

    assert_eq!(board.skip(ROOM), "Skipped; cleared 1 queued sound(s).");
    assert!(wait_until(WAIT, || !board.engine().is_playing(ROOM)));
    assert_eq!(board.queue_report(ROOM), "Queue is empty.");
    assert_eq!(sink.play_count(), 1);
    board.close();
}

#[test]
fn test_sounds_listing() {
    let (_dir, board) = board_with(Arc::new(MapDiscoverer::default()));
    assert!(board.sounds().contains("No sounds discovered yet"));

    board
        .cache()
        .record(&token("🔥"), ResolutionEntry::Resolved(AssetRef::new("f.mp3")))
        .unwrap();
    board
        .cache()
        .record(&token("🔔"), ResolutionEntry::Resolved(AssetRef::new("b.mp3")))
        .unwrap();
    board
        .cache()
        .record(&token("💀"), ResolutionEntry::Negative)
        .unwrap();

    let listing = board.sounds();
    assert!(listing.contains("2 sound(s) available"), "got: {listing}");
    assert!(listing.contains("🔥"));
    assert!(!listing.contains("💀"), "negatives are not listed");
    board.close();
}
