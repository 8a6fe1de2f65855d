//! Resolution cache and discovery guard
//!
//! The durable emoji-to-asset table is the single source of truth for
//! "known" tokens. Each entry is either a resolved asset path or an explicit
//! negative ("no sound exists for this token, do not retry automatically").
//! A token absent from the table and absent from the in-flight guard is
//! unknown and eligible for discovery.
//!
//! On disk the table is a JSON object mapping the raw token string to an
//! asset path string, or `null` for a negative entry. The file is rewritten
//! in full on every mutation through a temp file followed by an atomic
//! rename, so a crash mid-write leaves the previous snapshot intact.

use crate::token::EmojiToken;
use crate::{AssetRef, ChimeError, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;

/// One durable record for a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionEntry {
    /// A playable asset is known for this token.
    Resolved(AssetRef),
    /// Definitively no sound for this token; sticky until forced anew.
    Negative,
}

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// Token has a known asset.
    Resolved(AssetRef),
    /// Token is known to have no sound.
    Negative,
    /// Token has never been resolved; eligible for discovery.
    Unknown,
}

/// Durable token-to-asset mapping plus the in-flight discovery guard.
///
/// An owned service object with an explicit lifecycle: [`open`] loads the
/// persisted table (or starts empty), every mutating call persists before it
/// returns. Mutation is protected by one mutex per logical table.
///
/// [`open`]: ResolutionCache::open
pub struct ResolutionCache {
    path: PathBuf,
    table: Mutex<HashMap<String, ResolutionEntry>>,
    guard: Mutex<HashSet<String>>,
}

impl ResolutionCache {
    /// Open the cache backed by the JSON file at `path`.
    ///
    /// A missing file starts an empty table; an unreadable or unparsable
    /// file is an error rather than silent data loss.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = match fs::read(&path) {
            Ok(bytes) => {
                let raw: HashMap<String, Option<String>> =
                    serde_json::from_slice(&bytes).map_err(|e| {
                        ChimeError::Cache(format!("failed to parse '{}': {}", path.display(), e))
                    })?;
                raw.into_iter()
                    .map(|(token, entry)| {
                        let entry = match entry {
                            Some(p) => ResolutionEntry::Resolved(AssetRef::new(p)),
                            None => ResolutionEntry::Negative,
                        };
                        (token, entry)
                    })
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(ChimeError::Cache(format!(
                    "failed to read '{}': {}",
                    path.display(),
                    e
                )))
            }
        };
        info!(
            entries = table.len(),
            path = %path.display(),
            "loaded resolution cache"
        );
        Ok(ResolutionCache {
            path,
            table: Mutex::new(table),
            guard: Mutex::new(HashSet::new()),
        })
    }

    /// Look a token up in the durable table.
    pub fn lookup(&self, token: &EmojiToken) -> Lookup {
        match self.table.lock().get(token.raw()) {
            Some(ResolutionEntry::Resolved(asset)) => Lookup::Resolved(asset.clone()),
            Some(ResolutionEntry::Negative) => Lookup::Negative,
            None => Lookup::Unknown,
        }
    }

    /// Mark a token as having a discovery in flight.
    ///
    /// Atomic check-and-set: returns `false` without side effects when the
    /// token is already guarded, `true` after inserting it. The caller that
    /// received `true` owns the matching [`end_discovery`] call.
    ///
    /// [`end_discovery`]: ResolutionCache::end_discovery
    pub fn begin_discovery(&self, token: &EmojiToken) -> bool {
        self.guard.lock().insert(token.raw().to_string())
    }

    /// Drop a token from the in-flight guard, unconditionally.
    ///
    /// Runs on every outcome path: success, failure, or already-cached race.
    pub fn end_discovery(&self, token: &EmojiToken) {
        self.guard.lock().remove(token.raw());
    }

    /// Whether a discovery is currently in flight for this token.
    pub fn is_discovering(&self, token: &EmojiToken) -> bool {
        self.guard.lock().contains(token.raw())
    }

    /// Upsert an entry and persist the full table before returning.
    ///
    /// The in-memory table is updated first; a persistence failure surfaces
    /// as an error but leaves the new value usable for the session.
    pub fn record(&self, token: &EmojiToken, entry: ResolutionEntry) -> Result<()> {
        let mut table = self.table.lock();
        table.insert(token.raw().to_string(), entry);
        self.persist(&table)
    }

    /// Delete one entry and persist; returns the removed entry.
    pub fn remove(&self, token: &EmojiToken) -> Result<Option<ResolutionEntry>> {
        let mut table = self.table.lock();
        let removed = table.remove(token.raw());
        if removed.is_some() {
            self.persist(&table)?;
        }
        Ok(removed)
    }

    /// Wipe the table and persist the empty snapshot.
    pub fn clear(&self) -> Result<()> {
        let mut table = self.table.lock();
        table.clear();
        self.persist(&table)
    }

    /// Number of entries, negatives included.
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    /// Whether the table holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// Number of tokens with a known asset.
    pub fn positive_count(&self) -> usize {
        self.table
            .lock()
            .values()
            .filter(|e| matches!(e, ResolutionEntry::Resolved(_)))
            .count()
    }

    /// Raw token strings with a known asset, sorted for stable listings.
    pub fn positive_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self
            .table
            .lock()
            .iter()
            .filter(|(_, e)| matches!(e, ResolutionEntry::Resolved(_)))
            .map(|(t, _)| t.clone())
            .collect();
        tokens.sort();
        tokens
    }

    /// Rewrite the persisted snapshot. Called with the table lock held so a
    /// concurrent mutation cannot interleave between update and write.
    fn persist(&self, table: &HashMap<String, ResolutionEntry>) -> Result<()> {
        let snapshot: BTreeMap<&str, Option<String>> = table
            .iter()
            .map(|(token, entry)| {
                let path = match entry {
                    ResolutionEntry::Resolved(asset) => {
                        Some(asset.path().to_string_lossy().into_owned())
                    }
                    ResolutionEntry::Negative => None,
                };
                (token.as_str(), path)
            })
            .collect();

        let dir = parent_dir(&self.path);
        fs::create_dir_all(&dir)
            .map_err(|e| ChimeError::Cache(format!("failed to create '{}': {}", dir.display(), e)))?;
        let mut tmp = NamedTempFile::new_in(&dir)
            .map_err(|e| ChimeError::Cache(format!("failed to create temp file: {}", e)))?;
        serde_json::to_writer_pretty(&mut tmp, &snapshot)
            .map_err(|e| ChimeError::Cache(format!("failed to serialize cache: {}", e)))?;
        tmp.flush()
            .map_err(|e| ChimeError::Cache(format!("failed to flush cache: {}", e)))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| ChimeError::Cache(format!("failed to sync cache: {}", e)))?;
        tmp.persist(&self.path).map_err(|e| {
            ChimeError::Cache(format!("failed to replace '{}': {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
