//! Overlap mixer
//!
//! Renders a batch of short clips into one playable stream with staggered,
//! partially overlapping start times. Each track starts before the previous
//! one finishes by a fixed fraction of that clip's duration, chained across
//! the batch, so a burst of emoji reads as one blended event instead of a
//! stutter of sequential clips.
//!
//! Rendering shells out to ffmpeg: every track is delayed by its computed
//! offset, attenuated against clipping, then summed with
//! `amix=duration=longest` at a fixed output format (48 kHz stereo by
//! default). Durations come from an ffprobe pass; a clip that fails to probe
//! counts as 1.0 s rather than failing the whole batch.

use crate::room::Clip;
use crate::{AssetRef, ChimeError, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tracing::debug;

/// Assumed clip length when a duration probe fails.
pub const FALLBACK_CLIP_SECS: f32 = 1.0;

/// Sleep between child-process poll rounds.
const POLL_BACKOFF: Duration = Duration::from_millis(25);

/// Mixer settings, all defaulted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Per-track attenuation applied before summing (also the gain used for
    /// unmixed single-clip playback).
    pub gain: f32,
    /// Fraction of the previous clip's duration that the next clip overlaps.
    pub overlap: f32,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Output channel count.
    pub channels: u16,
    /// Deadline for one duration probe.
    pub probe_timeout_secs: u64,
    /// Deadline for one batch render.
    pub render_timeout_secs: u64,
    /// Render program name or path.
    pub ffmpeg: String,
    /// Probe program name or path.
    pub ffprobe: String,
}

impl Default for MixerConfig {
    fn default() -> Self {
        MixerConfig {
            gain: 0.5,
            overlap: 0.20,
            sample_rate: 48_000,
            channels: 2,
            probe_timeout_secs: 5,
            render_timeout_secs: 30,
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
        }
    }
}

/// Per-track start offsets for one batch.
///
/// Track 0 starts at 0.0; track *i* starts `overlap * duration[i-1]` before
/// the end of track *i-1*. Overlaps chain across adjacent tracks only.
///
/// ```
/// use chime::mixer::MixPlan;
///
/// let plan = MixPlan::from_durations(&[2.0, 3.0, 1.0], 0.20);
/// assert_eq!(plan.starts(), &[0.0, 1.6, 4.0]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MixPlan {
    starts: Vec<f32>,
}

impl MixPlan {
    /// Compute start offsets for clips of the given durations.
    pub fn from_durations(durations: &[f32], overlap: f32) -> Self {
        let mut starts = Vec::with_capacity(durations.len());
        if durations.is_empty() {
            return MixPlan { starts };
        }
        starts.push(0.0);
        let mut cumulative = 0.0f32;
        for &duration in &durations[..durations.len() - 1] {
            let overlap_span = duration * overlap;
            cumulative += duration - overlap_span;
            starts.push(cumulative);
        }
        MixPlan { starts }
    }

    /// Start offsets in seconds, one per track.
    pub fn starts(&self) -> &[f32] {
        &self.starts
    }

    /// Start offset of one track in whole milliseconds.
    pub fn start_millis(&self, index: usize) -> u64 {
        (self.starts[index] * 1000.0) as u64
    }

    /// Number of tracks in the plan.
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    /// Whether the plan holds no tracks.
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }
}

/// A rendered overlap mix backed by a temporary artifact.
///
/// The artifact is owned: it is removed when the value (or the [`Clip`] it
/// converts into) is dropped, on every exit path.
pub struct MixedAudio {
    path: TempPath,
}

impl MixedAudio {
    /// Path of the rendered stream.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Turn the mix into a playable clip that keeps owning the artifact.
    pub fn into_clip(self) -> Clip {
        Clip::rendered(self.path)
    }
}

/// Renders batches of clips into single overlap-mixed streams.
pub struct Mixer {
    cfg: MixerConfig,
}

impl Mixer {
    /// A mixer with the given settings.
    pub fn new(cfg: MixerConfig) -> Self {
        Mixer { cfg }
    }

    /// The per-track attenuation, shared with single-clip playback.
    pub fn gain(&self) -> f32 {
        self.cfg.gain
    }

    /// Mix two or more clips into one stream.
    ///
    /// Probes durations, computes the overlap plan, renders through ffmpeg
    /// into a temp artifact at the configured output format. A render
    /// failure or timeout returns [`ChimeError::Mix`]; the caller decides
    /// what to do with the discarded batch.
    pub fn mix(&self, assets: &[AssetRef]) -> Result<MixedAudio> {
        if assets.len() < 2 {
            return Err(ChimeError::Mix(
                "overlap mixing needs at least two clips".to_string(),
            ));
        }

        let durations: Vec<f32> = assets.iter().map(|a| self.probe_duration(a.path())).collect();
        let plan = MixPlan::from_durations(&durations, self.cfg.overlap);
        let graph = filter_graph(&plan, self.cfg.gain);

        let output = tempfile::Builder::new()
            .prefix("chime-mix-")
            .suffix(".mp3")
            .tempfile()
            .map_err(|e| ChimeError::Mix(format!("failed to create mix output: {}", e)))?
            .into_temp_path();

        let mut cmd = Command::new(&self.cfg.ffmpeg);
        cmd.args(["-y", "-loglevel", "error"]);
        for asset in assets {
            cmd.arg("-i").arg(asset.path());
        }
        cmd.args(["-filter_complex", &graph, "-map", "[out]"])
            .args(["-ar", &self.cfg.sample_rate.to_string()])
            .args(["-ac", &self.cfg.channels.to_string()])
            .arg(&*output);

        let rendered = run_with_deadline(cmd, Duration::from_secs(self.cfg.render_timeout_secs))?;
        if !rendered.status.success() {
            let stderr = String::from_utf8_lossy(&rendered.stderr);
            return Err(ChimeError::Mix(format!(
                "ffmpeg exited with {}: {}",
                rendered.status,
                stderr.trim()
            )));
        }

        debug!(clips = assets.len(), "rendered overlap mix");
        Ok(MixedAudio { path: output })
    }

    /// Duration of one clip in seconds, [`FALLBACK_CLIP_SECS`] on any probe
    /// failure.
    pub fn probe_duration(&self, path: &Path) -> f32 {
        match self.try_probe(path) {
            Ok(secs) => secs,
            Err(e) => {
                debug!(path = %path.display(), "duration probe failed ({}), assuming fallback", e);
                FALLBACK_CLIP_SECS
            }
        }
    }

    fn try_probe(&self, path: &Path) -> Result<f32> {
        let mut cmd = Command::new(&self.cfg.ffprobe);
        cmd.args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path);
        let output = run_with_deadline(cmd, Duration::from_secs(self.cfg.probe_timeout_secs))?;
        if !output.status.success() {
            return Err(ChimeError::Mix(format!(
                "ffprobe exited with {}",
                output.status
            )));
        }
        let text = String::from_utf8_lossy(&output.stdout);
        text.trim()
            .parse::<f32>()
            .map_err(|e| ChimeError::Mix(format!("unparsable duration '{}': {}", text.trim(), e)))
    }
}

/// Build the ffmpeg filter graph: delay + attenuate each track, then sum
/// with duration-of-longest and no dropout fade.
fn filter_graph(plan: &MixPlan, gain: f32) -> String {
    let n = plan.len();
    let mut parts = Vec::with_capacity(n);
    for i in 0..n {
        let delay_ms = plan.start_millis(i);
        if delay_ms > 0 {
            parts.push(format!(
                "[{i}:a]adelay={delay_ms}|{delay_ms},volume={gain}[a{i}]"
            ));
        } else {
            parts.push(format!("[{i}:a]volume={gain}[a{i}]"));
        }
    }
    let inputs: String = (0..n).map(|i| format!("[a{i}]")).collect();
    format!(
        "{};{}amix=inputs={}:duration=longest:dropout_transition=0[out]",
        parts.join(";"),
        inputs,
        n
    )
}

/// Run a child process to completion with a deadline, polling with a short
/// backoff; on timeout the child is killed and the run reported failed.
fn run_with_deadline(mut cmd: Command, deadline: Duration) -> Result<Output> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = cmd.spawn()?;
    let started = Instant::now();
    loop {
        if child.try_wait()?.is_some() {
            return Ok(child.wait_with_output()?);
        }
        if started.elapsed() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            return Err(ChimeError::Mix(format!(
                "external process timed out after {:?}",
                deadline
            )));
        }
        thread::sleep(POLL_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_plan_chains_twenty_percent_overlap() {
        let plan = MixPlan::from_durations(&[2.0, 3.0, 1.0], 0.20);
        assert_eq!(plan.len(), 3);
        assert_relative_eq!(plan.starts()[0], 0.0);
        assert_relative_eq!(plan.starts()[1], 1.6);
        assert_relative_eq!(plan.starts()[2], 4.0);
    }

    #[test]
    fn test_plan_edge_sizes() {
        assert!(MixPlan::from_durations(&[], 0.20).is_empty());
        let single = MixPlan::from_durations(&[5.0], 0.20);
        assert_eq!(single.starts(), &[0.0]);
    }

    #[test]
    fn test_plan_millis_truncate() {
        let plan = MixPlan::from_durations(&[2.0, 3.0, 1.0], 0.20);
        assert_eq!(plan.start_millis(0), 0);
        assert_eq!(plan.start_millis(1), 1600);
        assert_eq!(plan.start_millis(2), 4000);
    }

    #[test]
    fn test_filter_graph_shape() {
        let plan = MixPlan::from_durations(&[2.0, 3.0], 0.20);
        let graph = filter_graph(&plan, 0.5);
        assert_eq!(
            graph,
            "[0:a]volume=0.5[a0];\
             [1:a]adelay=1600|1600,volume=0.5[a1];\
             [a0][a1]amix=inputs=2:duration=longest:dropout_transition=0[out]"
        );
    }

    #[test]
    fn test_mix_rejects_short_batches() {
        let mixer = Mixer::new(MixerConfig::default());
        let one = [AssetRef::new("a.mp3")];
        assert!(matches!(mixer.mix(&one), Err(ChimeError::Mix(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_probe_failure_falls_back() {
        let mixer = Mixer::new(MixerConfig {
            ffprobe: "false".to_string(),
            ..MixerConfig::default()
        });
        assert_relative_eq!(mixer.probe_duration(Path::new("missing.mp3")), 1.0);
    }

    #[cfg(unix)]
    #[test]
    fn test_render_failure_is_a_mix_error() {
        let mixer = Mixer::new(MixerConfig {
            ffmpeg: "false".to_string(),
            ffprobe: "false".to_string(),
            ..MixerConfig::default()
        });
        let assets = [AssetRef::new("a.mp3"), AssetRef::new("b.mp3")];
        assert!(matches!(mixer.mix(&assets), Err(ChimeError::Mix(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_render_success_yields_owned_artifact() {
        let mixer = Mixer::new(MixerConfig {
            ffmpeg: "true".to_string(),
            ffprobe: "false".to_string(),
            ..MixerConfig::default()
        });
        let assets = [AssetRef::new("a.mp3"), AssetRef::new("b.mp3")];
        let mixed = mixer.mix(&assets).expect("no-op render succeeds");
        let path = mixed.path().to_path_buf();
        assert!(path.exists());
        drop(mixed);
        assert!(!path.exists(), "artifact is removed on drop");
    }
}
