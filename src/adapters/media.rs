//! Shared media tooling: ffmpeg/ffprobe subprocesses, background music and
//! caption timing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use rand::seq::SliceRandom;
use tokio::process::Command;

use super::BackendError;

/// Average narration pace used when probing fails
const WORDS_PER_SECOND: f64 = 2.5;

/// Run an external media tool to completion.
///
/// The child is killed if the returned future is dropped, so a stage
/// timeout also stops the process.
pub async fn run_tool(program: &str, args: &[String]) -> Result<(), BackendError> {
    tracing::debug!(program, ?args, "Running media tool");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error(program, e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BackendError::Failed(format!(
            "{} exited with code {}: {}",
            program,
            output.status.code().unwrap_or(-1),
            tail(&stderr, 400)
        )));
    }

    Ok(())
}

/// Map a spawn failure; a missing binary means the backend is unavailable
pub fn spawn_error(program: &str, e: std::io::Error) -> BackendError {
    if e.kind() == std::io::ErrorKind::NotFound {
        BackendError::Unavailable(format!("{} not found on PATH", program))
    } else {
        BackendError::Failed(format!("failed to spawn {}: {}", program, e))
    }
}

/// Duration of a media file in seconds, via ffprobe
pub async fn probe_duration(path: &Path) -> Result<f64, BackendError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| spawn_error("ffprobe", e))?;

    if !output.status.success() {
        return Err(BackendError::Failed(format!(
            "ffprobe failed for {}",
            path.display()
        )));
    }

    let text = String::from_utf8_lossy(&output.stdout);
    text.trim()
        .parse::<f64>()
        .map_err(|_| BackendError::Malformed(format!("ffprobe duration '{}'", text.trim())))
}

/// Rough narration length from word count and speech rate
pub fn estimate_duration(words: usize, speed: f32) -> f64 {
    let speed = if speed > 0.0 { speed as f64 } else { 1.0 };
    (words as f64 / (WORDS_PER_SECOND * speed)).max(1.0)
}

/// Probe, falling back to the word-count estimate
pub async fn audio_duration(path: &Path, words: usize, speed: f32) -> f64 {
    match probe_duration(path).await {
        Ok(d) if d > 0.0 => d,
        Ok(_) | Err(_) => {
            let estimate = estimate_duration(words, speed);
            tracing::warn!(
                path = %path.display(),
                estimate,
                "Could not probe audio duration, using estimate"
            );
            estimate
        }
    }
}

/// Filter chain that fills the frame at the requested size and rate
pub fn fill_frame_filter(resolution: (u32, u32), fps: u32) -> String {
    let (w, h) = resolution;
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h},fps={fps},format=yuv420p"
    )
}

const MUSIC_EXTENSIONS: [&str; 4] = ["mp3", "wav", "m4a", "ogg"];

/// Music fade-in at the start of the video, in seconds
const MUSIC_FADE_IN: f64 = 2.0;

/// Directory of tracks that can be laid under the narration
#[derive(Debug, Clone)]
pub struct BackgroundMusic {
    dir: PathBuf,
    volume: f32,
}

/// The track chosen for one render
#[derive(Debug, Clone, PartialEq)]
pub struct MusicBed {
    pub path: PathBuf,
    pub volume: f32,
}

impl BackgroundMusic {
    pub fn new(dir: impl Into<PathBuf>, volume: f32) -> Self {
        Self {
            dir: dir.into(),
            volume: volume.clamp(0.0, 1.0),
        }
    }

    /// Tracks on disk, sorted by path
    pub fn tracks(&self) -> Vec<PathBuf> {
        let mut tracks = Vec::new();
        for ext in MUSIC_EXTENSIONS {
            let pattern = self.dir.join(format!("*.{}", ext));
            if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
                tracks.extend(paths.flatten());
            }
        }
        tracks.sort();
        tracks
    }

    /// A random track, or None when the directory has none
    pub fn pick(&self) -> Option<MusicBed> {
        let tracks = self.tracks();
        let path = tracks.choose(&mut rand::thread_rng())?.clone();
        Some(MusicBed {
            path,
            volume: self.volume,
        })
    }
}

/// Audio inputs and mapping for a render whose input 0 is the video source.
///
/// Input 1 is the narration. With a music bed, input 2 is the looped track,
/// mixed under the narration for the narration's length.
pub fn audio_args(narration: &Path, music: Option<&MusicBed>) -> Vec<String> {
    let mut args: Vec<String> = vec!["-i".into(), narration.to_string_lossy().into_owned()];
    match music {
        Some(bed) => {
            args.extend([
                "-stream_loop".into(),
                "-1".into(),
                "-i".into(),
                bed.path.to_string_lossy().into_owned(),
                "-filter_complex".into(),
                music_mix_filter(bed.volume),
                "-map".into(),
                "0:v".into(),
                "-map".into(),
                "[aout]".into(),
            ]);
        }
        None => {
            args.extend(["-map", "0:v", "-map", "1:a"].map(String::from));
        }
    }
    args
}

/// Filter graph scaling the music bed and mixing it under the narration
pub fn music_mix_filter(volume: f32) -> String {
    format!(
        "[2:a]volume={:.2},afade=t=in:st=0:d={:.1}[bed];\
         [1:a][bed]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]",
        volume, MUSIC_FADE_IN
    )
}

/// Escape a path for use inside an ffmpeg filter argument
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn tail(s: &str, max: usize) -> String {
    let s = s.trim();
    let count = s.chars().count();
    if count <= max {
        s.to_string()
    } else {
        s.chars().skip(count - max).collect()
    }
}

/// A timed caption
#[derive(Debug, Clone, PartialEq)]
pub struct Caption {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Spread script lines across `total` seconds, weighted by word count
pub fn build_captions(lines: &[String], total: f64) -> Vec<Caption> {
    let weights: Vec<f64> = lines
        .iter()
        .map(|l| l.split_whitespace().count().max(1) as f64)
        .collect();
    let sum: f64 = weights.iter().sum();
    if sum == 0.0 || total <= 0.0 {
        return Vec::new();
    }

    let mut captions = Vec::with_capacity(lines.len());
    let mut t = 0.0;
    for (line, w) in lines.iter().zip(&weights) {
        let end = (t + total * w / sum).min(total);
        captions.push(Caption {
            start: t,
            end,
            text: line.clone(),
        });
        t = end;
    }
    captions
}

pub fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let m = (total_sec / 60) % 60;
    let h = total_sec / 3600;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

/// Serialize captions as SRT
pub fn render_srt(captions: &[Caption]) -> String {
    let mut out = String::new();
    for (i, c) in captions.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_srt_time(c.start),
            format_srt_time(c.end),
            c.text
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srt_time_format() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(61.5), "00:01:01,500");
        assert_eq!(format_srt_time(3723.042), "01:02:03,042");
    }

    #[test]
    fn test_captions_weighted_by_words() {
        let lines = vec!["one two three".to_string(), "four".to_string()];
        let captions = build_captions(&lines, 8.0);

        assert_eq!(captions.len(), 2);
        assert_eq!(captions[0].start, 0.0);
        assert!((captions[0].end - 6.0).abs() < 1e-9);
        assert!((captions[1].end - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_captions_empty() {
        assert!(build_captions(&[], 10.0).is_empty());
        assert!(build_captions(&["x".to_string()], 0.0).is_empty());
    }

    #[test]
    fn test_render_srt() {
        let srt = render_srt(&[Caption {
            start: 0.0,
            end: 1.25,
            text: "Hello".to_string(),
        }]);
        assert_eq!(srt, "1\n00:00:00,000 --> 00:00:01,250\nHello\n\n");
    }

    #[test]
    fn test_estimate_duration() {
        assert_eq!(estimate_duration(150, 1.0), 60.0);
        assert_eq!(estimate_duration(150, 1.25), 48.0);
        assert_eq!(estimate_duration(0, 1.0), 1.0);
    }

    #[test]
    fn test_fill_frame_filter() {
        assert_eq!(
            fill_frame_filter((1080, 1920), 30),
            "scale=1080:1920:force_original_aspect_ratio=increase,crop=1080:1920,fps=30,format=yuv420p"
        );
    }

    #[test]
    fn test_music_mix_filter() {
        assert_eq!(
            music_mix_filter(0.15),
            "[2:a]volume=0.15,afade=t=in:st=0:d=2.0[bed];\
             [1:a][bed]amix=inputs=2:duration=first:dropout_transition=0:normalize=0[aout]"
        );
    }

    #[test]
    fn test_audio_args_without_music() {
        let args = audio_args(Path::new("/w/n.wav"), None);
        assert_eq!(args, ["-i", "/w/n.wav", "-map", "0:v", "-map", "1:a"]);
    }

    #[test]
    fn test_audio_args_with_music() {
        let bed = MusicBed {
            path: PathBuf::from("/w/music/dark.mp3"),
            volume: 0.2,
        };
        let args = audio_args(Path::new("/w/n.wav"), Some(&bed));

        let loop_at = args.iter().position(|a| a == "-stream_loop").unwrap();
        assert_eq!(args[loop_at + 3], "/w/music/dark.mp3");
        let filter_at = args.iter().position(|a| a == "-filter_complex").unwrap();
        assert!(args[filter_at + 1].starts_with("[2:a]volume=0.20"));
        assert_eq!(args.last().map(String::as_str), Some("[aout]"));
        assert!(!args.iter().any(|a| a == "1:a"));
    }

    #[test]
    fn test_music_tracks_filtered_and_picked() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.mp3"), b"").unwrap();
        std::fs::write(temp.path().join("a.ogg"), b"").unwrap();
        std::fs::write(temp.path().join("cover.jpg"), b"").unwrap();

        let music = BackgroundMusic::new(temp.path(), 3.0);
        let tracks = music.tracks();
        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].ends_with("a.ogg"));

        let bed = music.pick().unwrap();
        assert!(tracks.contains(&bed.path));
        assert_eq!(bed.volume, 1.0);
    }

    #[test]
    fn test_no_music_tracks() {
        let temp = tempfile::TempDir::new().unwrap();
        assert!(BackgroundMusic::new(temp.path(), 0.15).pick().is_none());
        assert!(BackgroundMusic::new(temp.path().join("missing"), 0.15)
            .pick()
            .is_none());
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(
            escape_filter_path(Path::new("C:\\work\\it's.srt")),
            "C\\:/work/it\\'s.srt"
        );
    }
}
