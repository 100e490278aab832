//! Local renderer (fallback Render backend).
//!
//! Loops a clip from a local background directory under the narration, or
//! renders a solid colour frame when no clip is available. Background music is
//! mixed in the same way as the stock renderer. Needs only ffmpeg.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::media::{audio_args, fill_frame_filter, run_tool, BackgroundMusic, MusicBed};
use super::{Backend, BackendError, RenderRequest, RenderedVideo};

const CLIP_EXTENSIONS: [&str; 4] = ["mp4", "mov", "mkv", "webm"];

pub struct LocalRenderer {
    clip_dir: Option<PathBuf>,
    background_color: String,
    music: Option<BackgroundMusic>,
}

impl LocalRenderer {
    pub fn new(clip_dir: Option<PathBuf>) -> Self {
        Self {
            clip_dir,
            background_color: "0x101018".to_string(),
            music: None,
        }
    }

    pub fn with_background_color(mut self, color: impl Into<String>) -> Self {
        self.background_color = color.into();
        self
    }

    pub fn with_music(mut self, music: Option<BackgroundMusic>) -> Self {
        self.music = music;
        self
    }

    /// Background clips available on disk, sorted by path
    pub fn find_clips(&self) -> Vec<PathBuf> {
        let Some(dir) = &self.clip_dir else {
            return Vec::new();
        };

        let mut clips = Vec::new();
        for ext in CLIP_EXTENSIONS {
            let pattern = dir.join(format!("*.{}", ext));
            if let Ok(paths) = glob::glob(&pattern.to_string_lossy()) {
                clips.extend(paths.flatten());
            }
        }
        clips.sort();
        clips
    }
}

/// Pick a clip for a unit; stable for a given unit id
fn pick_clip<'a>(clips: &'a [PathBuf], unit_id: &str) -> Option<&'a PathBuf> {
    if clips.is_empty() {
        return None;
    }
    let n: usize = unit_id.bytes().map(usize::from).sum();
    clips.get(n % clips.len())
}

fn clip_args(clip: &Path, music: Option<&MusicBed>, request: &RenderRequest) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-stream_loop".into(),
        "-1".into(),
        "-i".into(),
        clip.to_string_lossy().into_owned(),
    ];
    args.extend(common_args(music, request));
    args
}

fn color_args(color: &str, music: Option<&MusicBed>, request: &RenderRequest) -> Vec<String> {
    let (w, h) = request.resolution;
    let mut args: Vec<String> = vec![
        "-y".into(),
        "-f".into(),
        "lavfi".into(),
        "-i".into(),
        format!("color=c={}:s={}x{}:r={}", color, w, h, request.fps),
    ];
    args.extend(common_args(music, request));
    args
}

fn common_args(music: Option<&MusicBed>, request: &RenderRequest) -> Vec<String> {
    let mut args = audio_args(&request.narration.path, music);
    args.extend([
        "-vf".into(),
        fill_frame_filter(request.resolution, request.fps),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-c:a".into(),
        "aac".into(),
        "-t".into(),
        format!("{:.3}", request.target_duration()),
        "-movflags".into(),
        "+faststart".into(),
        request.output_path.to_string_lossy().into_owned(),
    ]);
    args
}

#[async_trait]
impl Backend<RenderRequest, RenderedVideo> for LocalRenderer {
    fn name(&self) -> &str {
        "local"
    }

    async fn produce(&self, request: &RenderRequest) -> Result<RenderedVideo, BackendError> {
        if !request.narration.path.exists() {
            return Err(BackendError::Failed(format!(
                "narration audio missing: {}",
                request.narration.path.display()
            )));
        }

        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let music = self.music.as_ref().and_then(BackgroundMusic::pick);
        if let Some(bed) = &music {
            tracing::info!(track = %bed.path.display(), "Mixing background music");
        }

        let clips = self.find_clips();
        let (args, used) = match pick_clip(&clips, request.unit.id.as_str()) {
            Some(clip) => (
                clip_args(clip, music.as_ref(), request),
                vec![clip.to_string_lossy().into_owned()],
            ),
            None => {
                tracing::info!("No background clips found, rendering solid colour");
                (
                    color_args(&self.background_color, music.as_ref(), request),
                    vec![format!("color:{}", self.background_color)],
                )
            }
        };

        run_tool("ffmpeg", &args).await?;

        Ok(RenderedVideo {
            path: request.output_path.clone(),
            clips: used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BackendRole, ContentUnit, NarrationArtifact, Script, UnitId};
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_find_clips_filters_extensions() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("b.mp4"), b"").unwrap();
        std::fs::write(temp.path().join("a.mov"), b"").unwrap();
        std::fs::write(temp.path().join("notes.txt"), b"").unwrap();

        let renderer = LocalRenderer::new(Some(temp.path().to_path_buf()));
        let clips = renderer.find_clips();

        assert_eq!(clips.len(), 2);
        assert!(clips[0].ends_with("a.mov"));
    }

    #[test]
    fn test_no_clip_dir() {
        assert!(LocalRenderer::new(None).find_clips().is_empty());
    }

    fn request() -> RenderRequest {
        let id = UnitId::from("20250101_000000");
        let script = Script {
            title: "Lasers".to_string(),
            description: String::new(),
            tags: Vec::new(),
            body: "Light, amplified.".to_string(),
        };
        RenderRequest {
            unit: ContentUnit::from_script(id.clone(), "tech_facts", "lasers", script),
            narration: NarrationArtifact {
                unit_id: id,
                path: PathBuf::from("/w/audio/n.wav"),
                duration_secs: 12.0,
                engine: "piper".to_string(),
                role: BackendRole::Fallback,
                created_at: Utc::now(),
            },
            output_path: PathBuf::from("/w/videos/out.mp4"),
            work_dir: PathBuf::from("/w/content/20250101_000000"),
            resolution: (1080, 1920),
            fps: 30,
            max_duration_secs: None,
        }
    }

    #[test]
    fn test_color_args_mix_music_under_narration() {
        let bed = MusicBed {
            path: PathBuf::from("/w/music/calm.mp3"),
            volume: 0.15,
        };
        let args = color_args("black", Some(&bed), &request());

        let inputs: Vec<&str> = args
            .iter()
            .enumerate()
            .filter(|(i, _)| *i > 0 && args[i - 1] == "-i")
            .map(|(_, a)| a.as_str())
            .collect();
        assert_eq!(
            inputs,
            ["color=c=black:s=1080x1920:r=30", "/w/audio/n.wav", "/w/music/calm.mp3"]
        );
        assert!(args.iter().any(|a| a.contains("amix=inputs=2")));
        assert!(args.iter().any(|a| a == "[aout]"));
        assert_eq!(args.last().map(String::as_str), Some("/w/videos/out.mp4"));
    }

    #[test]
    fn test_clip_args_without_music() {
        let args = clip_args(Path::new("/w/clips/a.mp4"), None, &request());
        assert!(args.iter().any(|a| a == "1:a"));
        assert!(!args.iter().any(|a| a == "-filter_complex"));
    }

    #[test]
    fn test_pick_clip_is_stable() {
        let clips = vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")];
        let first = pick_clip(&clips, "20250101_000000");
        assert_eq!(first, pick_clip(&clips, "20250101_000000"));
        assert!(pick_clip(&[], "x").is_none());
    }
}
