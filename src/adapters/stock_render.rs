//! Stock-image slideshow renderer (primary Render backend).
//!
//! Searches Pexels for images matching the unit's topic, downloads them into
//! the unit's work directory, writes SRT captions, and has ffmpeg assemble a
//! slideshow over the narration with the captions burned in and, when a track
//! is available, background music mixed underneath.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use super::media::{
    audio_args, build_captions, escape_filter_path, fill_frame_filter, render_srt, run_tool,
    BackgroundMusic, MusicBed,
};
use super::{Backend, BackendError, RenderRequest, RenderedVideo};

const DEFAULT_ENDPOINT: &str = "https://api.pexels.com/v1";

/// Upper bound on images per video
const MAX_IMAGES: usize = 10;

pub struct StockRenderer {
    api_key: Option<String>,
    endpoint: String,
    client: reqwest::Client,
    music: Option<BackgroundMusic>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    photos: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    src: PhotoSources,
}

#[derive(Debug, Deserialize)]
struct PhotoSources {
    large2x: Option<String>,
    large: Option<String>,
    original: Option<String>,
}

impl PhotoSources {
    fn best(&self) -> Option<&str> {
        self.large2x
            .as_deref()
            .or(self.large.as_deref())
            .or(self.original.as_deref())
    }
}

impl StockRenderer {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client: reqwest::Client::new(),
            music: None,
        }
    }

    /// Create from the PEXELS_API_KEY environment variable
    pub fn from_env() -> Self {
        Self::new(std::env::var("PEXELS_API_KEY").ok())
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_music(mut self, music: Option<BackgroundMusic>) -> Self {
        self.music = music;
        self
    }

    async fn search(
        &self,
        api_key: &str,
        query: &str,
        count: usize,
        orientation: &str,
    ) -> Result<Vec<String>, BackendError> {
        let url = format!("{}/search", self.endpoint);
        let per_page = count.to_string();
        let response = self
            .client
            .get(&url)
            .header("Authorization", api_key)
            .query(&[
                ("query", query),
                ("per_page", per_page.as_str()),
                ("orientation", orientation),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status, &text));
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed
            .photos
            .iter()
            .filter_map(|p| p.src.best().map(str::to_string))
            .take(count)
            .collect())
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<(), BackendError> {
        let mut response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::from_status(status, ""));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await? {
            tokio::io::AsyncWriteExt::write_all(&mut file, &chunk).await?;
        }
        tokio::io::AsyncWriteExt::flush(&mut file).await?;
        Ok(())
    }
}

/// ffmpeg concat-demuxer script showing each image for `per_image` seconds.
///
/// The last image is listed twice; the demuxer ignores the final duration
/// otherwise.
pub fn concat_script(images: &[PathBuf], per_image: f64) -> String {
    let mut out = String::new();
    for image in images {
        out.push_str(&format!(
            "file '{}'\nduration {:.3}\n",
            image.to_string_lossy().replace('\'', "'\\''"),
            per_image
        ));
    }
    if let Some(last) = images.last() {
        out.push_str(&format!(
            "file '{}'\n",
            last.to_string_lossy().replace('\'', "'\\''")
        ));
    }
    out
}

/// Search orientation for a frame size
fn orientation(resolution: (u32, u32)) -> &'static str {
    if resolution.1 > resolution.0 {
        "portrait"
    } else {
        "landscape"
    }
}

fn slideshow_args(
    list: &Path,
    captions: Option<&Path>,
    music: Option<&MusicBed>,
    request: &RenderRequest,
) -> Vec<String> {
    let mut filter = fill_frame_filter(request.resolution, request.fps);
    if let Some(srt) = captions {
        filter.push_str(&format!(
            ",subtitles='{}':force_style='Alignment=2,FontSize=18,Outline=2'",
            escape_filter_path(srt)
        ));
    }

    let mut args: Vec<String> = vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list.to_string_lossy().into_owned(),
    ];
    args.extend(audio_args(&request.narration.path, music));
    args.extend([
        "-vf".into(),
        filter,
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
impl Backend<RenderRequest, RenderedVideo> for StockRenderer {
    fn name(&self) -> &str {
        "pexels"
    }

    async fn produce(&self, request: &RenderRequest) -> Result<RenderedVideo, BackendError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Unavailable("PEXELS_API_KEY not set".to_string()))?;

        let count = request.unit.lines.len().clamp(1, MAX_IMAGES);
        let query = format!("{} {}", request.unit.topic, request.unit.niche.replace('_', " "));
        let urls = self
            .search(api_key, &query, count, orientation(request.resolution))
            .await?;
        if urls.is_empty() {
            return Err(BackendError::Failed(format!(
                "no stock images found for '{}'",
                query
            )));
        }

        let media_dir = request.work_dir.join("media");
        tokio::fs::create_dir_all(&media_dir).await?;

        let mut images = Vec::with_capacity(urls.len());
        for (i, url) in urls.iter().enumerate() {
            let dest = media_dir.join(format!("image_{:02}.jpg", i));
            self.download(url, &dest).await?;
            images.push(dest);
        }

        let duration = request.target_duration();
        let list_path = request.work_dir.join("slideshow.txt");
        tokio::fs::write(&list_path, concat_script(&images, duration / images.len() as f64))
            .await?;

        let captions = build_captions(&request.unit.lines, duration);
        let srt_path = request.work_dir.join("captions.srt");
        let srt = if captions.is_empty() {
            None
        } else {
            tokio::fs::write(&srt_path, render_srt(&captions)).await?;
            Some(srt_path.as_path())
        };

        if let Some(parent) = request.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let music = self.music.as_ref().and_then(BackgroundMusic::pick);
        if let Some(bed) = &music {
            tracing::info!(track = %bed.path.display(), "Mixing background music");
        }
        let args = slideshow_args(&list_path, srt, music.as_ref(), request);
        run_tool("ffmpeg", &args).await?;

        Ok(RenderedVideo {
            path: request.output_path.clone(),
            clips: urls,
        })
    }
}
