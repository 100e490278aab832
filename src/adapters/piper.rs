//! Local Piper TTS (fallback Narration backend).
//!
//! Spawns `piper --model <model> --output_file <wav>` and feeds the text on
//! stdin. Works offline once the voice model is on disk.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::media::{audio_duration, spawn_error};
use super::{Backend, BackendError, Narration, NarrationRequest};

pub struct PiperBackend {
    binary: String,
    model: PathBuf,
}

impl PiperBackend {
    pub fn new(model: impl Into<PathBuf>) -> Self {
        Self {
            binary: "piper".to_string(),
            model: model.into(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }
}

#[async_trait]
impl Backend<NarrationRequest, Narration> for PiperBackend {
    fn name(&self) -> &str {
        "piper"
    }

    async fn produce(&self, request: &NarrationRequest) -> Result<Narration, BackendError> {
        if !self.model.exists() {
            return Err(BackendError::Unavailable(format!(
                "voice model not found: {}",
                self.model.display()
            )));
        }

        tokio::fs::create_dir_all(&request.output_dir).await?;
        let path = request.output_path("wav");

        // Piper expresses rate as phoneme length: faster speech = shorter length
        let length_scale = if request.speed > 0.0 {
            1.0 / request.speed
        } else {
            1.0
        };

        let mut child = Command::new(&self.binary)
            .arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(&path)
            .arg("--length_scale")
            .arg(format!("{:.3}", length_scale))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(&self.binary, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(request.text.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Failed(format!(
                "piper exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        if !path.exists() {
            return Err(BackendError::Failed(format!(
                "piper produced no file at {}",
                path.display()
            )));
        }

        let words = request.text.split_whitespace().count();
        // Speed is already baked into the audio
        let duration_secs = audio_duration(&path, words, request.speed).await;

        Ok(Narration {
            path,
            duration_secs,
        })
    }
}
