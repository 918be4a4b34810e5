//! Transform stage
//!
//! Stages one raw item through download, transform, upload and cleanup:
//!
//! 1. download the item to `<work_dir>/<basename>`
//! 2. run the [`ImageTransform`] into `<output_dir>/<generated name>`
//! 3. check the output exists, then delete the local input
//! 4. upload the output to the unsorted directory and confirm it is visible
//! 5. delete the local output, whether or not the upload was confirmed
//! 6. delete the remote source
//!
//! Nothing remote is mutated before the uploaded file is confirmed.

use bridge_traits::storage::{FileSystemAccess, RemoteItem, RemoteStore};
use bridge_traits::time::Clock;
use core_runtime::config::PipelineConfig;
use core_runtime::events::{EventBus, PipelineEvent, TransformEvent};
use image::imageops::FilterType;
use image::ImageReader;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::orchestrator::PipelineContext;

/// Content transform applied to a local file
///
/// Runs on a blocking thread; implementations may do CPU-heavy work.
pub trait ImageTransform: Send + Sync {
    fn apply(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Scales both dimensions by an integer factor with linear interpolation
#[derive(Debug, Clone, Copy)]
pub struct LinearScale {
    factor: u32,
}

impl LinearScale {
    pub fn new(factor: u32) -> Self {
        Self {
            factor: factor.max(1),
        }
    }

    pub fn factor(&self) -> u32 {
        self.factor
    }
}

impl ImageTransform for LinearScale {
    fn apply(&self, input: &Path, output: &Path) -> Result<()> {
        let failed = |message: String| PipelineError::TransformFailed {
            input: input.display().to_string(),
            message,
        };

        // Decoder chosen from content, not extension
        let source = ImageReader::open(input)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| failed(e.to_string()))?
            .decode()
            .map_err(|e| failed(e.to_string()))?;
        let (width, height) = match (
            source.width().checked_mul(self.factor),
            source.height().checked_mul(self.factor),
        ) {
            (Some(w), Some(h)) => (w, h),
            _ => return Err(failed("scaled dimensions overflow".to_string())),
        };

        source
            .resize_exact(width, height, FilterType::Triangle)
            .save(output)
            .map_err(|e| failed(e.to_string()))
    }
}

/// A raw item that was transformed and replaced by its output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformOutcome {
    pub source_path: String,
    pub uploaded_path: String,
}

pub struct TransformStage {
    store: Arc<dyn RemoteStore>,
    fs: Arc<dyn FileSystemAccess>,
    transform: Arc<dyn ImageTransform>,
    clock: Arc<dyn Clock>,
    config: Arc<PipelineConfig>,
    events: EventBus,
}

impl TransformStage {
    pub fn new(ctx: &PipelineContext) -> Self {
        Self {
            store: ctx.store.clone(),
            fs: ctx.fs.clone(),
            transform: ctx.transform.clone(),
            clock: ctx.clock.clone(),
            config: ctx.config.clone(),
            events: ctx.events.clone(),
        }
    }

    /// `<prefix>_<YYYYmmddHHMMSS>_<8 hex chars>.png`
    pub fn output_name(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}.png",
            self.config.output_name_prefix,
            self.clock.now().format("%Y%m%d%H%M%S"),
            &suffix[..8]
        )
    }

    /// Run the whole stage for one item and publish the outcome.
    #[instrument(skip(self, item), fields(item = %item.path))]
    pub async fn process(&self, item: &RemoteItem) -> Result<TransformOutcome> {
        let result = self.stage(item).await;

        let event = match &result {
            Ok(outcome) => TransformEvent::Uploaded {
                source_path: outcome.source_path.clone(),
                uploaded_path: outcome.uploaded_path.clone(),
            },
            Err(PipelineError::OutputMissing(_)) => TransformEvent::OutputMissing {
                source_path: item.path.clone(),
            },
            Err(e) => {
                error!(error = %e, "Transform stage failed");
                TransformEvent::Failed {
                    source_path: item.path.clone(),
                    message: e.to_string(),
                }
            }
        };
        self.events.emit(PipelineEvent::Transform(event)).ok();

        result
    }

    async fn stage(&self, item: &RemoteItem) -> Result<TransformOutcome> {
        let local_input = self.config.work_dir.join(item.basename());
        let output_name = self.output_name();
        let local_output = self.config.output_dir.join(&output_name);

        self.fs.create_dir_all(&self.config.work_dir).await?;
        self.fs.create_dir_all(&self.config.output_dir).await?;

        self.store.download(&item.path, &local_input).await?;
        debug!(local = %local_input.display(), "Downloaded");

        self.run_transform(&local_input, &local_output).await?;

        if !self.fs.exists(&local_output).await? {
            error!(
                input = %local_input.display(),
                output = %local_output.display(),
                "Transform produced no output, keeping input"
            );
            return Err(PipelineError::OutputMissing(
                local_output.display().to_string(),
            ));
        }
        self.fs.delete_file(&local_input).await?;

        let uploaded_path = format!("{}/{}", self.config.unsorted_dir, output_name);
        let uploaded = self.upload_confirmed(&local_output, &uploaded_path).await;
        self.remove_local_output(&local_output).await;
        uploaded?;

        self.store.delete(&item.path).await?;

        info!(uploaded = %uploaded_path, "Item transformed");
        Ok(TransformOutcome {
            source_path: item.path.clone(),
            uploaded_path,
        })
    }

    async fn upload_confirmed(&self, local_output: &Path, uploaded_path: &str) -> Result<()> {
        self.store.upload(local_output, uploaded_path).await?;
        if !self.store.exists(uploaded_path).await? {
            return Err(PipelineError::UploadNotConfirmed(uploaded_path.to_string()));
        }
        Ok(())
    }

    async fn remove_local_output(&self, local_output: &Path) {
        if let Err(e) = self.fs.delete_file(local_output).await {
            warn!(output = %local_output.display(), error = %e, "Failed to remove local output");
        }
    }

    async fn run_transform(&self, input: &Path, output: &Path) -> Result<()> {
        let transform = self.transform.clone();
        let (input, output): (PathBuf, PathBuf) = (input.to_path_buf(), output.to_path_buf());
        let input_name = input.display().to_string();

        tokio::task::spawn_blocking(move || transform.apply(&input, &output))
            .await
            .map_err(|e| PipelineError::TransformFailed {
                input: input_name,
                message: e.to_string(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_linear_scale_doubles_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw_1.png");
        let output = dir.path().join("out.png");
        ImageBuffer::from_pixel(3, 2, Rgb([200u8, 10, 10]))
            .save(&input)
            .unwrap();

        LinearScale::new(2).apply(&input, &output).unwrap();

        let scaled = image::open(&output).unwrap();
        assert_eq!((scaled.width(), scaled.height()), (6, 4));
    }

    #[test]
    fn test_linear_scale_rejects_non_image() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw_1.png");
        std::fs::write(&input, b"not an image").unwrap();

        let result = LinearScale::new(2).apply(&input, &dir.path().join("out.png"));
        assert!(matches!(result, Err(PipelineError::TransformFailed { .. })));
        assert!(!dir.path().join("out.png").exists());
    }
}
