use anyhow::{Context, Result};
use async_trait::async_trait;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use image::imageops::FilterType;
use metrics::histogram;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;

use crate::densenet::{DenseNet, DenseNetConfig};
use crate::engine::{DiseaseEngine, InferenceResult};
use crate::error::InferenceError;
use crate::types::{DiseaseResult, HealthLabel, percentage};

/// Side length the network was trained on.
pub const IMAGE_SIZE: u32 = 160;

/// Scores below this are healthy.
pub const SIGMOID_THRESHOLD: f32 = 0.5;

pub struct DenseNetDiseaseEngine {
    model: Arc<DenseNet>,
    device: Device,
    image_size: u32,
}

impl DenseNetDiseaseEngine {
    fn device(cpu_only: bool) -> Result<Device> {
        if cpu_only {
            tracing::info!("Running the disease network on CPU (--cpu-only)");
            return Ok(Device::Cpu);
        }
        if metal_is_available() {
            tracing::info!("Running the disease network on Metal");
            return Ok(Device::new_metal(0)?);
        }
        if cuda_is_available() {
            tracing::info!("Running the disease network on CUDA");
            return Ok(Device::new_cuda(0)?);
        }
        tracing::info!(
            "No GPU backend compiled in or detected, running the disease network on CPU \
             (enable the `cuda` or `metal` feature for GPU inference)"
        );
        Ok(Device::Cpu)
    }

    pub fn new(model: DenseNet, device: Device) -> Self {
        Self {
            model: Arc::new(model),
            device,
            image_size: IMAGE_SIZE,
        }
    }

    #[tracing::instrument(skip(weights), fields(weights = %weights.display()))]
    pub fn load(weights: &Path, cpu: bool) -> Result<Self> {
        let device = Self::device(cpu)?;
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };
        let model = DenseNet::load(vb, &DenseNetConfig::densenet121())
            .with_context(|| format!("Failed to load DenseNet121 from {}", weights.display()))?;
        Ok(Self::new(model, device))
    }
}

/// Decodes `bytes` into a `(1, 3, size, size)` tensor scaled to [0, 1].
pub fn preprocess(bytes: &[u8], size: u32, device: &Device) -> InferenceResult<Tensor> {
    let rgb = image::load_from_memory(bytes)?.to_rgb8();
    // Bicubic, the resampling the network's training images went through.
    let resized = image::imageops::resize(&rgb, size, size, FilterType::CatmullRom);
    let side = size as usize;

    let pixels = Tensor::from_vec(resized.into_raw(), (side, side, 3), device)?;
    let tensor = pixels
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?
        .unsqueeze(0)?
        .contiguous()?;
    Ok(tensor)
}

/// Maps the network's sigmoid output onto a health label.
pub fn classify(score: f32) -> InferenceResult<DiseaseResult> {
    if !score.is_finite() {
        return Err(anyhow::anyhow!("network produced a non-finite score: {score}").into());
    }
    let score = score.clamp(0.0, 1.0) as f64;

    let result = if score < SIGMOID_THRESHOLD as f64 {
        DiseaseResult {
            result: HealthLabel::Healthy,
            confidence: percentage(1.0 - score),
        }
    } else {
        DiseaseResult {
            result: HealthLabel::Unhealthy,
            confidence: percentage(score),
        }
    };
    Ok(result)
}

#[async_trait]
impl DiseaseEngine for DenseNetDiseaseEngine {
    #[tracing::instrument(skip(self, image), fields(bytes = image.len()))]
    async fn detect(&self, image: Vec<u8>) -> InferenceResult<DiseaseResult> {
        let model = self.model.clone();
        let device = self.device.clone();
        let size = self.image_size;
        let start = Instant::now();

        let score = tokio::task::spawn_blocking(move || -> InferenceResult<f32> {
            let input = preprocess(&image, size, &device)?;
            let scores = model.forward(&input)?.flatten_all()?.to_vec1::<f32>()?;
            scores
                .first()
                .copied()
                .ok_or_else(|| InferenceError::Other(anyhow::anyhow!("network returned no score")))
        })
        .await??;

        histogram!("disease_inference_seconds").record(start.elapsed().as_secs_f64());
        tracing::debug!(score, "Image scored");
        classify(score)
    }
}
