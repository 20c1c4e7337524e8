use anyhow::{Result, ensure};
use async_trait::async_trait;
use std::path::Path;

use crate::engine::{CropEngine, InferenceResult};
use crate::error::InferenceError;
use crate::forest::RandomForest;
use crate::label_encoder::LabelEncoder;
use crate::types::{CropFeatures, CropRecommendation, RankedCrop, percentage};

pub const TOP_K: usize = 3;

pub struct ForestCropEngine {
    forest: RandomForest,
    encoder: LabelEncoder,
}

impl ForestCropEngine {
    pub fn new(forest: RandomForest, encoder: LabelEncoder) -> Result<Self> {
        ensure!(
            forest.n_features() == CropFeatures::COUNT,
            "Crop forest expects {} features, requests carry {}",
            forest.n_features(),
            CropFeatures::COUNT
        );
        ensure!(
            forest.classes().len() >= TOP_K,
            "Crop forest knows {} classes, at least {TOP_K} are needed",
            forest.classes().len()
        );
        if let Some(id) = forest
            .classes()
            .iter()
            .find(|&&id| encoder.decode(id).is_none())
        {
            anyhow::bail!(
                "Crop forest class {id} is not in the label encoder ({} labels)",
                encoder.len()
            );
        }

        Ok(Self { forest, encoder })
    }

    #[tracing::instrument(skip_all)]
    pub fn load(forest_path: &Path, encoder_path: &Path) -> Result<Self> {
        let forest = RandomForest::from_file(forest_path)?;
        let encoder = LabelEncoder::from_file(encoder_path)?;
        Self::new(forest, encoder)
    }

    fn rank(&self, features: &CropFeatures) -> InferenceResult<CropRecommendation> {
        let proba = self.forest.predict_proba(&features.to_array())?;

        top_k(&proba, TOP_K)
            .into_iter()
            .map(|column| {
                let id = self.forest.classes()[column];
                let label = self
                    .encoder
                    .decode(id)
                    .ok_or(InferenceError::UnknownLabel(id))?;
                Ok(RankedCrop {
                    label: label.to_string(),
                    confidence: percentage(proba[column]),
                })
            })
            .collect::<InferenceResult<Vec<_>>>()
            .map(CropRecommendation)
    }
}

/// Column indices of the `k` largest probabilities, largest first.
///
/// Equal probabilities come out highest column first, the order a stable
/// ascending sort read back to front produces.
pub fn top_k(proba: &[f64], k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..proba.len()).collect();
    order.sort_by(|&a, &b| proba[a].total_cmp(&proba[b]));
    order.into_iter().rev().take(k).collect()
}

#[async_trait]
impl CropEngine for ForestCropEngine {
    #[tracing::instrument(skip(self))]
    async fn recommend(&self, features: CropFeatures) -> InferenceResult<CropRecommendation> {
        let recommendation = self.rank(&features)?;
        tracing::debug!(?recommendation, "Crops ranked");
        Ok(recommendation)
    }
}
