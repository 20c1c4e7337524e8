use crate::error::InferenceError;
use crate::types::{CropFeatures, CropRecommendation, DiseaseResult};
use async_trait::async_trait;

pub type InferenceResult<T> = std::result::Result<T, InferenceError>;

#[async_trait]
pub trait CropEngine {
    async fn recommend(&self, features: CropFeatures) -> InferenceResult<CropRecommendation>;
}

#[async_trait]
pub trait DiseaseEngine {
    async fn detect(&self, image: Vec<u8>) -> InferenceResult<DiseaseResult>;
}
