use anyhow::{Result, bail};
use hf_hub::{Repo, RepoType, api::tokio::Api};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Local paths of the three model artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub crop_model: PathBuf,
    pub label_encoder: PathBuf,
    pub disease_model: PathBuf,
}

impl ArtifactPaths {
    /// Get files from either the Hugging Face Hub, or from the local models directory.
    #[tracing::instrument(skip(config), fields(model_id = ?config.model_id))]
    pub async fn resolve(config: &Config) -> Result<Self> {
        match &config.model_id {
            Some(model_id) => Self::download(config, model_id).await,
            None => Self::local(config),
        }
    }

    fn local(config: &Config) -> Result<Self> {
        let base_path = &config.models_dir;
        if !base_path.is_dir() {
            bail!("Model path {} is not a directory.", base_path.display());
        }

        let paths = Self {
            crop_model: base_path.join(&config.crop_model_file),
            label_encoder: base_path.join(&config.label_encoder_file),
            disease_model: base_path.join(&config.disease_model_file),
        };
        for path in paths.all() {
            if !path.is_file() {
                bail!("Model artifact {} not found.", path.display());
            }
        }
        Ok(paths)
    }

    async fn download(config: &Config, model_id: &str) -> Result<Self> {
        let repo = Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            config.model_revision.clone(),
        );
        let api = Api::new()?;
        let api = api.repo(repo);

        tracing::info!("Fetching model artifacts from the Hugging Face Hub");
        Ok(Self {
            crop_model: api.get(&config.crop_model_file).await?,
            label_encoder: api.get(&config.label_encoder_file).await?,
            disease_model: api.get(&config.disease_model_file).await?,
        })
    }

    fn all(&self) -> [&Path; 3] {
        [
            self.crop_model.as_path(),
            self.label_encoder.as_path(),
            self.disease_model.as_path(),
        ]
    }
}
