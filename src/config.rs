use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_ALLOWED_ORIGINS: &str = "http://localhost:3000,http://localhost:5173,https://agriscience.onrender.com,https://agriscience.vercel.app,https://agriscience-web.vercel.app,https://agriscience-web-git-main.vercel.app";

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "8000")]
    pub port: u16,

    /// Local directory holding the model artifacts
    #[arg(long, env = "MODELS_DIR", default_value = "models")]
    pub models_dir: PathBuf,

    /// Crop random-forest export (JSON tree ensemble)
    #[arg(
        long,
        env = "CROP_MODEL_FILE",
        default_value = "crop_recommendation_rf.json"
    )]
    pub crop_model_file: String,

    /// Crop label vocabulary (JSON)
    #[arg(
        long,
        env = "LABEL_ENCODER_FILE",
        default_value = "crop_label_encoder.json"
    )]
    pub label_encoder_file: String,

    /// Plant health network weights (safetensors)
    #[arg(
        long,
        env = "DISEASE_MODEL_FILE",
        default_value = "DenseNet121_plant_model_v2.safetensors"
    )]
    pub disease_model_file: String,

    /// Hugging Face Hub repository to fetch the artifacts from instead of --models-dir
    #[arg(long, env = "MODEL_ID")]
    pub model_id: Option<String>,

    /// Model revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Origins allowed to make cross-origin requests, comma separated
    #[arg(
        long,
        env = "ALLOWED_ORIGINS",
        value_delimiter = ',',
        default_value = DEFAULT_ALLOWED_ORIGINS
    )]
    pub allowed_origins: Vec<String>,

    /// Largest accepted request body in bytes
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value = "10485760")]
    pub max_upload_bytes: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Allowed origins with surrounding whitespace and empty entries removed.
    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .iter()
            .map(|origin| origin.trim())
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }
}
