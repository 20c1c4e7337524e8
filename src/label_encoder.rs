use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

/// Fixed mapping between the forest's integer class ids and crop names.
///
/// The id of a label is its position in `classes`, which is the sorted
/// vocabulary the encoder was fit on.
#[derive(Debug, Clone)]
pub struct LabelEncoder {
    classes: Vec<String>,
}

#[derive(Deserialize)]
struct LabelEncoderFile {
    classes: Vec<String>,
}

impl LabelEncoder {
    pub fn new(classes: Vec<String>) -> Result<Self> {
        if classes.is_empty() {
            bail!("Label encoder has no classes");
        }

        let mut seen = HashSet::with_capacity(classes.len());
        for label in &classes {
            if !seen.insert(label.as_str()) {
                bail!("Label encoder lists {label:?} more than once");
            }
        }

        Ok(Self { classes })
    }

    #[tracing::instrument(skip(path), fields(path = %path.display()))]
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read label encoder {}", path.display()))?;
        let file: LabelEncoderFile = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed label encoder {}", path.display()))?;
        let encoder = Self::new(file.classes)?;
        tracing::debug!(classes = encoder.len(), "Label encoder loaded");
        Ok(encoder)
    }

    #[cfg(test)]
    pub fn encode(&self, label: &str) -> Option<u32> {
        self.classes
            .iter()
            .position(|class| class == label)
            .map(|id| id as u32)
    }

    pub fn decode(&self, id: u32) -> Option<&str> {
        self.classes.get(id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }
}
