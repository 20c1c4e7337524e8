use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const API_MESSAGE: &str = "AgriScience API is running";
pub const API_STATUS: &str = "healthy";

/// Soil and weather readings for one field.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CropFeatures {
    #[serde(rename = "N", deserialize_with = "numeric")]
    pub nitrogen: f64,
    #[serde(rename = "P", deserialize_with = "numeric")]
    pub phosphorus: f64,
    #[serde(rename = "K", deserialize_with = "numeric")]
    pub potassium: f64,
    #[serde(deserialize_with = "numeric")]
    pub temperature: f64,
    #[serde(deserialize_with = "numeric")]
    pub humidity: f64,
    #[serde(deserialize_with = "numeric")]
    pub ph: f64,
    #[serde(deserialize_with = "numeric")]
    pub rainfall: f64,
}

impl CropFeatures {
    pub const COUNT: usize = 7;

    /// Feature vector in the column order the forest was fit on.
    pub fn to_array(&self) -> [f64; Self::COUNT] {
        [
            self.nitrogen,
            self.phosphorus,
            self.potassium,
            self.temperature,
            self.humidity,
            self.ph,
            self.rainfall,
        ]
    }
}

/// Accepts JSON numbers and numeric strings, rejects anything non-finite.
fn numeric<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Numeric {
        Number(f64),
        Text(String),
    }

    let value = match Numeric::deserialize(deserializer)? {
        Numeric::Number(value) => value,
        Numeric::Text(text) => text.trim().parse::<f64>().map_err(|_| {
            serde::de::Error::custom(format!("input should be a valid number, got {text:?}"))
        })?,
    };

    if value.is_finite() {
        Ok(value)
    } else {
        Err(serde::de::Error::custom("input should be a finite number"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankedCrop {
    pub label: String,
    pub confidence: f64,
}

/// Top crops, highest confidence first. Serialized as `[[label, pct], ...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CropRecommendation(pub Vec<RankedCrop>);

impl Serialize for CropRecommendation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(
            self.0
                .iter()
                .map(|crop| (crop.label.as_str(), crop.confidence)),
        )
    }
}

#[derive(Debug, Serialize)]
pub struct CropResponse {
    pub recommended_crops: CropRecommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthLabel {
    Healthy,
    Unhealthy,
}

impl HealthLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLabel::Healthy => "Healthy",
            HealthLabel::Unhealthy => "Unhealthy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiseaseResult {
    pub result: HealthLabel,
    pub confidence: f64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub message: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// Scales a probability to a percentage rounded to two decimals.
pub fn percentage(probability: f64) -> f64 {
    (probability * 100.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn features_accept_numbers_and_numeric_strings() {
        let features: CropFeatures = serde_json::from_value(json!({
            "N": 90, "P": "42", "K": 43.0,
            "temperature": 20.87, "humidity": 82.0, "ph": " 6.5 ", "rainfall": 103
        }))
        .unwrap();
        assert_eq!(
            features.to_array(),
            [90.0, 42.0, 43.0, 20.87, 82.0, 6.5, 103.0]
        );
    }

    #[test]
    fn features_reject_missing_null_and_text() {
        let missing = json!({"N": 1, "P": 1, "K": 1, "temperature": 1, "humidity": 1, "ph": 1});
        assert!(serde_json::from_value::<CropFeatures>(missing).is_err());

        let null = json!({"N": null, "P": 1, "K": 1, "temperature": 1, "humidity": 1, "ph": 1, "rainfall": 1});
        assert!(serde_json::from_value::<CropFeatures>(null).is_err());

        let text = json!({"N": "lots", "P": 1, "K": 1, "temperature": 1, "humidity": 1, "ph": 1, "rainfall": 1});
        assert!(serde_json::from_value::<CropFeatures>(text).is_err());

        let nan = json!({"N": "NaN", "P": 1, "K": 1, "temperature": 1, "humidity": 1, "ph": 1, "rainfall": 1});
        assert!(serde_json::from_value::<CropFeatures>(nan).is_err());
    }

    #[test]
    fn recommendation_serializes_as_pairs() {
        let response = CropResponse {
            recommended_crops: CropRecommendation(vec![
                RankedCrop {
                    label: "rice".into(),
                    confidence: 71.5,
                },
                RankedCrop {
                    label: "jute".into(),
                    confidence: 20.0,
                },
                RankedCrop {
                    label: "maize".into(),
                    confidence: 3.25,
                },
            ]),
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"recommended_crops": [["rice", 71.5], ["jute", 20.0], ["maize", 3.25]]})
        );
    }

    #[test]
    fn disease_result_uses_display_labels() {
        let result = DiseaseResult {
            result: HealthLabel::Unhealthy,
            confidence: 88.12,
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"result": "Unhealthy", "confidence": 88.12})
        );
        assert_eq!(HealthLabel::Healthy.as_str(), "Healthy");
    }

    #[test]
    fn percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(0.123456), 12.35);
        assert_eq!(percentage(1.0), 100.0);
        assert_eq!(percentage(0.0), 0.0);
    }
}
