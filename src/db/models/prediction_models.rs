use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Demand prediction for one date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub prediction_date: DateTime<Utc>,
    #[serde(default)]
    pub predictions: Vec<VariantPrediction>,
    #[serde(default)]
    pub overall_accuracy: Option<f64>,
    #[serde(default = "default_model_version")]
    pub model_version: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub generated_at: DateTime<Utc>,
}

fn default_model_version() -> String {
    "v1.0".to_string()
}

/// Predicted sales for one design/color variant
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantPrediction {
    pub design: String,
    pub color: String,
    pub predicted_sales: f64,
    #[serde(default)]
    pub actual_sales: Option<f64>,
    #[serde(default)]
    pub accuracy: Option<f64>,
}

impl VariantPrediction {
    pub fn new(design: &str, color: &str, predicted_sales: f64) -> Self {
        Self {
            design: design.to_string(),
            color: color.to_string(),
            predicted_sales,
            actual_sales: None,
            accuracy: None,
        }
    }
}

impl Prediction {
    pub fn new(prediction_date: DateTime<Utc>, predictions: Vec<VariantPrediction>) -> Self {
        Self {
            tenant_id: None,
            prediction_date,
            predictions,
            overall_accuracy: None,
            model_version: default_model_version(),
            generated_at: Utc::now(),
        }
    }

    /// Record actual sales keyed by `(design, color)` and recompute accuracy.
    ///
    /// Returns the number of variants that received an actual figure.
    pub fn reconcile(&mut self, actuals: &HashMap<(String, String), f64>) -> usize {
        let mut reconciled = 0;
        for variant in &mut self.predictions {
            let key = (variant.design.clone(), variant.color.clone());
            if let Some(&actual) = actuals.get(&key) {
                variant.actual_sales = Some(actual);
                variant.accuracy = Some(accuracy(variant.predicted_sales, actual));
                reconciled += 1;
            }
        }

        let scored: Vec<f64> = self.predictions.iter().filter_map(|v| v.accuracy).collect();
        self.overall_accuracy = if scored.is_empty() {
            None
        } else {
            Some(round2(scored.iter().sum::<f64>() / scored.len() as f64))
        };
        reconciled
    }
}

/// Percentage accuracy of a prediction, floored at zero
pub fn accuracy(predicted: f64, actual: f64) -> f64 {
    if actual == 0.0 {
        return if predicted == 0.0 { 100.0 } else { 0.0 };
    }
    let error = (predicted - actual).abs() / actual * 100.0;
    round2((100.0 - error).max(0.0))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn prediction() -> Prediction {
        Prediction::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            vec![
                VariantPrediction::new("D1", "red", 100.0),
                VariantPrediction::new("D1", "blue", 40.0),
                VariantPrediction::new("D2", "red", 10.0),
            ],
        )
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(90.0, 100.0), 90.0);
        assert_eq!(accuracy(110.0, 100.0), 90.0);
        assert_eq!(accuracy(300.0, 100.0), 0.0);
        assert_eq!(accuracy(0.0, 0.0), 100.0);
        assert_eq!(accuracy(3.0, 0.0), 0.0);
        assert_eq!(accuracy(2.0, 3.0), 66.67);
    }

    #[test]
    fn test_reconcile_partial() {
        let mut p = prediction();
        assert_eq!(p.overall_accuracy, None);

        let actuals = HashMap::from([
            (("D1".to_string(), "red".to_string()), 80.0),
            (("D1".to_string(), "blue".to_string()), 40.0),
        ]);
        assert_eq!(p.reconcile(&actuals), 2);

        assert_eq!(p.predictions[0].actual_sales, Some(80.0));
        assert_eq!(p.predictions[0].accuracy, Some(75.0));
        assert_eq!(p.predictions[1].accuracy, Some(100.0));
        assert_eq!(p.predictions[2].accuracy, None);
        assert_eq!(p.overall_accuracy, Some(87.5));
    }

    #[test]
    fn test_reconcile_nothing() {
        let mut p = prediction();
        assert_eq!(p.reconcile(&HashMap::new()), 0);
        assert_eq!(p.overall_accuracy, None);
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(prediction()).unwrap();
        assert_eq!(value["predictionDate"], serde_json::json!(1_772_323_200_000i64));
        assert_eq!(value["modelVersion"], "v1.0");
        assert!(value["overallAccuracy"].is_null());
        assert!(value["predictions"][0]["accuracy"].is_null());
        assert!(value.get("tenantId").is_none());
    }
}
