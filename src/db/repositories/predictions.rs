use super::Repository;
use crate::db::models::Prediction;
use crate::db::Filter;
use crate::schema::entities::{PREDICTION, PREDICTIONS_COLLECTION};
use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Predictions repository
#[derive(Clone)]
pub struct PredictionsRepository {
    repo: Repository,
}

impl PredictionsRepository {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn create(&self, prediction: &Prediction) -> Result<Uuid> {
        self.repo
            .insert_validated(PREDICTION, PREDICTIONS_COLLECTION, prediction)
            .await
    }

    /// Predictions generated for a given date
    pub async fn for_date(&self, date: DateTime<Utc>) -> Result<Vec<Prediction>> {
        let filter = Filter::eq("predictionDate", date.timestamp_millis());
        self.repo.find_as(PREDICTIONS_COLLECTION, &filter).await
    }
}
