use super::{tenant_scoped, Repository};
use crate::db::models::Event;
use crate::db::{Filter, Update};
use crate::schema::entities::{EVENT, EVENTS_COLLECTION};
use anyhow::Result;
use tracing::info;
use uuid::Uuid;

/// Events repository for handling sales event operations
#[derive(Clone)]
pub struct EventsRepository {
    repo: Repository,
}

impl EventsRepository {
    /// Create a new events repository
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Create a new event through the validated write path
    pub async fn create(&self, event: &Event) -> Result<Uuid> {
        info!("Creating event: {}", event.event_name);
        self.repo.insert_validated(EVENT, EVENTS_COLLECTION, event).await
    }

    /// Soft-disable events by name. Returns how many were switched off.
    pub async fn deactivate(&self, tenant: Option<&str>, event_name: &str) -> Result<u64> {
        let filter = tenant_scoped(
            Filter::eq("eventName", event_name).and(Filter::eq("isActive", true)),
            tenant,
        );
        let result = self
            .repo
            .store
            .update_many(EVENTS_COLLECTION, &filter, &Update::new().set("isActive", false))
            .await?;
        Ok(result.modified_count)
    }

    /// Active events, optionally for one tenant
    pub async fn list_active(&self, tenant: Option<&str>) -> Result<Vec<Event>> {
        let filter = tenant_scoped(Filter::eq("isActive", true), tenant);
        self.repo.find_as(EVENTS_COLLECTION, &filter).await
    }
}
