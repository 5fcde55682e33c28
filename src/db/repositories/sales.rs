use super::{tenant_scoped, Repository};
use crate::db::models::MarketplaceSale;
use crate::db::Filter;
use crate::schema::entities::{MARKETPLACE_SALE, MARKETPLACE_SALES_COLLECTION};
use anyhow::Result;
use uuid::Uuid;

/// Marketplace sales repository
#[derive(Clone)]
pub struct SalesRepository {
    repo: Repository,
}

impl SalesRepository {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    pub async fn create(&self, sale: &MarketplaceSale) -> Result<Uuid> {
        self.repo
            .insert_validated(MARKETPLACE_SALE, MARKETPLACE_SALES_COLLECTION, sale)
            .await
    }

    /// Legacy sales still lacking a status
    pub async fn missing_status_count(&self, tenant: Option<&str>) -> Result<u64> {
        let filter = tenant_scoped(Filter::missing("status"), tenant);
        self.repo.store.count(MARKETPLACE_SALES_COLLECTION, &filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::SaleStatus;
    use crate::db::{Document, DocumentStore, MemoryStore};
    use crate::schema::entities;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_validated_sale_gets_status() -> Result<()> {
        let schemas = Arc::new(entities::registry());
        let store = Arc::new(MemoryStore::new().with_schemas(schemas.clone()));
        let sales = SalesRepository::new(Repository::new(store.clone(), schemas));

        sales
            .create(&MarketplaceSale {
                tenant_id: Some("acme".to_string()),
                order_id: Some("A-1".to_string()),
                marketplace: Some("etsy".to_string()),
                sale_date: None,
                status: SaleStatus::Returned,
                status_changed_by: None,
                status_changed_at: None,
                return_date: None,
            })
            .await?;

        let legacy: Document = json!({"orderId": "A-0", "tenantId": "acme"}).as_object().cloned().unwrap();
        store.insert_one(MARKETPLACE_SALES_COLLECTION, legacy).await?;

        assert_eq!(sales.missing_status_count(Some("acme")).await?, 1);
        assert_eq!(sales.missing_status_count(Some("globex")).await?, 0);

        let stored = store
            .find(MARKETPLACE_SALES_COLLECTION, &Filter::eq("orderId", "A-1"))
            .await?;
        assert_eq!(stored[0]["status"], json!(SaleStatus::Returned.as_str()));
        Ok(())
    }
}
