//! Repository for service records

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set,
};

use super::traits::{
    DataStore, FilterClause, ListParams, apply_list_params, build_condition, keep_if_empty,
};
use crate::entities::services::{ActiveModel, Column, Entity as Services, Model as Entity};
use crate::errors::{AogError, AogResult};
use crate::models::{HybridPolicy, Service};

#[derive(Clone)]
pub struct ServiceRepository {
    connection: Arc<DatabaseConnection>,
}

impl ServiceRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    fn column_for(field: &str) -> Option<Column> {
        match field {
            "name" => Some(Column::Name),
            "hybrid_policy" => Some(Column::HybridPolicy),
            "local_provider" => Some(Column::LocalProvider),
            "remote_provider" => Some(Column::RemoteProvider),
            "status" => Some(Column::Status),
            "created_at" => Some(Column::CreatedAt),
            "updated_at" => Some(Column::UpdatedAt),
            _ => None,
        }
    }

    fn to_domain(entity: Entity) -> Service {
        Service {
            hybrid_policy: HybridPolicy::from_str(&entity.hybrid_policy).unwrap_or_default(),
            name: entity.name,
            local_provider: entity.local_provider,
            remote_provider: entity.remote_provider,
            can_install: entity.can_install,
            status: entity.status,
            avatar: entity.avatar,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl DataStore for ServiceRepository {
    type Domain = Service;
    type Key = str;
    type Create = Service;

    async fn add(&self, create: Service) -> AogResult<Service> {
        let now = Utc::now();
        let active = ActiveModel {
            name: Set(create.name.clone()),
            hybrid_policy: Set(create.hybrid_policy.to_string()),
            local_provider: Set(create.local_provider.clone()),
            remote_provider: Set(create.remote_provider.clone()),
            can_install: Set(create.can_install),
            status: Set(create.status),
            avatar: Set(create.avatar.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = active.insert(self.connection.as_ref()).await?;
        Ok(Self::to_domain(model))
    }

    async fn put(&self, record: Service) -> AogResult<Service> {
        let existing = Services::find_by_id(record.name.as_str())
            .one(self.connection.as_ref())
            .await?;
        let Some(existing) = existing else {
            return self.add(record).await;
        };

        let active = ActiveModel {
            name: Set(existing.name.clone()),
            hybrid_policy: Set(record.hybrid_policy.to_string()),
            local_provider: Set(keep_if_empty(&record.local_provider, &existing.local_provider)),
            remote_provider: Set(keep_if_empty(
                &record.remote_provider,
                &existing.remote_provider,
            )),
            can_install: Set(record.can_install),
            status: Set(record.status),
            avatar: Set(keep_if_empty(&record.avatar, &existing.avatar)),
            created_at: Set(existing.created_at),
            updated_at: Set(Utc::now()),
        };
        let model = active.update(self.connection.as_ref()).await?;
        Ok(Self::to_domain(model))
    }

    async fn get(&self, name: &str) -> AogResult<Option<Service>> {
        let model = Services::find_by_id(name)
            .one(self.connection.as_ref())
            .await?;
        Ok(model.map(Self::to_domain))
    }

    async fn delete(&self, name: &str) -> AogResult<()> {
        Services::delete_by_id(name)
            .exec(self.connection.as_ref())
            .await?;
        Ok(())
    }

    async fn list(&self, params: &ListParams) -> AogResult<Vec<Service>> {
        let query = apply_list_params(Services::find(), params, Self::column_for);
        let models = query.all(self.connection.as_ref()).await?;
        Ok(models.into_iter().map(Self::to_domain).collect())
    }

    async fn count(&self, filters: &[FilterClause]) -> AogResult<u64> {
        let count = Services::find()
            .filter(build_condition(filters, Self::column_for))
            .count(self.connection.as_ref())
            .await?;
        Ok(count)
    }

    async fn is_exist(&self, name: &str) -> AogResult<bool> {
        Ok(self.get(name).await?.is_some())
    }
}

impl ServiceRepository {
    /// Fetch a service or fail with `ErrServiceUnavailable`.
    pub async fn require(&self, name: &str) -> AogResult<Service> {
        self.get(name)
            .await?
            .ok_or_else(|| AogError::service_unavailable(name))
    }

    /// Bind a provider name onto one side of the service.
    pub async fn bind_provider(
        &self,
        service_name: &str,
        local: Option<String>,
        remote: Option<String>,
    ) -> AogResult<Service> {
        let mut service = self.require(service_name).await?;
        if let Some(local) = local {
            service.local_provider = local;
        }
        if let Some(remote) = remote {
            service.remote_provider = remote;
        }
        service.status = 1;
        self.put(service).await
    }
}
