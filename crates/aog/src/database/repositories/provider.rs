//! Repository for service provider records
//!
//! The delete path enforces the scope invariant: a system-scope provider can
//! never be removed, whatever the call sequence.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, Set,
};

use super::traits::{
    DataStore, FilterClause, ListParams, apply_list_params, build_condition, keep_if_empty,
};
use crate::entities::service_providers::{
    ActiveModel, Column, Entity as ServiceProviders, Model as Entity,
};
use crate::errors::{AogError, AogResult};
use crate::models::{AuthType, ProviderScope, ProviderStatus, ServiceProvider, ServiceSource};

#[derive(Clone)]
pub struct ProviderRepository {
    connection: Arc<DatabaseConnection>,
}

impl ProviderRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    fn column_for(field: &str) -> Option<Column> {
        match field {
            "provider_name" => Some(Column::ProviderName),
            "service_name" => Some(Column::ServiceName),
            "service_source" => Some(Column::ServiceSource),
            "flavor" => Some(Column::Flavor),
            "status" => Some(Column::Status),
            "scope" => Some(Column::Scope),
            "url" => Some(Column::Url),
            "created_at" => Some(Column::CreatedAt),
            "updated_at" => Some(Column::UpdatedAt),
            _ => None,
        }
    }

    fn to_domain(entity: Entity) -> ServiceProvider {
        ServiceProvider {
            service_source: ServiceSource::from_str(&entity.service_source)
                .unwrap_or(ServiceSource::Remote),
            auth_type: AuthType::from_str(&entity.auth_type).unwrap_or_default(),
            status: ProviderStatus::from_str(&entity.status).unwrap_or_default(),
            scope: ProviderScope::from_str(&entity.scope).unwrap_or_default(),
            provider_name: entity.provider_name,
            service_name: entity.service_name,
            flavor: entity.flavor,
            desc: entity.desc,
            method: entity.method,
            url: entity.url,
            auth_key: entity.auth_key,
            extra_headers: entity.extra_headers,
            extra_body: entity.extra_body,
            properties: entity.properties,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }
}

#[async_trait::async_trait]
impl DataStore for ProviderRepository {
    type Domain = ServiceProvider;
    type Key = str;
    type Create = ServiceProvider;

    async fn add(&self, create: ServiceProvider) -> AogResult<ServiceProvider> {
        create.validate()?;
        let now = Utc::now();
        let active = ActiveModel {
            provider_name: Set(create.provider_name.clone()),
            service_name: Set(create.service_name.clone()),
            service_source: Set(create.service_source.to_string()),
            flavor: Set(create.flavor.clone()),
            desc: Set(create.desc.clone()),
            method: Set(create.method.clone()),
            url: Set(create.url.clone()),
            auth_type: Set(create.auth_type.to_string()),
            auth_key: Set(create.auth_key.clone()),
            extra_headers: Set(create.extra_headers.clone()),
            extra_body: Set(create.extra_body.clone()),
            properties: Set(create.properties.clone()),
            status: Set(create.status.to_string()),
            scope: Set(create.scope.to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = active.insert(self.connection.as_ref()).await?;
        Ok(Self::to_domain(model))
    }

    async fn put(&self, record: ServiceProvider) -> AogResult<ServiceProvider> {
        let existing = ServiceProviders::find_by_id(record.provider_name.as_str())
            .one(self.connection.as_ref())
            .await?;
        let Some(existing) = existing else {
            return self.add(record).await;
        };

        let merged = ActiveModel {
            provider_name: Set(existing.provider_name.clone()),
            service_name: Set(keep_if_empty(&record.service_name, &existing.service_name)),
            service_source: Set(record.service_source.to_string()),
            flavor: Set(keep_if_empty(&record.flavor, &existing.flavor)),
            desc: Set(keep_if_empty(&record.desc, &existing.desc)),
            method: Set(keep_if_empty(&record.method, &existing.method)),
            url: Set(keep_if_empty(&record.url, &existing.url)),
            auth_type: Set(record.auth_type.to_string()),
            auth_key: Set(keep_if_empty(&record.auth_key, &existing.auth_key)),
            extra_headers: Set(keep_if_empty(&record.extra_headers, &existing.extra_headers)),
            extra_body: Set(keep_if_empty(&record.extra_body, &existing.extra_body)),
            properties: Set(keep_if_empty(&record.properties, &existing.properties)),
            status: Set(record.status.to_string()),
            scope: Set(existing.scope.clone()),
            created_at: Set(existing.created_at),
            updated_at: Set(Utc::now()),
        };
        let model = merged.update(self.connection.as_ref()).await?;
        let domain = Self::to_domain(model);
        domain.validate()?;
        Ok(domain)
    }

    async fn get(&self, provider_name: &str) -> AogResult<Option<ServiceProvider>> {
        let model = ServiceProviders::find_by_id(provider_name)
            .one(self.connection.as_ref())
            .await?;
        Ok(model.map(Self::to_domain))
    }

    async fn delete(&self, provider_name: &str) -> AogResult<()> {
        let Some(existing) = self.get(provider_name).await? else {
            return Ok(());
        };
        if existing.scope == ProviderScope::System {
            return Err(AogError::SystemProviderImmutable {
                provider: provider_name.to_string(),
            });
        }
        ServiceProviders::delete_by_id(provider_name)
            .exec(self.connection.as_ref())
            .await?;
        Ok(())
    }

    async fn list(&self, params: &ListParams) -> AogResult<Vec<ServiceProvider>> {
        let query = apply_list_params(ServiceProviders::find(), params, Self::column_for);
        let models = query.all(self.connection.as_ref()).await?;
        Ok(models.into_iter().map(Self::to_domain).collect())
    }

    async fn count(&self, filters: &[FilterClause]) -> AogResult<u64> {
        let count = ServiceProviders::find()
            .filter(build_condition(filters, Self::column_for))
            .count(self.connection.as_ref())
            .await?;
        Ok(count)
    }

    async fn is_exist(&self, provider_name: &str) -> AogResult<bool> {
        Ok(self.get(provider_name).await?.is_some())
    }
}

impl ProviderRepository {
    /// All providers bound to one (service, source) pair.
    pub async fn find_for_service(
        &self,
        service_name: &str,
        source: ServiceSource,
    ) -> AogResult<Vec<ServiceProvider>> {
        let params = ListParams::filtered(vec![
            ListParams::eq("service_name", service_name),
            ListParams::eq("service_source", source.to_string()),
        ]);
        self.list(&params).await
    }

    /// Persist the prober's latest verdict for one provider.
    pub async fn update_status(
        &self,
        provider_name: &str,
        status: ProviderStatus,
    ) -> AogResult<()> {
        let Some(existing) = ServiceProviders::find_by_id(provider_name)
            .one(self.connection.as_ref())
            .await?
        else {
            return Ok(());
        };
        let mut active: ActiveModel = existing.into();
        active.status = Set(status.to_string());
        active.updated_at = Set(Utc::now());
        active.update(self.connection.as_ref()).await?;
        Ok(())
    }
}
