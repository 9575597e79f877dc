//! Repository for model records
//!
//! Model state transitions are serialized per `model_name` by the acquisition
//! engine; this repository only guards the storage invariants, notably that
//! at most one model per (service, source) pair is the default.

use std::str::FromStr;
use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set, TransactionTrait,
};
use uuid::Uuid;

use super::traits::{DataStore, FilterClause, ListParams, apply_list_params, build_condition};
use crate::entities::models::{ActiveModel, Column, Entity as Models, Model as Entity};
use crate::errors::{AogError, AogResult};
use crate::models::{Model, ModelStatus, ServiceSource};

/// Composite key of a model record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModelKey {
    pub provider_name: String,
    pub model_name: String,
}

impl ModelKey {
    pub fn new<P: Into<String>, M: Into<String>>(provider_name: P, model_name: M) -> Self {
        Self {
            provider_name: provider_name.into(),
            model_name: model_name.into(),
        }
    }
}

#[derive(Clone)]
pub struct ModelRepository {
    connection: Arc<DatabaseConnection>,
}

impl ModelRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    fn column_for(field: &str) -> Option<Column> {
        match field {
            "provider_name" => Some(Column::ProviderName),
            "model_name" => Some(Column::ModelName),
            "service_name" => Some(Column::ServiceName),
            "service_source" => Some(Column::ServiceSource),
            "status" => Some(Column::Status),
            "is_default" => Some(Column::IsDefault),
            "created_at" => Some(Column::CreatedAt),
            "updated_at" => Some(Column::UpdatedAt),
            _ => None,
        }
    }

    fn to_domain(entity: Entity) -> Model {
        Model {
            service_source: ServiceSource::from_str(&entity.service_source)
                .unwrap_or(ServiceSource::Local),
            status: ModelStatus::from_str(&entity.status).unwrap_or_default(),
            id: entity.id,
            provider_name: entity.provider_name,
            model_name: entity.model_name,
            service_name: entity.service_name,
            is_default: entity.is_default,
            created_at: entity.created_at,
            updated_at: entity.updated_at,
        }
    }

    async fn find_entity(&self, key: &ModelKey) -> AogResult<Option<Entity>> {
        let model = Models::find()
            .filter(Column::ProviderName.eq(&key.provider_name))
            .filter(Column::ModelName.eq(&key.model_name))
            .one(self.connection.as_ref())
            .await?;
        Ok(model)
    }
}

#[async_trait::async_trait]
impl DataStore for ModelRepository {
    type Domain = Model;
    type Key = ModelKey;
    type Create = Model;

    async fn add(&self, create: Model) -> AogResult<Model> {
        let key = ModelKey::new(&create.provider_name, &create.model_name);
        if self.find_entity(&key).await?.is_some() {
            return Err(AogError::ModelAlreadyExists {
                model: create.model_name,
            });
        }
        let now = Utc::now();
        let active = ActiveModel {
            id: Set(Uuid::new_v4()),
            provider_name: Set(create.provider_name.clone()),
            model_name: Set(create.model_name.clone()),
            service_name: Set(create.service_name.clone()),
            service_source: Set(create.service_source.to_string()),
            status: Set(create.status.to_string()),
            is_default: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let model = active.insert(self.connection.as_ref()).await?;
        let domain = Self::to_domain(model);
        if create.is_default {
            self.set_default(&key).await?;
            return Ok(Model {
                is_default: true,
                ..domain
            });
        }
        Ok(domain)
    }

    async fn put(&self, record: Model) -> AogResult<Model> {
        let key = ModelKey::new(&record.provider_name, &record.model_name);
        let Some(existing) = self.find_entity(&key).await? else {
            return self.add(record).await;
        };
        let mut active: ActiveModel = existing.into();
        active.service_name = Set(record.service_name.clone());
        active.service_source = Set(record.service_source.to_string());
        active.status = Set(record.status.to_string());
        active.updated_at = Set(Utc::now());
        let model = active.update(self.connection.as_ref()).await?;
        Ok(Self::to_domain(model))
    }

    async fn get(&self, key: &ModelKey) -> AogResult<Option<Model>> {
        Ok(self.find_entity(key).await?.map(Self::to_domain))
    }

    async fn delete(&self, key: &ModelKey) -> AogResult<()> {
        let Some(existing) = self.find_entity(key).await? else {
            return Err(AogError::ModelNotFound {
                model: key.model_name.clone(),
            });
        };
        Models::delete_by_id(existing.id)
            .exec(self.connection.as_ref())
            .await?;
        Ok(())
    }

    async fn list(&self, params: &ListParams) -> AogResult<Vec<Model>> {
        let query = apply_list_params(Models::find(), params, Self::column_for);
        let models = query.all(self.connection.as_ref()).await?;
        Ok(models.into_iter().map(Self::to_domain).collect())
    }

    async fn count(&self, filters: &[FilterClause]) -> AogResult<u64> {
        let count = Models::find()
            .filter(build_condition(filters, Self::column_for))
            .count(self.connection.as_ref())
            .await?;
        Ok(count)
    }

    async fn is_exist(&self, key: &ModelKey) -> AogResult<bool> {
        Ok(self.find_entity(key).await?.is_some())
    }
}

impl ModelRepository {
    /// Mark one model as the default for its (service, source) pair,
    /// clearing any previous default in the same transaction.
    pub async fn set_default(&self, key: &ModelKey) -> AogResult<()> {
        let Some(target) = self.find_entity(key).await? else {
            return Err(AogError::ModelNotFound {
                model: key.model_name.clone(),
            });
        };

        let txn = self.connection.begin().await?;
        Models::update_many()
            .col_expr(Column::IsDefault, Expr::value(false))
            .filter(Column::ServiceName.eq(&target.service_name))
            .filter(Column::ServiceSource.eq(&target.service_source))
            .exec(&txn)
            .await?;
        Models::update_many()
            .col_expr(Column::IsDefault, Expr::value(true))
            .filter(Column::Id.eq(target.id))
            .exec(&txn)
            .await?;
        txn.commit().await?;
        Ok(())
    }

    /// Update only the lifecycle status of one model.
    pub async fn update_status(&self, key: &ModelKey, status: ModelStatus) -> AogResult<()> {
        let Some(existing) = self.find_entity(key).await? else {
            return Err(AogError::ModelNotFound {
                model: key.model_name.clone(),
            });
        };
        let mut active: ActiveModel = existing.into();
        active.status = Set(status.to_string());
        active.updated_at = Set(Utc::now());
        active.update(self.connection.as_ref()).await?;
        Ok(())
    }

    /// The default model for a (service, source) pair, if one is set.
    pub async fn find_default(
        &self,
        service_name: &str,
        source: ServiceSource,
    ) -> AogResult<Option<Model>> {
        let model = Models::find()
            .filter(Column::ServiceName.eq(service_name))
            .filter(Column::ServiceSource.eq(source.to_string()))
            .filter(Column::IsDefault.eq(true))
            .one(self.connection.as_ref())
            .await?;
        Ok(model.map(Self::to_domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::database::repositories::traits::DataStore;

    async fn repo() -> ModelRepository {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        ModelRepository::new(db.connection())
    }

    fn record(provider: &str, name: &str) -> Model {
        Model {
            id: Uuid::new_v4(),
            provider_name: provider.into(),
            model_name: name.into(),
            service_name: "chat".into(),
            service_source: ServiceSource::Local,
            status: ModelStatus::Absent,
            is_default: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn at_most_one_default_per_service_source() {
        let repo = repo().await;
        repo.add(record("local_ollama_chat", "llama3.1")).await.unwrap();
        repo.add(record("local_ollama_chat", "qwen2.5")).await.unwrap();

        repo.set_default(&ModelKey::new("local_ollama_chat", "llama3.1"))
            .await
            .unwrap();
        repo.set_default(&ModelKey::new("local_ollama_chat", "qwen2.5"))
            .await
            .unwrap();

        let all = repo.list(&ListParams::default()).await.unwrap();
        let default_names: Vec<_> = all
            .iter()
            .filter(|m| m.is_default)
            .map(|m| m.model_name.as_str())
            .collect();
        assert_eq!(default_names, vec!["qwen2.5"]);
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let repo = repo().await;
        repo.add(record("p", "m")).await.unwrap();
        let err = repo.add(record("p", "m")).await.unwrap_err();
        assert!(matches!(err, AogError::ModelAlreadyExists { .. }));
    }
}
