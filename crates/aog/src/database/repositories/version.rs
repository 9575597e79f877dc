//! Repository for the single-row version record

use std::sync::Arc;

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, EntityTrait, Set};

use crate::entities::version_records::{ActiveModel, Entity as VersionRecords, Model as Entity};
use crate::errors::{AogError, AogResult};
use crate::models::VersionRecord;

#[derive(Clone)]
pub struct VersionRepository {
    connection: Arc<DatabaseConnection>,
}

impl VersionRepository {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self { connection }
    }

    fn to_domain(entity: Entity) -> VersionRecord {
        VersionRecord {
            spec_version: entity.spec_version,
            gateway_version: entity.gateway_version,
            available_version: entity.available_version,
            updated_at: entity.updated_at,
        }
    }

    pub async fn get(&self) -> AogResult<VersionRecord> {
        let record = VersionRecords::find()
            .one(self.connection.as_ref())
            .await?
            .ok_or_else(|| AogError::internal("version record missing"))?;
        Ok(Self::to_domain(record))
    }

    /// Record the newest version the update channel announced.
    pub async fn set_available_version(&self, version: &str) -> AogResult<VersionRecord> {
        let existing = VersionRecords::find()
            .one(self.connection.as_ref())
            .await?
            .ok_or_else(|| AogError::internal("version record missing"))?;
        let mut active: ActiveModel = existing.into();
        active.available_version = Set(version.to_string());
        active.updated_at = Set(Utc::now());
        let model = active.update(self.connection.as_ref()).await?;
        Ok(Self::to_domain(model))
    }
}
