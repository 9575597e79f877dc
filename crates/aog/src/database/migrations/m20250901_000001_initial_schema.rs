use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Services::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Services::Name).string().not_null().primary_key())
                    .col(ColumnDef::new(Services::HybridPolicy).string().not_null())
                    .col(
                        ColumnDef::new(Services::LocalProvider)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Services::RemoteProvider)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(Services::CanInstall)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(Services::Status).integer().not_null().default(0))
                    .col(ColumnDef::new(Services::Avatar).string().not_null().default(""))
                    .col(ColumnDef::new(Services::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Services::UpdatedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ServiceProviders::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ServiceProviders::ProviderName)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ServiceProviders::ServiceName).string().not_null())
                    .col(ColumnDef::new(ServiceProviders::ServiceSource).string().not_null())
                    .col(ColumnDef::new(ServiceProviders::Flavor).string().not_null())
                    .col(ColumnDef::new(ServiceProviders::Desc).string().not_null().default(""))
                    .col(
                        ColumnDef::new(ServiceProviders::Method)
                            .string()
                            .not_null()
                            .default("POST"),
                    )
                    .col(ColumnDef::new(ServiceProviders::Url).string().not_null().default(""))
                    .col(
                        ColumnDef::new(ServiceProviders::AuthType)
                            .string()
                            .not_null()
                            .default("none"),
                    )
                    .col(
                        ColumnDef::new(ServiceProviders::AuthKey)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ServiceProviders::ExtraHeaders)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ServiceProviders::ExtraBody)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ServiceProviders::Properties)
                            .text()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(ServiceProviders::Status)
                            .string()
                            .not_null()
                            .default("unknown"),
                    )
                    .col(
                        ColumnDef::new(ServiceProviders::Scope)
                            .string()
                            .not_null()
                            .default("user"),
                    )
                    .col(
                        ColumnDef::new(ServiceProviders::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ServiceProviders::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Models::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Models::Id).string().not_null().primary_key())
                    .col(ColumnDef::new(Models::ProviderName).string().not_null())
                    .col(ColumnDef::new(Models::ModelName).string().not_null())
                    .col(ColumnDef::new(Models::ServiceName).string().not_null())
                    .col(ColumnDef::new(Models::ServiceSource).string().not_null())
                    .col(ColumnDef::new(Models::Status).string().not_null().default("absent"))
                    .col(
                        ColumnDef::new(Models::IsDefault)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Models::CreatedAt).timestamp_with_time_zone().not_null())
                    .col(ColumnDef::new(Models::UpdatedAt).timestamp_with_time_zone().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_models_provider_model")
                    .table(Models::Table)
                    .col(Models::ProviderName)
                    .col(Models::ModelName)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_service_providers_service")
                    .table(ServiceProviders::Table)
                    .col(ServiceProviders::ServiceName)
                    .col(ServiceProviders::ServiceSource)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(VersionRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VersionRecords::SpecVersion)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(VersionRecords::GatewayVersion).string().not_null())
                    .col(
                        ColumnDef::new(VersionRecords::AvailableVersion)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(
                        ColumnDef::new(VersionRecords::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(VersionRecords::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Models::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ServiceProviders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Services::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Services {
    Table,
    Name,
    HybridPolicy,
    LocalProvider,
    RemoteProvider,
    CanInstall,
    Status,
    Avatar,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ServiceProviders {
    Table,
    ProviderName,
    ServiceName,
    ServiceSource,
    Flavor,
    Desc,
    Method,
    Url,
    AuthType,
    AuthKey,
    ExtraHeaders,
    ExtraBody,
    Properties,
    Status,
    Scope,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Models {
    Table,
    Id,
    ProviderName,
    ModelName,
    ServiceName,
    ServiceSource,
    Status,
    IsDefault,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum VersionRecords {
    Table,
    SpecVersion,
    GatewayVersion,
    AvailableVersion,
    UpdatedAt,
}
