use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// (name, hybrid_policy, can_install)
///
/// `text-to-image` starts on `always_remote`; every other service starts on
/// `default`. Image-to-image and image-to-video have no local engine path.
const SEED_SERVICES: &[(&str, &str, bool)] = &[
    ("chat", "default", true),
    ("embed", "default", true),
    ("generate", "default", true),
    ("models", "default", true),
    ("text-to-image", "always_remote", true),
    ("speech-to-text", "default", true),
    ("speech-to-text-ws", "default", true),
    ("text-to-speech", "default", true),
    ("image-to-image", "default", false),
    ("image-to-video", "default", false),
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for (name, policy, can_install) in SEED_SERVICES {
            let insert = Query::insert()
                .into_table(Services::Table)
                .columns([
                    Services::Name,
                    Services::HybridPolicy,
                    Services::LocalProvider,
                    Services::RemoteProvider,
                    Services::CanInstall,
                    Services::Status,
                    Services::Avatar,
                    Services::CreatedAt,
                    Services::UpdatedAt,
                ])
                .values_panic([
                    Expr::value(*name),
                    Expr::value(*policy),
                    Expr::value(""),
                    Expr::value(""),
                    Expr::value(*can_install),
                    Expr::value(0),
                    Expr::value(""),
                    Expr::current_timestamp().into(),
                    Expr::current_timestamp().into(),
                ])
                .to_owned();
            manager.exec_stmt(insert).await?;
        }

        let version = Query::insert()
            .into_table(VersionRecords::Table)
            .columns([
                VersionRecords::SpecVersion,
                VersionRecords::GatewayVersion,
                VersionRecords::AvailableVersion,
                VersionRecords::UpdatedAt,
            ])
            .values_panic([
                Expr::value("v0.2"),
                Expr::value(env!("CARGO_PKG_VERSION")),
                Expr::value(""),
                Expr::current_timestamp().into(),
            ])
            .to_owned();
        manager.exec_stmt(version).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .exec_stmt(Query::delete().from_table(VersionRecords::Table).to_owned())
            .await?;
        manager
            .exec_stmt(Query::delete().from_table(Services::Table).to_owned())
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
enum VersionRecords {
    Table,
    SpecVersion,
    GatewayVersion,
    AvailableVersion,
    UpdatedAt,
}
