use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_inventory_containers::Migration),
            Box::new(m20250301_000002_create_purchase_tables::Migration),
            Box::new(m20250301_000003_create_dispense_tables::Migration),
        ]
    }
}

/// Columns shared by every audit log table.
#[derive(DeriveIden)]
enum AuditLog {
    Id,
    SubjectId,
    ActorId,
    ChangeKind,
    Field,
    OldValue,
    NewValue,
    Description,
    CreatedAt,
}

/// Builds an append-only log table whose rows are removed with their subject.
fn audit_log_table(table: &str, subject_table: &str) -> TableCreateStatement {
    Table::create()
        .table(Alias::new(table))
        .if_not_exists()
        .col(
            ColumnDef::new(AuditLog::Id)
                .integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(ColumnDef::new(AuditLog::SubjectId).integer().not_null())
        .col(ColumnDef::new(AuditLog::ActorId).integer().not_null())
        .col(ColumnDef::new(AuditLog::ChangeKind).string_len(16).not_null())
        .col(ColumnDef::new(AuditLog::Field).string_len(32).null())
        .col(ColumnDef::new(AuditLog::OldValue).integer().null())
        .col(ColumnDef::new(AuditLog::NewValue).integer().null())
        .col(ColumnDef::new(AuditLog::Description).text().not_null())
        .col(
            ColumnDef::new(AuditLog::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .foreign_key(
            ForeignKey::create()
                .name(format!("fk_{}_subject_id", table))
                .from(Alias::new(table), AuditLog::SubjectId)
                .to(Alias::new(subject_table), Alias::new("id"))
                .on_delete(ForeignKeyAction::Cascade)
                .on_update(ForeignKeyAction::Cascade),
        )
        .to_owned()
}

fn audit_log_index(table: &str) -> IndexCreateStatement {
    Index::create()
        .if_not_exists()
        .name(format!("idx_{}_subject_id", table))
        .table(Alias::new(table))
        .col(AuditLog::SubjectId)
        .col(AuditLog::Id)
        .to_owned()
}

mod m20250301_000001_create_inventory_containers {
    use super::{audit_log_index, audit_log_table};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_inventory_containers"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            let level = |col: InventoryContainers| {
                ColumnDef::new(col).integer().not_null().default(0).to_owned()
            };

            manager
                .create_table(
                    Table::create()
                        .table(InventoryContainers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryContainers::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryContainers::GreenhouseId)
                                .integer()
                                .not_null(),
                        )
                        .col(level(InventoryContainers::PhUp))
                        .col(level(InventoryContainers::PhDown))
                        .col(level(InventoryContainers::SolutionA))
                        .col(level(InventoryContainers::SolutionB))
                        .col(level(InventoryContainers::CriticalLevel))
                        .col(
                            ColumnDef::new(InventoryContainers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryContainers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .to_owned(),
                )
                .await?;

            // One container per greenhouse.
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_inventory_containers_greenhouse_id")
                        .table(InventoryContainers::Table)
                        .col(InventoryContainers::GreenhouseId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(audit_log_table("container_logs", "inventory_containers"))
                .await?;
            manager
                .create_index(audit_log_index("container_logs"))
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Alias::new("container_logs")).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryContainers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum InventoryContainers {
        Table,
        Id,
        GreenhouseId,
        PhUp,
        PhDown,
        SolutionA,
        SolutionB,
        CriticalLevel,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000002_create_purchase_tables {
    use super::m20250301_000001_create_inventory_containers::InventoryContainers;
    use super::{audit_log_index, audit_log_table};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_purchase_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryPurchases::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryPurchases::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InventoryPurchases::ContainerId).integer().null())
                        .col(
                            ColumnDef::new(InventoryPurchases::GreenhouseId)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryPurchases::ActorId).integer().not_null())
                        .col(ColumnDef::new(InventoryPurchases::ItemName).string().not_null())
                        .col(
                            ColumnDef::new(InventoryPurchases::ResourceKind)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryPurchases::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(InventoryPurchases::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryPurchases::TotalPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryPurchases::PackageCapacity)
                                .integer()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(InventoryPurchases::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryPurchases::UpdatedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_purchases_container_id")
                                .from(InventoryPurchases::Table, InventoryPurchases::ContainerId)
                                .to(InventoryContainers::Table, InventoryContainers::Id)
                                .on_delete(ForeignKeyAction::SetNull)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_inventory_purchases_greenhouse_id")
                        .table(InventoryPurchases::Table)
                        .col(InventoryPurchases::GreenhouseId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(audit_log_table("purchase_logs", "inventory_purchases"))
                .await?;
            manager
                .create_index(audit_log_index("purchase_logs"))
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(InventoryItems::GreenhouseId).integer().not_null())
                        .col(ColumnDef::new(InventoryItems::UserId).integer().not_null())
                        .col(ColumnDef::new(InventoryItems::Name).string().not_null())
                        .col(ColumnDef::new(InventoryItems::Description).text().null())
                        .col(ColumnDef::new(InventoryItems::Count).integer().not_null())
                        .col(ColumnDef::new(InventoryItems::Unit).string_len(32).not_null())
                        .col(
                            ColumnDef::new(InventoryItems::UnitPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::TotalPrice)
                                .decimal_len(12, 2)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(audit_log_table("item_logs", "inventory_items"))
                .await?;
            manager.create_index(audit_log_index("item_logs")).await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            for table in ["item_logs", "purchase_logs"] {
                manager
                    .drop_table(Table::drop().table(Alias::new(table)).to_owned())
                    .await?;
            }
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(InventoryPurchases::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryPurchases {
        Table,
        Id,
        ContainerId,
        GreenhouseId,
        ActorId,
        ItemName,
        ResourceKind,
        Quantity,
        UnitPrice,
        TotalPrice,
        PackageCapacity,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum InventoryItems {
        Table,
        Id,
        GreenhouseId,
        UserId,
        Name,
        Description,
        Count,
        Unit,
        UnitPrice,
        TotalPrice,
        ReceivedAt,
    }
}

mod m20250301_000003_create_dispense_tables {
    use super::{audit_log_index, audit_log_table};
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_create_dispense_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(DispenseEvents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(DispenseEvents::Id)
                                .integer()
                                .not_null()
                                .auto_increment()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(DispenseEvents::GreenhouseId).integer().not_null())
                        .col(ColumnDef::new(DispenseEvents::PlantId).integer().not_null())
                        .col(ColumnDef::new(DispenseEvents::PlantName).string().not_null())
                        .col(
                            ColumnDef::new(DispenseEvents::ResourceKind)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(DispenseEvents::Amount).integer().not_null())
                        .col(ColumnDef::new(DispenseEvents::ActorId).integer().not_null())
                        .col(ColumnDef::new(DispenseEvents::ActivatedBy).string().not_null())
                        .col(
                            ColumnDef::new(DispenseEvents::DispensedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_dispense_events_greenhouse_plant")
                        .table(DispenseEvents::Table)
                        .col(DispenseEvents::GreenhouseId)
                        .col(DispenseEvents::PlantId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(audit_log_table("dispense_logs", "dispense_events"))
                .await?;
            manager.create_index(audit_log_index("dispense_logs")).await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Alias::new("dispense_logs")).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(DispenseEvents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum DispenseEvents {
        Table,
        Id,
        GreenhouseId,
        PlantId,
        PlantName,
        ResourceKind,
        Amount,
        ActorId,
        ActivatedBy,
        DispensedAt,
    }
}
