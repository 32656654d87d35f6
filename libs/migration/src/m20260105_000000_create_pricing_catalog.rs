use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_type(
                Type::create()
                    .as_enum(CloudProviderEnum::Enum)
                    .values([
                        CloudProviderEnum::Aws,
                        CloudProviderEnum::Azure,
                        CloudProviderEnum::Gcp,
                    ])
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PricingProducts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PricingProducts::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PricingProducts::Provider)
                            .enumeration(
                                CloudProviderEnum::Enum,
                                [
                                    CloudProviderEnum::Aws,
                                    CloudProviderEnum::Azure,
                                    CloudProviderEnum::Gcp,
                                ],
                            )
                            .not_null(),
                    )
                    .col(string_len(PricingProducts::Sku, 255).not_null())
                    .col(string_len(PricingProducts::MeterId, 255).not_null().default(""))
                    .col(string_len(PricingProducts::Location, 100).not_null())
                    .col(string_len(PricingProducts::Service, 255).not_null())
                    .col(string_len(PricingProducts::Family, 255).not_null().default(""))
                    .col(json_binary(PricingProducts::Attributes).not_null().default("{}"))
                    .col(
                        timestamp_with_time_zone(PricingProducts::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(PricingProducts::UpdatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Product identity (upsert target)
        manager
            .create_index(
                Index::create()
                    .name("idx_pricing_products_identity")
                    .table(PricingProducts::Table)
                    .col(PricingProducts::Provider)
                    .col(PricingProducts::Sku)
                    .col(PricingProducts::MeterId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Coarse scan used by price resolution
        manager
            .create_index(
                Index::create()
                    .name("idx_pricing_products_lookup")
                    .table(PricingProducts::Table)
                    .col(PricingProducts::Provider)
                    .col(PricingProducts::Location)
                    .col(PricingProducts::Service)
                    .col(PricingProducts::Family)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(PricingProductPrices::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PricingProductPrices::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(big_integer(PricingProductPrices::ProductId).not_null())
                    .col(string_len(PricingProductPrices::Hash, 64).not_null())
                    .col(string_len(PricingProductPrices::Currency, 3).not_null())
                    .col(string_len(PricingProductPrices::Unit, 100).not_null())
                    .col(
                        ColumnDef::new(PricingProductPrices::Price)
                            .decimal_len(24, 10)
                            .not_null(),
                    )
                    .col(
                        json_binary(PricingProductPrices::Attributes)
                            .not_null()
                            .default("{}"),
                    )
                    .col(
                        timestamp_with_time_zone(PricingProductPrices::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pricing_product_prices_product_id")
                            .from(PricingProductPrices::Table, PricingProductPrices::ProductId)
                            .to(PricingProducts::Table, PricingProducts::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Price fingerprint (upsert target)
        manager
            .create_index(
                Index::create()
                    .name("idx_pricing_product_prices_hash")
                    .table(PricingProductPrices::Table)
                    .col(PricingProductPrices::ProductId)
                    .col(PricingProductPrices::Hash)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PricingProductPrices::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(PricingProducts::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(CloudProviderEnum::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum PricingProducts {
    Table,
    Id,
    Provider,
    Sku,
    MeterId,
    Location,
    Service,
    Family,
    Attributes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PricingProductPrices {
    Table,
    Id,
    ProductId,
    Hash,
    Currency,
    Unit,
    Price,
    Attributes,
    CreatedAt,
}

#[derive(DeriveIden)]
enum CloudProviderEnum {
    #[sea_orm(iden = "cloud_provider")]
    Enum,
    #[sea_orm(iden = "aws")]
    Aws,
    #[sea_orm(iden = "azure")]
    Azure,
    #[sea_orm(iden = "gcp")]
    Gcp,
}
