use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::{NotSet, Set};
use serde::{Deserialize, Serialize};

use crate::models::{Attributes, CloudProvider, JobStatus};

fn attributes_to_json(attributes: &Attributes) -> serde_json::Value {
    serde_json::Value::Object(
        attributes
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
}

/// Attribute columns must hold a flat string-to-string object
fn attributes_from_json(
    table: &str,
    id: i64,
    value: serde_json::Value,
) -> Result<Attributes, DbErr> {
    serde_json::from_value(value)
        .map_err(|e| DbErr::Json(format!("{} row {} has malformed attributes: {}", table, id, e)))
}

// ===== Products Entity =====

pub mod products {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "pricing_products")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub provider: CloudProvider,
        #[sea_orm(column_type = "String(StringLen::N(255))")]
        pub sku: String,
        #[sea_orm(column_type = "String(StringLen::N(255))")]
        pub meter_id: String,
        #[sea_orm(column_type = "String(StringLen::N(100))")]
        pub location: String,
        #[sea_orm(column_type = "String(StringLen::N(255))")]
        pub service: String,
        #[sea_orm(column_type = "String(StringLen::N(255))")]
        pub family: String,
        #[sea_orm(column_type = "JsonBinary")]
        pub attributes: serde_json::Value,
        pub created_at: DateTimeWithTimeZone,
        pub updated_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::prices::Entity")]
        Prices,
    }

    impl Related<super::prices::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Prices.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}

    impl TryFrom<Model> for crate::models::Product {
        type Error = crate::error::PricingError;

        fn try_from(model: Model) -> Result<Self, Self::Error> {
            let attributes = attributes_from_json("pricing_products", model.id, model.attributes)?;
            Ok(Self {
                id: model.id,
                provider: model.provider,
                sku: model.sku,
                meter_id: model.meter_id,
                location: model.location,
                service: model.service,
                family: model.family,
                attributes,
                created_at: model.created_at.into(),
                updated_at: model.updated_at.into(),
            })
        }
    }

    impl From<crate::models::NewProduct> for ActiveModel {
        fn from(input: crate::models::NewProduct) -> Self {
            let now = chrono::Utc::now();
            ActiveModel {
                id: NotSet,
                provider: Set(input.provider),
                sku: Set(input.sku),
                meter_id: Set(input.meter_id),
                location: Set(input.location),
                service: Set(input.service),
                family: Set(input.family),
                attributes: Set(attributes_to_json(&input.attributes)),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
        }
    }
}

// ===== Prices Entity =====

pub mod prices {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "pricing_product_prices")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i64,
        pub product_id: i64,
        #[sea_orm(column_type = "String(StringLen::N(64))")]
        pub hash: String,
        #[sea_orm(column_type = "String(StringLen::N(3))")]
        pub currency: String,
        #[sea_orm(column_type = "String(StringLen::N(100))")]
        pub unit: String,
        #[sea_orm(column_type = "Decimal(Some((24, 10)))")]
        pub price: Decimal,
        #[sea_orm(column_type = "JsonBinary")]
        pub attributes: serde_json::Value,
        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::products::Entity",
            from = "Column::ProductId",
            to = "super::products::Column::Id"
        )]
        Product,
    }

    impl Related<super::products::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Product.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}

    impl TryFrom<Model> for crate::models::Price {
        type Error = crate::error::PricingError;

        fn try_from(model: Model) -> Result<Self, Self::Error> {
            let attributes =
                attributes_from_json("pricing_product_prices", model.id, model.attributes)?;
            Ok(Self {
                id: model.id,
                product_id: model.product_id,
                hash: model.hash,
                currency: model.currency,
                unit: model.unit,
                price: model.price,
                attributes,
                created_at: model.created_at.into(),
            })
        }
    }

    /// Builds the row for `price` under `product_id`; the hash is computed here
    pub fn active_model(product_id: i64, input: &crate::models::NewPrice) -> ActiveModel {
        ActiveModel {
            id: NotSet,
            product_id: Set(product_id),
            hash: Set(input.fingerprint()),
            currency: Set(input.currency.trim().to_ascii_uppercase()),
            unit: Set(input.unit.clone()),
            price: Set(input.price),
            attributes: Set(attributes_to_json(&input.attributes)),
            created_at: Set(chrono::Utc::now().into()),
        }
    }
}

// ===== Ingestion Jobs Entity =====

pub mod ingestion_jobs {
    use super::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "ingestion_jobs")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub provider: CloudProvider,
        #[sea_orm(column_type = "String(StringLen::N(100))")]
        pub location: String,
        #[sea_orm(column_type = "String(StringLen::N(255))")]
        pub service: String,
        pub status: JobStatus,
        #[sea_orm(column_type = "Text", nullable)]
        pub error_msg: Option<String>,
        pub created_at: DateTimeWithTimeZone,
        pub updated_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for crate::models::IngestionJob {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                provider: model.provider,
                location: model.location,
                service: model.service,
                status: model.status,
                error_msg: model.error_msg,
                created_at: model.created_at.into(),
                updated_at: model.updated_at.into(),
            }
        }
    }

    impl From<&crate::models::IngestionScope> for ActiveModel {
        fn from(scope: &crate::models::IngestionScope) -> Self {
            let now = chrono::Utc::now();
            ActiveModel {
                id: Set(Uuid::now_v7()),
                provider: Set(scope.provider),
                location: Set(scope.location.clone()),
                service: Set(scope.service.clone()),
                status: Set(JobStatus::Pending),
                error_msg: Set(None),
                created_at: Set(now.into()),
                updated_at: Set(now.into()),
            }
        }
    }
}
