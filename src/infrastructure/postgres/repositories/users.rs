use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use diesel::{OptionalExtension, RunQueryDsl, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::users::UserEntity, repositories::users::UserRepository,
        value_objects::plans::PlanTier,
    },
    infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::users},
};

pub struct UserPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl UserPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl UserRepository for UserPostgres {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = users::table
            .find(user_id)
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = users::table
            .filter(users::google_id.eq(google_id))
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = users::table
            .filter(users::email.eq(email))
            .select(UserEntity::as_select())
            .first::<UserEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn update_subscription(
        &self,
        user_id: Uuid,
        plan: PlanTier,
        customer_id: Option<String>,
        subscription_id: Option<String>,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        match customer_id {
            Some(customer_id) => {
                update(users::table.filter(users::id.eq(user_id)))
                    .set((
                        users::plan.eq(plan.to_string()),
                        users::stripe_customer_id.eq(Some(customer_id)),
                        users::stripe_subscription_id.eq(subscription_id),
                        users::updated_at.eq(Utc::now()),
                    ))
                    .execute(&mut conn)?;
            }
            // Keep the stored customer reference untouched.
            None => {
                update(users::table.filter(users::id.eq(user_id)))
                    .set((
                        users::plan.eq(plan.to_string()),
                        users::stripe_subscription_id.eq(subscription_id),
                        users::updated_at.eq(Utc::now()),
                    ))
                    .execute(&mut conn)?;
            }
        }

        Ok(())
    }
}
