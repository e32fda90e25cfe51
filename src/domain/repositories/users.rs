use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::{entities::users::UserEntity, value_objects::plans::PlanTier};

#[async_trait]
#[automock]
pub trait UserRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<UserEntity>>;
    async fn find_by_google_id(&self, google_id: &str) -> Result<Option<UserEntity>>;
    async fn find_by_email(&self, email: &str) -> Result<Option<UserEntity>>;

    /// Writes the billing fields of a user in one statement.
    ///
    /// `customer_id = None` leaves the stored customer reference unchanged;
    /// `subscription_id = None` clears the stored subscription reference.
    async fn update_subscription(
        &self,
        user_id: Uuid,
        plan: PlanTier,
        customer_id: Option<String>,
        subscription_id: Option<String>,
    ) -> Result<()>;
}
