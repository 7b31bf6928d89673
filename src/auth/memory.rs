use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{
    repo::{StoreError, StoreResult, UserStore},
    repo_types::{NewUser, OtpChallenge, User},
};

/// Process-local user store. Used by tests and `STORE_BACKEND=memory`.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: Uuid, f: F) -> StoreResult<()>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut users = self.users.write().await;
        if let Some(user) = users.get_mut(&id) {
            f(user);
            user.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.phone == phone).cloned())
    }

    async fn insert(&self, new_user: NewUser) -> StoreResult<User> {
        let mut users = self.users.write().await;
        if users
            .values()
            .any(|u| u.email == new_user.email || u.phone == new_user.phone)
        {
            return Err(StoreError::Conflict("Email or phone already exists".into()));
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            name: new_user.name,
            email: new_user.email,
            phone: new_user.phone,
            password_hash: new_user.password_hash,
            role: new_user.role,
            is_active: false,
            otp: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_otp(&self, id: Uuid, otp: &OtpChallenge) -> StoreResult<()> {
        let otp = otp.clone();
        self.update(id, move |u| u.otp = Some(otp)).await
    }

    async fn clear_otp_if(&self, id: Uuid, code: &str) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(u) if u.otp.as_ref().is_some_and(|o| o.code == code) => {
                u.otp = None;
                u.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn consume_otp(
        &self,
        id: Uuid,
        code: &str,
        now: OffsetDateTime,
    ) -> StoreResult<Option<User>> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(u) if u.otp.as_ref().is_some_and(|o| o.is_valid_at(code, now)) => {
                u.otp = None;
                u.is_active = true;
                u.updated_at = OffsetDateTime::now_utc();
                Ok(Some(u.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        let password_hash = password_hash.to_string();
        self.update(id, move |u| {
            u.password_hash = password_hash;
            u.otp = None;
        })
        .await
    }

    async fn update_password_if(
        &self,
        id: Uuid,
        password_hash: &str,
        code: &str,
        now: OffsetDateTime,
    ) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(u) if u.otp.as_ref().is_some_and(|o| o.is_valid_at(code, now)) => {
                u.password_hash = password_hash.to_string();
                u.otp = None;
                u.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
