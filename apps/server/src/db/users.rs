//! Read-only lookup of users owned by the authentication layer

use crate::models::User;
use crate::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<User>>;
}

#[derive(Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn get(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query(
            r#"
            SELECT id, company_id, username, full_name, email, time_zone,
                   admin, sys_admin, system, permissions
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::Error::Database)?;

        Ok(row.map(|row| {
            let permissions: Vec<String> = row.get("permissions");
            User {
                id: row.get("id"),
                company_id: row.get("company_id"),
                username: row.get("username"),
                full_name: row.get::<Option<String>, _>("full_name").unwrap_or_default(),
                email: row.get::<Option<String>, _>("email").unwrap_or_default(),
                time_zone: row.get("time_zone"),
                admin: row.get("admin"),
                sys_admin: row.get("sys_admin"),
                system: row.get("system"),
                permissions: permissions.into_iter().collect(),
            }
        }))
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<i64, User>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn get(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}
