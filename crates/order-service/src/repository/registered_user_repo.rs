//! 已登记用户仓储
//!
//! 用户注册事件的落库端。表由订单接入服务拥有，这里只做幂等插入。

use async_trait::async_trait;
use sqlx::PgPool;

use commerce_shared::error::Result;

use super::InsertOutcome;
use super::traits::RegisteredUserStore;

/// 已登记用户仓储
pub struct RegisteredUserRepository {
    pool: PgPool,
}

impl RegisteredUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RegisteredUserStore for RegisteredUserRepository {
    /// ON CONFLICT DO NOTHING 把重复登记吸收在数据库内，
    /// 不会向调用方抛出唯一键冲突。
    async fn insert_if_absent(&self, user_id: &str) -> Result<InsertOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO registered_users (user_id)
            VALUES ($1)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::AlreadyExists)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commerce_shared::config::DatabaseConfig;
    use commerce_shared::database::Database;

    #[tokio::test]
    #[ignore] // 需要数据库连接和已初始化的 registered_users 表
    async fn test_insert_is_idempotent() {
        let db = Database::connect(&DatabaseConfig::default()).await.unwrap();
        let repo = RegisteredUserRepository::new(db.pool().clone());

        let first = repo.insert_if_absent("u-idem-001").await.unwrap();
        assert_eq!(first, InsertOutcome::Inserted);

        // 第二次登记同一用户：成功返回，无唯一键冲突
        let second = repo.insert_if_absent("u-idem-001").await.unwrap();
        assert_eq!(second, InsertOutcome::AlreadyExists);
    }
}
