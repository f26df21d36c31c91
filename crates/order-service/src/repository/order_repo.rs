//! 订单状态仓储
//!
//! 对外部拥有的 `orders` 表提供读取与受保护的条件更新。

use async_trait::async_trait;
use sqlx::PgPool;

use commerce_shared::error::Result;

use super::TransitionOutcome;
use super::traits::OrderStatusStore;
use crate::models::{Order, OrderStatus};

/// 订单状态仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 按 ID 读取整行订单
    ///
    /// 订单查询接入层走的是同一条查询路径。
    pub async fn get(&self, order_id: &str) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(
            r#"
            SELECT id, user_id, total_price, status
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }
}

#[async_trait]
impl OrderStatusStore for OrderRepository {
    async fn get_status(&self, order_id: &str) -> Result<Option<OrderStatus>> {
        let status = sqlx::query_scalar::<_, OrderStatus>(
            r#"
            SELECT status FROM orders WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(status)
    }

    /// 单条语句的条件更新：UPDATE ... WHERE id = $1 AND status = 'Pending'
    ///
    /// 更新到 0 行时再做一次分类读取区分"订单不存在"与"已是终态"。
    /// 分类读取若看到订单仍为 Pending，说明与订单创建发生了竞争
    /// （条件写早于行可见），此时再尝试一次条件写。
    async fn transition_if_pending(
        &self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<TransitionOutcome> {
        for _ in 0..2 {
            let updated = sqlx::query(
                r#"
                UPDATE orders SET status = $2 WHERE id = $1 AND status = $3
                "#,
            )
            .bind(order_id)
            .bind(new_status)
            .bind(OrderStatus::Pending)
            .execute(&self.pool)
            .await?
            .rows_affected();

            if updated > 0 {
                return Ok(TransitionOutcome::Applied);
            }

            match self.get_status(order_id).await? {
                None => return Ok(TransitionOutcome::NotFound),
                Some(OrderStatus::Pending) => continue,
                Some(_) => return Ok(TransitionOutcome::NotPending),
            }
        }

        // 两轮条件写都落空，说明并发转移已经赢了，等价于终态无操作
        Ok(TransitionOutcome::NotPending)
    }
}
