//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于协调器依赖抽象而非具体实现，支持 mock 测试。

use async_trait::async_trait;

use commerce_shared::error::Result;

use super::{InsertOutcome, TransitionOutcome};
use crate::models::OrderStatus;

/// 订单状态存储接口
///
/// 订单当前状态的唯一事实来源。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderStatusStore: Send + Sync {
    /// 单行查询订单状态，订单不存在返回 None（不是错误）
    async fn get_status(&self, order_id: &str) -> Result<Option<OrderStatus>>;

    /// 仅当订单仍为 Pending 时原子地转移到 new_status
    ///
    /// 条件判断与写入必须是同一条语句，消除"先查再写"在并发
    /// 或重复投递下的竞争窗口。
    async fn transition_if_pending(
        &self,
        order_id: &str,
        new_status: OrderStatus,
    ) -> Result<TransitionOutcome>;
}

/// 已登记用户存储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RegisteredUserStore: Send + Sync {
    /// 幂等登记用户，重复登记不是错误
    async fn insert_if_absent(&self, user_id: &str) -> Result<InsertOutcome>;
}
