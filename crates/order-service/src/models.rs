//! 订单服务数据模型
//!
//! `orders` 与 `registered_users` 两张表由订单接入服务创建并拥有，
//! 协调器只读取和条件更新，不负责建表或删除行。

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 订单状态
///
/// 订单创建时为 Pending，由协调器一次性转移到 Paid 或 Failed，
/// 进入终态后不再变化。数据库中以字面量 'Pending' / 'Paid' / 'Failed' 存储。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
}

impl OrderStatus {
    /// 是否已进入终态
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::Paid => "Paid",
            Self::Failed => "Failed",
        };
        write!(f, "{s}")
    }
}

/// 订单读取模型
///
/// id 是不透明的文本主键（32~36 个字符），协调器不解析其内部结构。
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub total_price: Decimal,
    pub status: OrderStatus,
}

/// 已登记用户
///
/// 首个有效注册事件写入，之后不再修改或删除；
/// 订单接入服务依赖这张表来校验下单用户是否存在。
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RegisteredUser {
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!OrderStatus::Pending.is_terminal());
        assert!(OrderStatus::Paid.is_terminal());
        assert!(OrderStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_display_matches_stored_literals() {
        assert_eq!(OrderStatus::Pending.to_string(), "Pending");
        assert_eq!(OrderStatus::Paid.to_string(), "Paid");
        assert_eq!(OrderStatus::Failed.to_string(), "Failed");
    }
}
