//! 订单服务核心：订单状态协调器
//!
//! 消费用户注册与支付结果三个 topic，对订单执行受保护的状态转移，
//! 并把无法处理的事件转发到死信队列。REST 接入层与其余服务只在
//! 接口层面与本 crate 交互（共享的两张表和事件线格式）。

pub mod consumer;
pub mod models;
pub mod repository;
