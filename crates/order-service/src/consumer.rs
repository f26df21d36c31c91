//! 订单状态协调器
//!
//! 多 topic 消费循环：轮询 broker、按 topic 分发、解码校验、
//! 对订单执行受保护的状态转移，失败事件交给死信发布器。
//!
//! 单逻辑流处理，分区内事件按到达顺序消费；跨分区没有顺序保证，
//! 依靠仓储层的原子条件写保证迟到或重复事件不会改写终态订单。
//! 偏移量由 KafkaConsumer 在 handler 成功返回后提交，处理中途
//! 崩溃的结果是重投而非丢失。

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use commerce_shared::config::{AppConfig, TopicsConfig};
use commerce_shared::dlq::DlqPublisher;
use commerce_shared::error::CommerceError;
use commerce_shared::events::{self, InboundEvent, SourceTopic};
use commerce_shared::kafka::{ConsumerMessage, KafkaConsumer};

use crate::models::OrderStatus;
use crate::repository::{InsertOutcome, OrderStatusStore, RegisteredUserStore, TransitionOutcome};

/// 单条消息的处置结果
///
/// 两种处置都表示"这条消息已经处理完"：死信路由成功与否不影响
/// 消息本身的消费进度，业务逻辑不会因此重试。
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Disposition {
    /// 业务处理完成（含至少一次投递下的无操作）
    Completed,
    /// 事件无法处理，携带原因转发死信 topic
    DeadLetter { reason: String },
}

/// 订单状态协调器
///
/// 显式的上下文对象：broker 消费者、两个存储句柄和死信发布器
/// 都在构造时注入，没有模块级共享状态。生命周期与进程一致，
/// 关闭时先完成在途消息再释放 broker 连接。
pub struct OrderCoordinator {
    consumer: KafkaConsumer,
    topics: TopicsConfig,
    orders: Arc<dyn OrderStatusStore>,
    users: Arc<dyn RegisteredUserStore>,
    dlq: Arc<DlqPublisher>,
}

impl OrderCoordinator {
    pub fn new(
        config: &AppConfig,
        orders: Arc<dyn OrderStatusStore>,
        users: Arc<dyn RegisteredUserStore>,
        dlq: Arc<DlqPublisher>,
    ) -> Result<Self, CommerceError> {
        let consumer = KafkaConsumer::new(&config.kafka, None)?;
        Ok(Self {
            consumer,
            topics: config.topics.clone(),
            orders,
            users,
            dlq,
        })
    }

    /// 启动消费循环，直到收到关闭信号
    ///
    /// 将依赖移入闭包，通过 KafkaConsumer::start 驱动循环。
    /// 单独抽取 handle_message / apply_event 两个函数方便单元测试。
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<(), CommerceError> {
        self.consumer.subscribe(&[
            self.topics.user_registration.as_str(),
            self.topics.payment_success.as_str(),
            self.topics.payment_failure.as_str(),
        ])?;

        info!(
            user_registration = %self.topics.user_registration,
            payment_success = %self.topics.payment_success,
            payment_failure = %self.topics.payment_failure,
            "订单状态协调器已启动"
        );

        let Self {
            consumer,
            topics,
            orders,
            users,
            dlq,
        } = self;

        consumer
            .start(shutdown, |msg| {
                let topics = &topics;
                let orders = &orders;
                let users = &users;
                let dlq = &dlq;
                async move {
                    handle_message(topics, orders.as_ref(), users.as_ref(), dlq, &msg).await
                }
            })
            .await;

        info!("订单状态协调器已停止");
        Ok(())
    }
}

/// 处理单条 Kafka 消息的完整流程
///
/// 拆分为独立函数而非方法，便于在测试中直接调用而无需构造完整的协调器。
/// 流程：topic 分发 -> 解码校验 -> 业务处理 -> 按处置结果路由死信。
///
/// 返回 Err 仅表示基础设施故障（数据库不可达等），调用方会保留该消息的
/// 偏移量等待重投；解码/验证失败在这里就地转化为死信处置，属于正常返回。
pub async fn handle_message(
    topics: &TopicsConfig,
    orders: &dyn OrderStatusStore,
    users: &dyn RegisteredUserStore,
    dlq: &DlqPublisher,
    msg: &ConsumerMessage,
) -> Result<(), CommerceError> {
    // 订阅列表之外的 topic 只可能来自部署配置错误，跳过并告警
    let Some(topic) = SourceTopic::resolve(&msg.topic, topics) else {
        warn!(topic = %msg.topic, "收到未订阅 topic 的消息，忽略");
        return Ok(());
    };

    let disposition = match events::decode(topic, &msg.payload) {
        Ok(event) => {
            debug!(
                kind = event.kind(),
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "收到入站事件"
            );
            apply_event(&event, orders, users).await?
        }
        Err(e) => {
            warn!(topic = %msg.topic, error = %e, "事件解码失败，转发死信队列");
            Disposition::DeadLetter {
                reason: e.to_string(),
            }
        }
    };

    if let Disposition::DeadLetter { reason } = disposition {
        // 内部等待投递确认或重试耗尽，协调器在此之前不会拉取下一条消息
        dlq.send_to_dead_letter(&msg.topic, &reason, &msg.payload)
            .await;
    }

    Ok(())
}

/// 将解码后的事件应用到对应的存储
pub(crate) async fn apply_event(
    event: &InboundEvent,
    orders: &dyn OrderStatusStore,
    users: &dyn RegisteredUserStore,
) -> Result<Disposition, CommerceError> {
    match event {
        InboundEvent::UserRegistered { user_id, .. } => {
            match users.insert_if_absent(user_id).await? {
                InsertOutcome::Inserted => {
                    info!(user_id = %user_id, "已登记注册用户");
                }
                InsertOutcome::AlreadyExists => {
                    debug!(user_id = %user_id, "用户已登记，重复注册事件按无操作处理");
                }
            }
            Ok(Disposition::Completed)
        }
        InboundEvent::PaymentSucceeded { order_id, .. } => {
            settle_order(orders, order_id, OrderStatus::Paid).await
        }
        InboundEvent::PaymentFailed { order_id, .. } => {
            settle_order(orders, order_id, OrderStatus::Failed).await
        }
    }
}

/// 支付结果落到订单状态：Pending 订单做一次受保护转移
///
/// `NotPending` 是至少一次投递的正常代价，静默接受；
/// `NotFound` 说明事件引用了不存在的订单，属于引用不一致，进死信。
async fn settle_order(
    orders: &dyn OrderStatusStore,
    order_id: &str,
    target: OrderStatus,
) -> Result<Disposition, CommerceError> {
    match orders.transition_if_pending(order_id, target).await? {
        TransitionOutcome::Applied => {
            info!(order_id = %order_id, status = %target, "订单状态已更新");
            Ok(Disposition::Completed)
        }
        TransitionOutcome::NotPending => {
            debug!(
                order_id = %order_id,
                "订单已处于终态，重投/乱序事件按无操作处理"
            );
            Ok(Disposition::Completed)
        }
        TransitionOutcome::NotFound => Ok(Disposition::DeadLetter {
            reason: format!("Order {order_id} not found"),
        }),
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
