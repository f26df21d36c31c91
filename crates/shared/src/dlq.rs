//! 死信队列发布
//!
//! 无法处理的事件（负载损坏、字段缺失、引用了不存在的订单）不直接丢弃，
//! 而是连同来源 topic 与失败原因一起转发到死信 topic，供离线排查或回放。
//!
//! 发布端是失败路径的叶子：投递依赖生产者的重试与幂等配置，
//! 重试耗尽后只记录日志并放弃——这是整个系统唯一容忍消息丢失的位置。

use serde_json::{Map, Value};
use tracing::{error, warn};
use uuid::Uuid;

use crate::kafka::KafkaProducer;

// ---------------------------------------------------------------------------
// DeadLetterRecord — 死信记录
// ---------------------------------------------------------------------------

/// 死信记录
///
/// 只写不读：本服务负责追加，消费/回放由离线工具完成。
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    /// 事件原本到达的 topic
    pub source_topic: String,
    /// 人类可读的失败原因
    pub reason: String,
    /// 原始负载字节，原样保留
    pub original_payload: Vec<u8>,
}

impl DeadLetterRecord {
    pub fn new(source_topic: &str, reason: &str, original_payload: &[u8]) -> Self {
        Self {
            source_topic: source_topic.to_string(),
            reason: reason.to_string(),
            original_payload: original_payload.to_vec(),
        }
    }

    /// 生成死信 topic 上的线格式 `{topic, error, ...原始字段}`
    ///
    /// 原始负载若能解析为 JSON 对象，其字段原样并入顶层；
    /// 解析不了（这正是部分事件进入死信的原因）则整体挂在 `payload` 键下。
    /// `topic` 与 `error` 两键以本记录为准，覆盖原始负载中的同名字段。
    pub fn to_value(&self) -> Value {
        let mut fields = match serde_json::from_slice::<Map<String, Value>>(&self.original_payload)
        {
            Ok(fields) => fields,
            Err(_) => {
                let mut fields = Map::new();
                fields.insert(
                    "payload".to_string(),
                    Value::String(String::from_utf8_lossy(&self.original_payload).into_owned()),
                );
                fields
            }
        };

        fields.insert(
            "topic".to_string(),
            Value::String(self.source_topic.clone()),
        );
        fields.insert("error".to_string(), Value::String(self.reason.clone()));

        Value::Object(fields)
    }
}

// ---------------------------------------------------------------------------
// DlqPublisher — 死信发布器
// ---------------------------------------------------------------------------

/// 死信发布器
///
/// 对调用方而言是 fire-and-forget：方法返回即表示这条死信的处置已结束。
/// 内部则会一直等到 broker 确认投递或生产者重试窗口耗尽才返回，
/// 使协调器无法在失败路径尚未落地时继续拉取下一批消息（背压）。
pub struct DlqPublisher {
    producer: KafkaProducer,
    topic: String,
}

impl DlqPublisher {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }

    /// 将一条无法处理的事件写入死信 topic
    ///
    /// 重试与 broker 侧去重由生产者配置保证（固定退避 + 幂等发送），
    /// 最终失败只记录日志，事件被丢弃——没有二级死信队列。
    pub async fn send_to_dead_letter(&self, source_topic: &str, reason: &str, original: &[u8]) {
        let record = DeadLetterRecord::new(source_topic, reason, original);
        let key = Uuid::now_v7().to_string();

        match self
            .producer
            .send_json(&self.topic, &key, &record.to_value())
            .await
        {
            Ok(_) => {
                warn!(source_topic, reason, "事件已写入死信队列");
            }
            Err(e) => {
                error!(
                    source_topic,
                    reason,
                    error = %e,
                    "死信投递在重试耗尽后仍然失败，事件被丢弃"
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
