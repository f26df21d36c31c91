//! 事件信封编解码
//!
//! 将 broker 送达的原始字节负载解码为类型化的入站事件。
//! 解码器是严格的：负载必须是结构良好的 JSON 对象，单引号伪 JSON
//! 之类的"可修复"输入一律按解析失败处理，不做启发式修补。
//!
//! 解析失败与验证失败（必需字段缺失或为空）是两类不同的错误，
//! 各自携带不同的死信原因。本模块无任何副作用。

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::TopicsConfig;

// ---------------------------------------------------------------------------
// SourceTopic — 上游 topic 的封闭枚举
// ---------------------------------------------------------------------------

/// 协调器消费的三个上游 topic
///
/// 用封闭枚举而非字符串分支做分发：新增 topic 必须新增变体，
/// 漏写处理分支会在编译期暴露。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTopic {
    UserRegistration,
    PaymentSuccess,
    PaymentFailure,
}

impl SourceTopic {
    /// 将消息携带的 topic 名解析为已知变体
    ///
    /// 返回 None 表示该 topic 不在订阅范围内（通常意味着部署配置有误）。
    pub fn resolve(name: &str, topics: &TopicsConfig) -> Option<Self> {
        if name == topics.user_registration {
            Some(Self::UserRegistration)
        } else if name == topics.payment_success {
            Some(Self::PaymentSuccess)
        } else if name == topics.payment_failure {
            Some(Self::PaymentFailure)
        } else {
            None
        }
    }

    /// 变体对应的配置中的 topic 名
    pub fn name<'a>(&self, topics: &'a TopicsConfig) -> &'a str {
        match self {
            Self::UserRegistration => &topics.user_registration,
            Self::PaymentSuccess => &topics.payment_success,
            Self::PaymentFailure => &topics.payment_failure,
        }
    }
}

// ---------------------------------------------------------------------------
// DecodeError — 解码失败分类
// ---------------------------------------------------------------------------

/// 解码失败
///
/// `Malformed` 与 `Validation` 都会被路由到死信队列，
/// 但携带不同的原因描述，便于离线排查时区分"格式坏了"和"字段缺了"。
#[derive(Debug, Error)]
pub enum DecodeError {
    /// 负载不是结构良好的 JSON 对象
    #[error("Malformed event payload: {0}")]
    Malformed(String),

    /// 必需字段缺失或为空
    #[error("{0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// InboundEvent — 入站事件联合
// ---------------------------------------------------------------------------

/// 三类已知入站事件的带标签联合
///
/// `extra` 保留负载中除必需键之外的全部字段（金额、网关响应等），
/// 协调器不解释这些字段，仅在转发死信时原样保留。
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    UserRegistered {
        user_id: String,
        extra: Map<String, Value>,
    },
    PaymentSucceeded {
        order_id: String,
        extra: Map<String, Value>,
    },
    PaymentFailed {
        order_id: String,
        extra: Map<String, Value>,
    },
}

impl InboundEvent {
    /// 事件种类名，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserRegistered { .. } => "user_registered",
            Self::PaymentSucceeded { .. } => "payment_succeeded",
            Self::PaymentFailed { .. } => "payment_failed",
        }
    }
}

// 注册事件与支付事件的线格式。必需键缺失时 serde(default) 给出空串，
// 与显式空串走同一条验证失败路径。
#[derive(Deserialize)]
struct RegistrationWire {
    #[serde(default)]
    user_id: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Deserialize)]
struct PaymentWire {
    #[serde(default)]
    order_id: String,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// 按 topic 解码原始负载
///
/// 注册事件要求非空 `user_id`，支付事件要求非空 `order_id`；
/// 验证失败的原因文案与上游服务约定保持一致。
pub fn decode(topic: SourceTopic, payload: &[u8]) -> Result<InboundEvent, DecodeError> {
    match topic {
        SourceTopic::UserRegistration => {
            let wire: RegistrationWire = parse(payload)?;
            if wire.user_id.is_empty() {
                return Err(DecodeError::Validation("User is not valid".to_string()));
            }
            Ok(InboundEvent::UserRegistered {
                user_id: wire.user_id,
                extra: wire.extra,
            })
        }
        SourceTopic::PaymentSuccess => {
            let wire: PaymentWire = parse(payload)?;
            if wire.order_id.is_empty() {
                return Err(DecodeError::Validation("Order ID is not valid".to_string()));
            }
            Ok(InboundEvent::PaymentSucceeded {
                order_id: wire.order_id,
                extra: wire.extra,
            })
        }
        SourceTopic::PaymentFailure => {
            let wire: PaymentWire = parse(payload)?;
            if wire.order_id.is_empty() {
                return Err(DecodeError::Validation("Order ID is not valid".to_string()));
            }
            Ok(InboundEvent::PaymentFailed {
                order_id: wire.order_id,
                extra: wire.extra,
            })
        }
    }
}

fn parse<T: DeserializeOwned>(payload: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn topics() -> TopicsConfig {
        TopicsConfig::default()
    }

    #[test]
    fn test_resolve_known_topics() {
        let t = topics();
        assert_eq!(
            SourceTopic::resolve("commerce.user.registration", &t),
            Some(SourceTopic::UserRegistration)
        );
        assert_eq!(
            SourceTopic::resolve("commerce.payment.success", &t),
            Some(SourceTopic::PaymentSuccess)
        );
        assert_eq!(
            SourceTopic::resolve("commerce.payment.failure", &t),
            Some(SourceTopic::PaymentFailure)
        );
        assert_eq!(SourceTopic::resolve("commerce.unknown", &t), None);
    }

    #[test]
    fn test_topic_name_round_trip() {
        let t = topics();
        for topic in [
            SourceTopic::UserRegistration,
            SourceTopic::PaymentSuccess,
            SourceTopic::PaymentFailure,
        ] {
            assert_eq!(SourceTopic::resolve(topic.name(&t), &t), Some(topic));
        }
    }

    #[test]
    fn test_decode_registration_event() {
        let payload = br#"{"user_id":"u-001","username":"alice","email":"alice@example.com"}"#;
        let event = decode(SourceTopic::UserRegistration, payload).unwrap();

        let InboundEvent::UserRegistered { user_id, extra } = event else {
            panic!("期望 UserRegistered 变体");
        };
        assert_eq!(user_id, "u-001");
        // 必需键之外的字段原样保留
        assert_eq!(extra.get("username").unwrap(), "alice");
        assert_eq!(extra.get("email").unwrap(), "alice@example.com");
    }

    #[test]
    fn test_decode_payment_success_event() {
        let payload = br#"{"order_id":"ord-001","amount":99.5,"gateway_response":"approved"}"#;
        let event = decode(SourceTopic::PaymentSuccess, payload).unwrap();

        let InboundEvent::PaymentSucceeded { order_id, extra } = event else {
            panic!("期望 PaymentSucceeded 变体");
        };
        assert_eq!(order_id, "ord-001");
        assert_eq!(extra.get("amount").unwrap(), 99.5);
        assert_eq!(extra.get("gateway_response").unwrap(), "approved");
    }

    #[test]
    fn test_decode_payment_failure_event() {
        let payload = br#"{"order_id":"ord-002"}"#;
        let event = decode(SourceTopic::PaymentFailure, payload).unwrap();
        assert_eq!(event.kind(), "payment_failed");
    }

    #[test]
    fn test_empty_user_id_is_validation_failure() {
        let payload = br#"{"user_id":""}"#;
        let err = decode(SourceTopic::UserRegistration, payload).unwrap_err();
        assert!(matches!(err, DecodeError::Validation(_)));
        assert_eq!(err.to_string(), "User is not valid");
    }

    #[test]
    fn test_missing_user_id_is_validation_failure() {
        // 键整体缺失与显式空串等价
        let payload = br#"{"username":"bob"}"#;
        let err = decode(SourceTopic::UserRegistration, payload).unwrap_err();
        assert!(matches!(err, DecodeError::Validation(_)));
    }

    #[test]
    fn test_empty_order_id_is_validation_failure() {
        let payload = br#"{"order_id":""}"#;
        let err = decode(SourceTopic::PaymentFailure, payload).unwrap_err();
        assert_eq!(err.to_string(), "Order ID is not valid");
    }

    #[test]
    fn test_single_quoted_payload_fails_closed() {
        // 单引号伪 JSON 不做引号替换之类的修补，一律按解析失败处理
        let payload = br#"{'order_id': 'ord-001'}"#;
        let err = decode(SourceTopic::PaymentSuccess, payload).unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_non_object_payload_is_malformed() {
        let err = decode(SourceTopic::PaymentSuccess, b"[1,2,3]").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));

        let err = decode(SourceTopic::UserRegistration, b"").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
    }
}
