//! 订单协调器进程入口
//!
//! 装配配置、数据库连接池、Kafka 生产者/消费者与死信发布器，
//! 然后把控制权交给消费循环，直到收到关闭信号。

use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use commerce_shared::config::{AppConfig, ObservabilityConfig};
use commerce_shared::database::Database;
use commerce_shared::dlq::DlqPublisher;
use commerce_shared::kafka::KafkaProducer;

use order_service::consumer::OrderCoordinator;
use order_service::repository::{OrderRepository, RegisteredUserRepository};

#[tokio::main]
async fn main() -> Result<()> {
    // .env 仅服务于本地开发，生产环境由部署平台注入环境变量
    dotenvy::dotenv().ok();

    let config = AppConfig::load("order-service").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {e}");
        AppConfig::default()
    });

    init_tracing(&config.observability);

    info!("Starting order-coordinator...");
    info!(environment = %config.environment, "Configuration loaded");

    // 数据库连接池：消费循环与各请求处理器共享的有界资源
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    info!("Database connection established");

    let orders = Arc::new(OrderRepository::new(db.pool().clone()));
    let users = Arc::new(RegisteredUserRepository::new(db.pool().clone()));

    // 死信发布器复用同一个幂等生产者
    let producer = KafkaProducer::new(&config.kafka)?;
    let dlq = Arc::new(DlqPublisher::new(
        producer,
        config.topics.dead_letter.clone(),
    ));

    let coordinator = OrderCoordinator::new(&config, orders, users, dlq)?;

    // 关闭信号翻转 watch 通道，消费循环完成在途消息后自然退出
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    coordinator.run(shutdown_rx).await?;

    // 循环已排空，此时关闭连接池不会打断在途操作
    db.close().await;
    info!("order-coordinator exited");
    Ok(())
}

/// 初始化 tracing（环境过滤 + pretty/json 双格式）
fn init_tracing(config: &ObservabilityConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

/// 优雅关闭信号处理
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
