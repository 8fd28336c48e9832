pub mod signal;

use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub fn init_logger(log_level: &str) {
    // RUST_LOG 优先，否则使用配置的级别并压低依赖库的噪音
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| build_console_filter(log_level));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_timer(ChronoLocal::new("%b %d %H:%M:%S".to_string()))
        .with_target(false)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .try_init()
        .expect("初始化日志失败");
}

/// 构建控制台日志过滤器，降低 sqlx 慢查询等噪音
fn build_console_filter(base_level: &str) -> EnvFilter {
    EnvFilter::builder().parse_lossy(format!(
        "{},\
            sqlx::query=error,\
            sqlx=error,\
            sea_orm::database=error,\
            sea_orm_migration=warn,\
            tower_http=info,\
            hyper=warn,\
            reqwest=warn,\
            h2=warn",
        base_level
    ))
}
