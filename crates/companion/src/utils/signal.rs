use std::io;

use tracing::{info, warn};

/// 等待 Ctrl-C 或 SIGTERM
pub async fn terminate() {
    let ctrl_c = async {
        settle("Ctrl-C", tokio::signal::ctrl_c().await).await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => settle("SIGTERM", Err(e)).await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("收到退出信号，开始优雅关闭");
}

/// 注册失败的信号永远不会触发，不能让服务随之退出
async fn settle(name: &str, result: io::Result<()>) {
    if let Err(e) = result {
        warn!("注册 {} 信号处理失败: {}", name, e);
        std::future::pending::<()>().await;
    }
}
