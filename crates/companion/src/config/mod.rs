use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

/// 服务启动参数，全部支持通过环境变量设置
#[derive(Clone, Parser)]
#[command(name = "companion-rs", version, about = "AI 陪伴聊天服务")]
pub struct Config {
    /// HTTP 监听地址
    #[arg(long, env = "COMPANION_BIND", default_value = "0.0.0.0:3001")]
    pub bind: String,

    /// MySQL 主机；未设置时使用本地 SQLite
    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    #[arg(long, env = "DB_PORT", default_value_t = 3306)]
    pub db_port: u16,

    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    #[arg(long, env = "DB_USER")]
    pub db_user: Option<String>,

    #[arg(long, env = "DB_PASS", hide_env_values = true)]
    pub db_pass: Option<String>,

    /// 未配置 MySQL 时使用的 SQLite 文件
    #[arg(long, env = "COMPANION_SQLITE_PATH", default_value = "companion.sqlite")]
    pub sqlite_path: PathBuf,

    /// 模型服务的 API Key
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// OpenAI 兼容接口的 base url
    #[arg(long, env = "COMPLETION_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub api_base_url: String,

    /// 生成回复使用的模型
    #[arg(long, env = "REPLY_MODEL", default_value = "gpt-4o")]
    pub reply_model: String,

    /// 情绪分类使用的模型
    #[arg(long, env = "MOOD_MODEL", default_value = "gpt-4o-mini")]
    pub mood_model: String,

    /// 单次模型请求超时（秒）
    #[arg(long, env = "COMPLETION_TIMEOUT_SECS", default_value_t = 60)]
    pub completion_timeout: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// 同一会话的请求串行处理，默认关闭
    #[arg(
        long,
        env = "COMPANION_SERIALIZE_SESSIONS",
        default_value_t = false,
        action = clap::ArgAction::Set
    )]
    pub serialize_sessions: bool,
}

/// 数据库连接目标
#[derive(Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// 远程 MySQL，始终启用 TLS
    MySql {
        host: String,
        port: u16,
        database: String,
        username: String,
        password: Option<String>,
    },
    Sqlite(PathBuf),
}

impl fmt::Debug for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseTarget::MySql {
                host,
                port,
                database,
                username,
                ..
            } => write!(f, "mysql://{}@{}:{}/{}", username, host, port, database),
            DatabaseTarget::Sqlite(path) => write!(f, "sqlite://{}", path.display()),
        }
    }
}

impl Config {
    /// 根据环境决定连接 MySQL 还是本地 SQLite
    pub fn database_target(&self) -> Result<DatabaseTarget> {
        let Some(host) = self.db_host.as_deref().filter(|h| !h.trim().is_empty()) else {
            return Ok(DatabaseTarget::Sqlite(self.sqlite_path.clone()));
        };
        let database = self
            .db_name
            .clone()
            .ok_or_else(|| anyhow!("已设置 DB_HOST 但缺少 DB_NAME"))?;
        let username = self
            .db_user
            .clone()
            .ok_or_else(|| anyhow!("已设置 DB_HOST 但缺少 DB_USER"))?;
        Ok(DatabaseTarget::MySql {
            host: host.trim().to_string(),
            port: self.db_port,
            database,
            username,
            password: self.db_pass.clone(),
        })
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout.max(1))
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind", &self.bind)
            .field("database", &self.database_target().ok())
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("api_base_url", &self.api_base_url)
            .field("reply_model", &self.reply_model)
            .field("mood_model", &self.mood_model)
            .field("completion_timeout", &self.completion_timeout)
            .field("log_level", &self.log_level)
            .field("serialize_sessions", &self.serialize_sessions)
            .finish()
    }
}
