use std::time::Duration;

use anyhow::{Context, Result};
use companion_migration::{Migrator, MigratorTrait};
use sea_orm::sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions, MySqlSslMode};
use sea_orm::sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sea_orm::{DatabaseConnection, SqlxMySqlConnector, SqlxSqliteConnector};
use tracing::{debug, info};

use crate::config::DatabaseTarget;

/// 创建 SQLite 连接选项
fn create_sqlite_options(path: &std::path::Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30))
}

/// 创建 MySQL 连接选项，强制 TLS 但不校验证书
fn create_mysql_options(
    host: &str,
    port: u16,
    database: &str,
    username: &str,
    password: Option<&str>,
) -> MySqlConnectOptions {
    let options = MySqlConnectOptions::new()
        .host(host)
        .port(port)
        .database(database)
        .username(username)
        .ssl_mode(MySqlSslMode::Required)
        .charset("utf8mb4");
    match password {
        Some(password) => options.password(password),
        None => options,
    }
}

async fn database_connection(target: &DatabaseTarget) -> Result<DatabaseConnection> {
    let connection = match target {
        DatabaseTarget::MySql {
            host,
            port,
            database,
            username,
            password,
        } => {
            let pool = MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(30))
                .idle_timeout(Duration::from_secs(600))
                .connect_with(create_mysql_options(host, *port, database, username, password.as_deref()))
                .await
                .with_context(|| format!("连接 MySQL 失败: {:?}", target))?;
            SqlxMySqlConnector::from_sqlx_mysql_pool(pool)
        }
        DatabaseTarget::Sqlite(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).with_context(|| format!("创建数据库目录失败: {}", parent.display()))?;
            }
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Duration::from_secs(30))
                .connect_with(create_sqlite_options(path))
                .await
                .with_context(|| format!("打开 SQLite 失败: {:?}", target))?;
            SqlxSqliteConnector::from_sqlx_sqlite_pool(pool)
        }
    };
    debug!("数据库连接池已创建: {:?}", target);
    Ok(connection)
}

/// 进行数据库迁移并获取数据库连接
///
/// 整个进程只创建一次，由调用方放入应用上下文共享。
pub async fn setup_database(target: &DatabaseTarget) -> Result<DatabaseConnection> {
    let connection = database_connection(target).await?;
    Migrator::up(&connection, None).await.context("数据库迁移失败")?;
    info!("数据库已就绪: {:?}", target);
    Ok(connection)
}

/// 内存 SQLite，单连接且不回收，供测试使用
#[cfg(test)]
pub async fn memory_database() -> Result<DatabaseConnection> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::new().in_memory(true))
        .await?;
    let connection = SqlxSqliteConnector::from_sqlx_sqlite_pool(pool);
    Migrator::up(&connection, None).await?;
    Ok(connection)
}
