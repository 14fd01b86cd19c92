//! 日志系统配置模块
//! 支持结构化日志（json/text）和按天轮转的文件日志

use std::path::Path;

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "disperse.log";

/// 初始化日志系统
///
/// 开启文件日志时返回后台写线程的 guard，调用方需持有到进程退出，
/// 否则缓冲中的日志会丢失。
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let json = config.format == "json";

    if !config.enable_file_logging {
        // 仅控制台日志（stderr，stdout 留给摘要输出）
        if json {
            Registry::default()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_timer(ChronoUtc::rfc_3339()),
                )
                .try_init()?;
        } else {
            Registry::default()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_ansi(true),
                )
                .try_init()?;
        }
        return Ok(None);
    }

    let log_dir = log_dir(config);
    std::fs::create_dir_all(log_dir)?;

    let file_appender = rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = non_blocking(file_appender);

    if json {
        Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(writer)
                    .with_timer(ChronoUtc::rfc_3339()),
            )
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_timer(ChronoUtc::rfc_3339()),
            )
            .try_init()?;
    } else {
        Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(writer)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false),
            )
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(true),
            )
            .try_init()?;
    }

    Ok(Some(guard))
}

fn log_dir(config: &LoggingConfig) -> &Path {
    config
        .log_file_path
        .as_deref()
        .and_then(|p| Path::new(p).parent())
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("./logs"))
}
