use std::path::PathBuf;

use anyhow::bail;
use time::{Date, OffsetDateTime, UtcOffset};
use tracing_subscriber::EnvFilter;

/// 获取当前时间
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

/// Calendar day of `time` as seen from `offset`.
pub fn local_date(time: OffsetDateTime, offset: UtcOffset) -> Date {
    time.to_offset(offset).date()
}

/// `round(100 * part / whole)`, rounding half up.
///
/// Returns `None` when `whole` is zero: a ratio over nothing has no value, and
/// callers show a placeholder rather than 0%.
pub fn percentage(part: usize, whole: usize) -> Option<u8> {
    if whole == 0 {
        return None;
    }
    let part = part.min(whole) as u64;
    let whole = whole as u64;
    Some(((200 * part + whole) / (2 * whole)) as u8)
}

/// 初始化日志
pub fn init_log(log: Option<PathBuf>) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber_builder = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_names(true);
    let (non_blocking, guard) = if let Some(log) = log {
        // output to file, daily rotate, non-blocking
        if !log.is_dir() {
            bail!("log path {} is not a directory", log.display());
        }
        let file_appender = tracing_appender::rolling::daily(log, "study_server.log");
        tracing_appender::non_blocking(file_appender)
    } else {
        // output to stdout
        tracing_appender::non_blocking(std::io::stdout())
    };
    tracing::subscriber::set_global_default(subscriber_builder.with_writer(non_blocking).finish())
        .map_err(|e| anyhow::anyhow!("init log failed: {}", e))?;
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(2, 3), Some(67));
        assert_eq!(percentage(1, 3), Some(33));
        assert_eq!(percentage(1, 8), Some(13));
        assert_eq!(percentage(2, 4), Some(50));
        assert_eq!(percentage(4, 4), Some(100));
        assert_eq!(percentage(0, 5), Some(0));
    }

    #[test]
    fn percentage_of_nothing_is_undefined() {
        assert_eq!(percentage(0, 0), None);
    }

    #[test]
    fn local_date_crosses_midnight() {
        let t = datetime!(2025-03-01 20:30 UTC);
        assert_eq!(local_date(t, offset!(+9)).to_string(), "2025-03-02");
        assert_eq!(local_date(t, offset!(UTC)).to_string(), "2025-03-01");
    }
}
