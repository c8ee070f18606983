// ==========================================
// 日志系统初始化
// ==========================================
// 使用 tracing 和 tracing-subscriber
// 支持环境变量配置日志级别与输出格式
// ==========================================

use tracing_subscriber::{fmt, EnvFilter};

/// 备用日志级别环境变量（RUST_LOG 未设置时生效）
pub const LOG_ENV: &str = "WATER_RISK_LOG";

/// 设为 1 时输出 JSON 行日志
pub const LOG_JSON_ENV: &str = "WATER_RISK_LOG_JSON";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_from_env(LOG_ENV))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 初始化日志系统
///
/// # 环境变量
/// - RUST_LOG: 日志级别过滤器（默认: info）
///   例如: RUST_LOG=debug 或 RUST_LOG=water_risk_import=trace
/// - WATER_RISK_LOG: RUST_LOG 缺省时的过滤器
/// - WATER_RISK_LOG_JSON=1: JSON 格式输出
///
/// # 示例
/// ```no_run
/// use water_risk_import::logging;
/// logging::init();
/// ```
pub fn init() {
    let json = std::env::var(LOG_JSON_ENV)
        .map(|v| v.trim() == "1")
        .unwrap_or(false);

    // 日志写 stderr，stdout 留给结果输出
    let builder = fmt()
        .with_env_filter(env_filter())
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// 测试用日志（可重复调用）
///
/// 默认 debug 级别，RUST_LOG 可覆盖；输出交给测试框架捕获
pub fn init_test() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
