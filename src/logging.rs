use crate::config::PoolConfig;
use tracing_subscriber::EnvFilter;

/// 日志等级：
/// - off：不初始化日志
/// - low：本 crate 输出 info 及以上（状态迁移、探测结果）
/// - medium：输出 debug（每次选择未命中的原因）
/// - high：输出 trace（候选排序细节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Low = 1,
    Medium = 2,
    High = 3,
}

impl LogLevel {
    pub fn parse(debug: &str) -> Self {
        match debug.trim().to_lowercase().as_str() {
            "low" | "info" => Self::Low,
            "medium" | "debug" => Self::Medium,
            "high" | "all" | "trace" => Self::High,
            _ => Self::Off,
        }
    }

    fn crate_directive(self) -> &'static str {
        match self {
            Self::Off => "client_pool=off",
            Self::Low => "client_pool=info",
            Self::Medium => "client_pool=debug",
            Self::High => "client_pool=trace",
        }
    }
}

/// 初始化全局 tracing（宿主程序调用一次；重复调用无副作用）。
///
/// 依赖库日志默认控制在 warn；本 crate 的级别由 `debug` 配置决定，
/// 且会追加在 RUST_LOG 之后，避免被预设的 RUST_LOG=warn 过滤掉。
pub fn init_tracing(cfg: &PoolConfig) -> LogLevel {
    let level = LogLevel::parse(&cfg.debug);
    let filter = if level == LogLevel::Off {
        EnvFilter::new("off")
    } else {
        let env = std::env::var("RUST_LOG").unwrap_or_default();
        let env = env.trim();
        if env.is_empty() {
            EnvFilter::new(format!("warn,{}", level.crate_directive()))
        } else if env.contains("client_pool") {
            EnvFilter::new(env)
        } else {
            EnvFilter::new(format!("{env},{}", level.crate_directive()))
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init();
    level
}

/// 凭证脱敏：保留首尾少量字符。
pub fn mask_secret(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= 8 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}***{tail}")
}
