// ==========================================
// 水资源风险监测平台 - 远程请求客户端
// ==========================================
// 职责: JSON 请求 + 瞬时错误重试（指数退避）+ 请求限速
// 规则:
// - 401/403 认证失败不重试
// - 超时 / 连接失败 / 429 / 5xx 重试，耗尽后转为数据源错误
// - 429 优先使用 Retry-After
// ==========================================

use crate::config::settings::{ImportSettings, RetryPolicy};
use crate::domain::task::TaskOptions;
use crate::importer::error::{ImportError, ImportOutcome};
use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, Method, Response};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const ERROR_BODY_PREVIEW: usize = 200;

/// 单个请求描述
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl RequestSpec {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }
}

/// 失败及服务端建议的等待时间
struct Failure {
    error: ImportError,
    retry_after: Option<Duration>,
}

impl From<ImportError> for Failure {
    fn from(error: ImportError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }
}

// ==========================================
// HttpFetcher
// ==========================================
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(settings: &ImportSettings) -> ImportOutcome<Self> {
        let client = Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ImportError::Internal(format!("HTTP 客户端初始化失败: {}", e)))?;

        Ok(Self {
            client,
            retry: settings.retry.clone(),
        })
    }

    /// 全局重试策略 + 任务 options `retry.*` 覆写
    pub fn retry_policy(&self, options: &TaskOptions) -> RetryPolicy {
        let base = &self.retry;
        RetryPolicy {
            max_retries: options
                .get_u32("retry.max_retries")
                .unwrap_or(base.max_retries),
            initial_backoff_ms: options
                .get_u64("retry.initial_backoff_ms")
                .unwrap_or(base.initial_backoff_ms),
            max_backoff_ms: options
                .get_u64("retry.max_backoff_ms")
                .unwrap_or(base.max_backoff_ms),
            multiplier: options
                .get_f64("retry.multiplier")
                .unwrap_or(base.multiplier),
        }
    }

    /// 发送请求并解析 JSON，瞬时错误按策略重试
    pub async fn fetch_json(&self, spec: &RequestSpec, policy: &RetryPolicy) -> ImportOutcome<Value> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.send_once(spec).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(url = %spec.url, attempt, "重试后请求成功");
                    }
                    return Ok(value);
                }
                Err(failure) if failure.error.is_transient() => {
                    if attempt > policy.max_retries {
                        warn!(url = %spec.url, attempts = attempt, error = %failure.error, "重试次数耗尽");
                        return Err(ImportError::RetriesExhausted {
                            attempts: attempt,
                            message: failure.error.to_string(),
                        });
                    }
                    let backoff = policy.backoff_for(attempt);
                    let delay = failure
                        .retry_after
                        .map(|d| d.min(Duration::from_millis(policy.max_backoff_ms)))
                        .unwrap_or(backoff);
                    warn!(
                        url = %spec.url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.error,
                        "远程请求瞬时失败，退避后重试"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }

    async fn send_once(&self, spec: &RequestSpec) -> Result<Value, Failure> {
        let mut builder = self
            .client
            .request(spec.method.clone(), &spec.url)
            .header(ACCEPT, "application/json");
        if !spec.query.is_empty() {
            builder = builder.query(&spec.query);
        }
        for (name, value) in &spec.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &spec.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = spec.timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(ImportError::from)?;
        let status = response.status();
        if status.is_success() {
            return response.json::<Value>().await.map_err(|e| {
                Failure::from(ImportError::Parse(format!("响应不是合法 JSON: {}", e)))
            });
        }

        Err(classify_status(response).await)
    }
}

async fn classify_status(response: Response) -> Failure {
    let status = response.status().as_u16();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = response.text().await.unwrap_or_default();
    let message: String = body.chars().take(ERROR_BODY_PREVIEW).collect();

    let error = match status {
        401 | 403 => ImportError::Authentication { status, message },
        429 => ImportError::RateLimited(message),
        500..=599 => ImportError::ServerUnavailable { status, message },
        _ => ImportError::RemoteStatus { status, message },
    };
    Failure { error, retry_after }
}

// ==========================================
// RateLimiter - 按每分钟请求数均匀限速
// ==========================================
pub struct RateLimiter {
    interval: Option<Duration>,
    last: Option<Instant>,
}

impl RateLimiter {
    /// requests_per_minute 为 None 或 0 时不限速
    pub fn per_minute(requests_per_minute: Option<u64>) -> Self {
        let interval = requests_per_minute
            .filter(|&n| n > 0)
            .map(|n| Duration::from_secs_f64(60.0 / n as f64));
        Self {
            interval,
            last: None,
        }
    }

    pub async fn acquire(&mut self) {
        if let (Some(interval), Some(last)) = (self.interval, self.last) {
            let next = last + interval;
            if next > Instant::now() {
                tokio::time::sleep_until(next).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retry_policy_overrides() {
        let fetcher = HttpFetcher::new(&ImportSettings::default()).unwrap();
        let options = TaskOptions::new(
            json!({"retry": {"max_retries": 0, "initial_backoff_ms": 10}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let policy = fetcher.retry_policy(&options);
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.initial_backoff_ms, 10);
        assert_eq!(policy.max_backoff_ms, RetryPolicy::default().max_backoff_ms);

        let huge = TaskOptions::new(
            json!({"retry": {"max_retries": 4294967296u64}})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(fetcher.retry_policy(&huge).max_retries, u32::MAX);
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_requests() {
        // 600 次/分钟 → 每次间隔 100ms
        let mut limiter = RateLimiter::per_minute(Some(600));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled() {
        let mut limiter = RateLimiter::per_minute(None);
        let start = Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_connection_refused_exhausts_retries() {
        // 绑定后立即释放端口，确保无人监听
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let fetcher = HttpFetcher::new(&ImportSettings::default()).unwrap();
        let policy = RetryPolicy {
            max_retries: 2,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            multiplier: 2.0,
        };
        let err = fetcher
            .fetch_json(&RequestSpec::get(format!("http://{}/data", addr)), &policy)
            .await
            .unwrap_err();
        assert!(
            matches!(err, ImportError::RetriesExhausted { attempts: 3, .. }),
            "实际错误: {:?}",
            err
        );
    }
}
