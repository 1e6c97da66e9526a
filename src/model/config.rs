use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 指标 worker 配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// 是否启用后台指标计算
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// 是否订阅日志目录的文件系统通知
    #[serde(default = "default_true")]
    pub watch: bool,
    /// 对账扫描间隔（秒）
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// 跨记录并发上限
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    30
}

fn default_max_concurrency() -> usize {
    4
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch: true,
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// 上游 API 基础地址
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// 注入上游请求的凭据（必填）
    #[serde(default)]
    pub api_key: Option<String>,

    /// 凭据注入方式（"x-api-key" 或 "bearer"）
    #[serde(default = "default_auth_type")]
    pub auth_type: String,

    /// 交互记录目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Dashboard API 密钥（可选，未配置时不挂载 /api/logs）
    #[serde(default)]
    pub admin_api_key: Option<String>,

    /// HTTP 代理地址（可选）
    /// 支持格式: http://host:port, https://host:port, socks5://host:port
    #[serde(default)]
    pub proxy_url: Option<String>,

    /// 外部 count_tokens API 地址（可选）
    #[serde(default)]
    pub count_tokens_api_url: Option<String>,

    /// count_tokens API 密钥（可选）
    #[serde(default)]
    pub count_tokens_api_key: Option<String>,

    /// count_tokens API 认证类型（"x-api-key" 或 "bearer"）
    #[serde(default = "default_auth_type")]
    pub count_tokens_auth_type: String,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// 配置文件路径（运行时元数据，不写入 JSON）
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_upstream_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_auth_type() -> String {
    "x-api-key".to_string()
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            upstream_url: default_upstream_url(),
            api_key: None,
            auth_type: default_auth_type(),
            log_dir: default_log_dir(),
            admin_api_key: None,
            proxy_url: None,
            count_tokens_api_url: None,
            count_tokens_api_key: None,
            count_tokens_auth_type: default_auth_type(),
            metrics: MetricsConfig::default(),
            config_path: None,
        }
    }
}

impl Config {
    /// 获取默认配置文件路径
    pub fn default_config_path() -> &'static str {
        "config.json"
    }

    /// 从文件加载配置
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            // 配置文件不存在，返回默认配置（validate 会拒绝缺少凭据的配置）
            let mut config = Self::default();
            config.config_path = Some(path.to_path_buf());
            return Ok(config);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
        let mut config: Config = serde_json::from_str(&content)
            .with_context(|| format!("解析配置文件失败: {}", path.display()))?;
        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// 启动前校验；缺少上游凭据时拒绝启动
    pub fn validate(&self) -> anyhow::Result<()> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {}
            _ => anyhow::bail!("配置文件中未设置 apiKey"),
        }

        let upstream = reqwest::Url::parse(&self.upstream_url)
            .with_context(|| format!("upstreamUrl 无效: {}", self.upstream_url))?;
        if !matches!(upstream.scheme(), "http" | "https") {
            anyhow::bail!("upstreamUrl 仅支持 http/https: {}", self.upstream_url);
        }

        for (name, value) in [
            ("authType", &self.auth_type),
            ("countTokensAuthType", &self.count_tokens_auth_type),
        ] {
            if !is_supported_auth_type(value) {
                anyhow::bail!("{} 仅支持 \"x-api-key\" 或 \"bearer\"，当前为 {}", name, value);
            }
        }

        if self.metrics.poll_interval_secs == 0 {
            anyhow::bail!("metrics.pollIntervalSecs 必须大于 0");
        }

        Ok(())
    }

    /// 上游凭据（validate 通过后必定存在）
    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    /// 是否以 Bearer 方式注入凭据
    pub fn uses_bearer(&self) -> bool {
        self.auth_type.eq_ignore_ascii_case("bearer")
    }
}

fn is_supported_auth_type(value: &str) -> bool {
    value.eq_ignore_ascii_case("x-api-key") || value.eq_ignore_ascii_case("bearer")
}
