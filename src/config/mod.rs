pub mod format;

use std::{collections::HashMap, env, fs, path::PathBuf, process};

use format::format_toml;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// 私有 API 默认入口地址
const DEFAULT_TARGET_BASE_URL: &str =
    "https://aibrain-large-model.hellobike.cn/AIBrainLmp/api/v1/runLargeModelApplication/run";

/// 网关配置
///
/// 启动时加载一次，之后只读。所有请求通过 `Arc<Config>` 共享同一份实例，
/// 运行期间不再修改。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 私有 API 的基础 URL
    #[serde(default = "default_target_base_url")]
    pub target_base_url: String,
    /// 默认的 AgentID
    #[serde(default)]
    pub default_agent_id: String,
    /// 默认的 SecretKey
    #[serde(default)]
    pub default_secret_key: String,
    /// 服务器监听地址
    #[serde(default = "default_server_address")]
    pub server_address: String,
    /// 模型名称映射：OpenAI 模型名 → 私有 API 服务名
    ///
    /// 不在映射表中的模型名原样透传
    #[serde(default)]
    pub model_map: HashMap<String, String>,
    /// 是否打印请求体
    #[serde(default)]
    pub log_req_body: bool,
    /// 是否打印响应体
    #[serde(default)]
    pub log_res_body: bool,
}

fn default_target_base_url() -> String {
    DEFAULT_TARGET_BASE_URL.to_string()
}

fn default_server_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_base_url: default_target_base_url(),
            default_agent_id: String::new(),
            default_secret_key: String::new(),
            server_address: default_server_address(),
            model_map: HashMap::new(),
            log_req_body: false,
            log_res_body: false,
        }
    }
}

impl Config {
    /// 初始化配置，从指定路径或默认路径加载
    ///
    /// 配置文件不存在时写出一份格式化的默认配置，方便填写后重启。
    /// 加载或解析失败时直接退出进程。
    pub fn init() -> Self {
        let config_path = env::args()
            .nth(1)
            .map_or_else(|| PathBuf::from("config.toml"), PathBuf::from);

        info!("📂 正在加载配置文件: {:?}", config_path);

        if config_path.exists() {
            // 格式化TOML并写回文件
            let raw_content = fs::read_to_string(&config_path).unwrap_or_default();
            let formatted_content = format_toml(&raw_content);
            if let Err(e) = fs::write(&config_path, formatted_content) {
                warn!("写入格式化配置失败: {}", e);
            }
        } else {
            match toml::to_string_pretty(&Self::default()) {
                Ok(content) => {
                    if let Err(e) = fs::write(&config_path, format_toml(&content)) {
                        warn!("写入默认配置失败: {}", e);
                    } else {
                        info!("已生成默认配置文件: {:?}", config_path);
                    }
                }
                Err(e) => warn!("序列化默认配置失败: {}", e),
            }
        }

        let config = Self::load_from_file(&config_path).unwrap_or_else(|e| {
            warn!("⚠️  配置加载失败: {}，退出中", e);
            process::exit(1); // 非零退出码表示异常退出
        });

        info!("✅ 配置已加载:");
        info!("target_base_url: {}", config.target_base_url);
        info!("server_address: {}", config.server_address);
        info!(
            "default_agent_id: {}***",
            config.default_agent_id.chars().take(8).collect::<String>()
        );
        info!("model_map: {} 条映射", config.model_map.len());
        for (model, service) in &config.model_map {
            info!("  {} -> {}", model, service);
        }
        info!("log_req_body: {}", config.log_req_body);
        info!("log_res_body: {}", config.log_res_body);

        config
    }

    /// 从文件加载配置
    fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read config file: {e}"))?;

        let config: Self =
            toml::from_str(&content).map_err(|e| format!("Failed to parse TOML: {e}"))?;

        Ok(config)
    }
}
