//! 请求格式转换
//!
//! `OpenAI` Chat Completions 请求 → 私有 API 请求
//!
//! 主要转换：
//! - content 字符串/数组 → 统一的内容项数组
//! - model → `serviceName`（经配置中的映射表）
//! - 含图片内容时选择多模态请求形态

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::gateway::error::GatewayError;

/// 图片内容项的判别标记
const IMAGE_PART_TYPE: &str = "input_image";

/// `OpenAI` 格式的聊天请求
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
}

/// `OpenAI` 格式的单条消息
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

/// 消息内容的多态形态
///
/// content 字段可以是纯字符串，也可以是内容项数组。其余任何 JSON 形态
/// （数字、null、结构不完整的数组等）都会落入 `Other`，在翻译阶段报
/// `UnsupportedContentFormat`，而不是在反序列化时直接失败。
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// 纯文本
    Text(String),
    /// 结构化内容项数组
    Parts(Vec<ContentPart>),
    /// 无法识别的形态
    Other(Value),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Other(Value::Null)
    }
}

/// 内容项数组中的单个元素，`type` 为必填判别字段
#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub part_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<ImageUrl>,
}

/// 图片引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// 私有 API 的单条消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LmpMessage {
    pub role: String,
    pub content: Vec<LmpContentItem>,
}

/// 私有 API 的内容项
///
/// text 与 `image_url` 二选一，与 `type` 保持一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum LmpContentItem {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "input_image")]
    Image { image_url: ImageUrl },
}

/// 私有 API 文本请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LmpTextRequest {
    pub agent_id: String,
    pub secret_key: String,
    pub service_name: String,
    pub messages: Vec<LmpMessage>,
    pub stream: bool,
}

/// 私有 API 多模态请求
///
/// 字段与文本请求一致，形态区分只服务于上游路由
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LmpMultiModalRequest {
    pub agent_id: String,
    pub secret_key: String,
    pub service_name: String,
    pub stream: bool,
    pub messages: Vec<LmpMessage>,
}

/// 私有 API 请求，按是否含图片二选一
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LmpRequest {
    Text(LmpTextRequest),
    MultiModal(LmpMultiModalRequest),
}

impl LmpRequest {
    pub const fn is_multi_modal(&self) -> bool {
        matches!(self, Self::MultiModal(_))
    }

    pub fn messages(&self) -> &[LmpMessage] {
        match self {
            Self::Text(req) => &req.messages,
            Self::MultiModal(req) => &req.messages,
        }
    }
}

/// 归一化单条消息的 content 字段
///
/// - 字符串 → 单个文本项
/// - 数组 → 逐项转换；`input_image` 必须携带 `image_url`，
///   其余类型取 text 字段，缺失时按空文本处理
/// - 其他形态 → `UnsupportedContentFormat`
///
/// 纯转换，无副作用
pub fn normalize_content(content: &MessageContent) -> Result<Vec<LmpContentItem>, GatewayError> {
    match content {
        MessageContent::Text(text) => Ok(vec![LmpContentItem::Text { text: text.clone() }]),
        MessageContent::Parts(parts) => parts.iter().map(normalize_part).collect(),
        MessageContent::Other(_) => Err(GatewayError::UnsupportedContentFormat),
    }
}

fn normalize_part(part: &ContentPart) -> Result<LmpContentItem, GatewayError> {
    if part.part_type == IMAGE_PART_TYPE {
        let image_url = part
            .image_url
            .clone()
            .ok_or(GatewayError::UnsupportedContentFormat)?;
        Ok(LmpContentItem::Image { image_url })
    } else {
        Ok(LmpContentItem::Text {
            text: part.text.clone().unwrap_or_default(),
        })
    }
}

/// 判断归一化后的消息列表是否包含图片内容项，命中即返回
pub fn has_image_content(messages: &[LmpMessage]) -> bool {
    messages.iter().any(|message| {
        message
            .content
            .iter()
            .any(|item| matches!(item, LmpContentItem::Image { .. }))
    })
}

/// `OpenAI` 请求 → 私有 API 请求
///
/// 消息顺序与角色原样保留，不做任何重排或合并；
/// 首条消息归一化失败立即中止，不产生部分结果
pub fn chat_request_to_lmp(
    chat_req: &ChatRequest,
    config: &Config,
) -> Result<LmpRequest, GatewayError> {
    // 模型名在映射表中则使用映射后的服务名，否则原样透传
    let service_name = config
        .model_map
        .get(&chat_req.model)
        .cloned()
        .unwrap_or_else(|| chat_req.model.clone());

    if chat_req.messages.is_empty() {
        return Err(GatewayError::EmptyMessageList);
    }

    let messages = chat_req
        .messages
        .iter()
        .map(|message| {
            Ok(LmpMessage {
                role: message.role.clone(),
                content: normalize_content(&message.content)?,
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;

    let request = if has_image_content(&messages) {
        LmpRequest::MultiModal(LmpMultiModalRequest {
            agent_id: config.default_agent_id.clone(),
            secret_key: config.default_secret_key.clone(),
            service_name,
            stream: chat_req.stream,
            messages,
        })
    } else {
        LmpRequest::Text(LmpTextRequest {
            agent_id: config.default_agent_id.clone(),
            secret_key: config.default_secret_key.clone(),
            service_name,
            messages,
            stream: chat_req.stream,
        })
    };

    Ok(request)
}
