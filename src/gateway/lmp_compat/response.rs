//! 响应格式转换
//!
//! 私有 API 响应 → `OpenAI` Chat Completions 响应
//!
//! 主要转换：
//! - `responseMessage` → choices[0] 的 message/delta 内容
//! - 合成上游不提供的 id、时间戳与 usage 统计

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 固定的模型标签
pub const MODEL_LABEL: &str = "deepseek-chat";

/// 固定的系统指纹
pub const SYSTEM_FINGERPRINT: &str = "fp_8802369eaa_prod0425fp8";

/// prompt tokens 占位常量
///
/// 网关不对输入做真实分词，usage 中的 `prompt_tokens` 始终是这个占位值
pub const PROMPT_TOKENS_PLACEHOLDER: u32 = 13;

/// 私有 API 的响应对象
///
/// 非流式模式下是完整响应体，流式模式下是单个事件帧，两者结构相同
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LmpReply {
    pub success: bool,
    pub code: i64,
    pub error_message: Option<String>,
    pub error_detail: Option<String>,
    pub request_id: Option<String>,
    pub response_id: Option<String>,
    pub response_message: String,
    pub data: Value,
}

/// 一次响应的会话上下文
///
/// 流式响应的所有 chunk 共享同一个 id 与时间戳。
/// 生命周期为单次请求，从不持久化或跨请求复用。
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub id: String,
    pub created: i64,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created: Utc::now().timestamp(),
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// `OpenAI` 格式的响应信封
///
/// 非流式响应与流式 chunk 共用同一结构：非流式携带 message 与 usage，
/// chunk 只携带 delta，usage 字段整体省略
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: &'static str,
    pub system_fingerprint: &'static str,
    pub choices: Vec<Choice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<AssistantMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<Delta>,
    /// 网关不透传 logprobs，始终为 null
    pub logprobs: Option<String>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Delta {
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub prompt_tokens_details: PromptTokensDetails,
    pub prompt_cache_hit_tokens: u32,
    pub prompt_cache_miss_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptTokensDetails {
    pub cached_tokens: u32,
}

/// 合成 usage 统计
///
/// 上游不返回 token 计数：`prompt_tokens` 取固定占位值，
/// `completion_tokens` 按空格切分响应文本计数（空字符串计 1），
/// 是刻意的粗略近似，不是真实分词。缓存命中恒为 0，未命中等于占位值。
pub fn synthesize_usage(response_message: &str) -> Usage {
    let completion_tokens = response_message.split(' ').count() as u32;
    Usage {
        prompt_tokens: PROMPT_TOKENS_PLACEHOLDER,
        completion_tokens,
        total_tokens: PROMPT_TOKENS_PLACEHOLDER + completion_tokens,
        prompt_tokens_details: PromptTokensDetails { cached_tokens: 0 },
        prompt_cache_hit_tokens: 0,
        prompt_cache_miss_tokens: PROMPT_TOKENS_PLACEHOLDER,
    }
}

/// 私有 API 完整响应 → `OpenAI` 非流式响应
///
/// 单个 choice，`finish_reason` 固定为 stop，内容原样透传
pub fn lmp_reply_to_completion(reply: &LmpReply, session: &SessionContext) -> ChatCompletion {
    ChatCompletion {
        id: session.id.clone(),
        object: "chat.completion",
        created: session.created,
        model: MODEL_LABEL,
        system_fingerprint: SYSTEM_FINGERPRINT,
        choices: vec![Choice {
            index: 0,
            message: Some(AssistantMessage {
                role: "assistant",
                content: reply.response_message.clone(),
            }),
            delta: None,
            logprobs: None,
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(synthesize_usage(&reply.response_message)),
    }
}

/// 私有 API 单帧 → `OpenAI` 流式 chunk
///
/// 只携带增量内容，id 与时间戳来自共享的会话上下文，不携带 usage
pub fn lmp_frame_to_chunk(frame: &LmpReply, session: &SessionContext) -> ChatCompletion {
    ChatCompletion {
        id: session.id.clone(),
        object: "chat.completion.chunk",
        created: session.created,
        model: MODEL_LABEL,
        system_fingerprint: SYSTEM_FINGERPRINT,
        choices: vec![Choice {
            index: 0,
            message: None,
            delta: Some(Delta {
                content: frame.response_message.clone(),
            }),
            logprobs: None,
            finish_reason: None,
        }],
        usage: None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn reply_with(text: &str) -> LmpReply {
        LmpReply {
            success: true,
            code: 0,
            response_message: text.to_string(),
            ..LmpReply::default()
        }
    }

    /// 测试 `completion_tokens` 等于空格切分计数，total 为占位值加计数
    #[test]
    fn test_usage_synthesis_space_split() {
        let usage = synthesize_usage("你好 world foo");
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(usage.total_tokens, PROMPT_TOKENS_PLACEHOLDER + 3);
        assert_eq!(usage.prompt_tokens, PROMPT_TOKENS_PLACEHOLDER);
        assert_eq!(usage.prompt_cache_hit_tokens, 0);
        assert_eq!(usage.prompt_cache_miss_tokens, PROMPT_TOKENS_PLACEHOLDER);
    }

    /// 测试空字符串按切分语义计 1 个 token
    #[test]
    fn test_usage_synthesis_empty_string_counts_one() {
        let usage = synthesize_usage("");
        assert_eq!(usage.completion_tokens, 1);
        assert_eq!(usage.total_tokens, PROMPT_TOKENS_PLACEHOLDER + 1);
    }

    /// 测试非流式响应的信封形态
    #[test]
    fn test_buffered_completion_shape() {
        let session = SessionContext::new();
        let completion = lmp_reply_to_completion(&reply_with("答案是 42"), &session);

        assert_eq!(completion.object, "chat.completion");
        assert_eq!(completion.id, session.id);
        assert_eq!(completion.created, session.created);
        assert_eq!(completion.model, MODEL_LABEL);
        assert_eq!(completion.choices.len(), 1);

        let choice = &completion.choices[0];
        assert_eq!(choice.index, 0);
        assert_eq!(choice.finish_reason.as_deref(), Some("stop"));
        let message = choice.message.as_ref().unwrap();
        assert_eq!(message.role, "assistant");
        assert_eq!(message.content, "答案是 42");
        assert!(choice.delta.is_none());
        assert!(completion.usage.is_some());
    }

    /// 测试非流式 JSON 携带 usage 与 null logprobs
    #[test]
    fn test_buffered_json_carries_usage() {
        let session = SessionContext::new();
        let completion = lmp_reply_to_completion(&reply_with("a b"), &session);
        let json = serde_json::to_value(&completion).unwrap();

        assert_eq!(json["usage"]["completion_tokens"], 2);
        assert_eq!(json["usage"]["prompt_tokens_details"]["cached_tokens"], 0);
        assert!(json["choices"][0]["logprobs"].is_null());
        assert!(json["choices"][0].get("delta").is_none());
    }

    /// 测试 chunk 只携带 delta，JSON 中没有 usage 键
    #[test]
    fn test_chunk_json_omits_usage() {
        let session = SessionContext::new();
        let chunk = lmp_frame_to_chunk(&reply_with("增量"), &session);
        let json = serde_json::to_value(&chunk).unwrap();

        assert_eq!(json["object"], "chat.completion.chunk");
        assert_eq!(json["choices"][0]["delta"]["content"], "增量");
        assert!(json["choices"][0].get("message").is_none());
        assert!(json["choices"][0]["finish_reason"].is_null());
        assert!(json.get("usage").is_none());
    }

    /// 测试私有 API 响应的字段解析（camelCase，缺省字段容忍）
    #[test]
    fn test_lmp_reply_deserialization() {
        let reply: LmpReply = serde_json::from_str(
            r#"{"success":true,"code":0,"errorMessage":null,"responseId":"r-1","responseMessage":"片段","data":{}}"#,
        )
        .unwrap();
        assert!(reply.success);
        assert_eq!(reply.response_id.as_deref(), Some("r-1"));
        assert_eq!(reply.response_message, "片段");

        // 缺省所有字段也能解析
        let empty: LmpReply = serde_json::from_str("{}").unwrap();
        assert!(!empty.success);
        assert_eq!(empty.response_message, "");
    }

    /// 测试会话上下文每次生成都是全新 id
    #[test]
    fn test_session_context_unique_ids() {
        let a = SessionContext::new();
        let b = SessionContext::new();
        assert_ne!(a.id, b.id);
    }
}
