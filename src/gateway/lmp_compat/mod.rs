//! `OpenAI` Chat Completions 与私有 API（LMP）格式双向转换
//!
//! 功能：
//! - `OpenAI` 聊天请求 → 私有 API 文本/多模态请求
//! - 私有 API 完整响应 → `OpenAI` 非流式响应（含合成的 usage 统计）
//! - 私有 API 事件流 → `OpenAI` chunk 流（逐帧转发，坏帧跳过）

mod request;
mod response;
mod stream;

pub use request::{ChatRequest, LmpRequest, chat_request_to_lmp};
pub use response::{LmpReply, SessionContext, lmp_reply_to_completion};
pub use stream::{LineFramer, relay_frame_line};
