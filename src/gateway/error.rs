//! 网关错误分类
//!
//! 后端调用前的错误都可以本地恢复：直接返回错误响应，不产生副作用。
//! 流式响应一旦写出第一个字节，错误只能以流中断的形式体现。

use bytes::Bytes;
use salvo::http::StatusCode;
use thiserror::Error;

/// 请求处理过程中的错误
///
/// 每个变体对应一个固定的 HTTP 状态码，上游非 200 响应则原样透传
/// 状态码和响应体。
#[derive(Debug, Error)]
pub enum GatewayError {
    /// 读取请求体失败
    #[error("无法读取请求")]
    ReadInboundBody,
    /// 请求体不是合法的 JSON
    #[error("无效的请求格式")]
    InvalidInboundBody(#[source] serde_json::Error),
    /// 消息内容既不是字符串也不是可识别的内容项数组
    #[error("不支持的消息内容格式")]
    UnsupportedContentFormat,
    /// messages 数组为空
    #[error("输入内容为空")]
    EmptyMessageList,
    /// 序列化私有 API 请求失败
    #[error("内部服务器错误")]
    SerializeRequest(#[source] serde_json::Error),
    /// 构建上游请求失败
    #[error("内部服务器错误")]
    BuildRequest(#[source] http::Error),
    /// 连接上游失败
    #[error("连接到目标服务失败")]
    BackendUnreachable(#[source] hyper_util::client::legacy::Error),
    /// 上游返回非 200 状态，状态码和响应体原样透传给调用方
    #[error("目标返回状态 {status}")]
    BackendNonSuccessStatus { status: u16, body: Bytes },
    /// 读取上游响应体失败
    #[error("内部服务器错误")]
    ReadBackendBody(#[source] hyper::Error),
    /// 上游响应体不是合法的 JSON
    #[error("解析响应失败")]
    MalformedBackendReply(#[source] serde_json::Error),
    /// 序列化调用方响应失败
    #[error("内部服务器错误")]
    SerializeResponse(#[source] serde_json::Error),
}

impl GatewayError {
    /// 错误对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ReadInboundBody
            | Self::InvalidInboundBody(_)
            | Self::UnsupportedContentFormat
            | Self::EmptyMessageList => StatusCode::BAD_REQUEST,
            Self::BackendUnreachable(_) => StatusCode::BAD_GATEWAY,
            Self::BackendNonSuccessStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::SerializeRequest(_)
            | Self::BuildRequest(_)
            | Self::ReadBackendBody(_)
            | Self::MalformedBackendReply(_)
            | Self::SerializeResponse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 返回给调用方的纯文本响应体
    ///
    /// 上游非 200 时透传上游原始响应体，其余情况使用错误描述
    pub fn response_body(&self) -> Bytes {
        match self {
            Self::BackendNonSuccessStatus { body, .. } => body.clone(),
            other => Bytes::from(other.to_string()),
        }
    }
}
