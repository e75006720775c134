//! 聊天补全代理 handler
//!
//! 单个端点完成整条链路：解析 `OpenAI` 请求 → 翻译为私有 API 请求 →
//! 转发 → 按 stream 标志选择整体回译或逐帧转发。
//! 后端调用之前的任何失败都以错误响应返回；流式响应一旦开始写出，
//! 后续错误只会让流提前结束。

use std::{convert::Infallible, sync::Arc};

use async_stream::stream;
use bytes::Bytes;
use futures_util::StreamExt;
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::header::{HeaderName, HeaderValue};
use hyper::{Request as HyperRequest, body::Incoming};
use salvo::{
    http::{Method, ResBody},
    prelude::*,
};

use super::{
    HttpClient,
    error::GatewayError,
    lmp_compat::{self, ChatRequest, LineFramer, LmpReply, SessionContext},
    service::{log_full_body, log_full_response, log_request_headers},
};
use crate::config::Config;

/// 代理请求 handler
#[handler]
pub async fn chat_proxy(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    // 所有响应（含错误响应）都携带CORS头
    set_cors_headers(res);

    // 处理 OPTIONS 预检请求
    if req.method() == Method::OPTIONS {
        res.status_code(StatusCode::OK);
        return;
    }

    // 只接受 POST
    if req.method() != Method::POST {
        res.status_code(StatusCode::METHOD_NOT_ALLOWED);
        res.render("Method not allowed");
        return;
    }

    // 获取配置和 HTTP 客户端
    let Ok(config) = depot.obtain::<Arc<Config>>() else {
        tracing::error!("Config not found in depot");
        res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
        return;
    };
    let Ok(client) = depot.obtain::<Arc<HttpClient>>() else {
        tracing::error!("HttpClient not found in depot");
        res.status_code(StatusCode::INTERNAL_SERVER_ERROR);
        return;
    };

    if let Err(err) = relay_chat(req, config, client, res).await {
        tracing::error!("请求处理失败: {}", err);
        res.status_code(err.status_code());
        res.headers_mut().insert(
            HeaderName::from_static("content-type"),
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        res.body(err.response_body().to_vec());
    }
}

fn set_cors_headers(res: &mut Response) {
    let headers = res.headers_mut();
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

/// 处理一次聊天补全请求：翻译 → 转发 → 回译
async fn relay_chat(
    req: &mut Request,
    config: &Arc<Config>,
    client: &Arc<HttpClient>,
    res: &mut Response,
) -> Result<(), GatewayError> {
    // 记录请求头
    log_request_headers(
        req.method().as_str(),
        req.uri().to_string().as_str(),
        req.headers(),
    );

    // 读取并解析 OpenAI 请求
    let body_bytes = BodyExt::collect(req.body_mut())
        .await
        .map_err(|e| {
            tracing::error!("读取请求体失败: {}", e);
            GatewayError::ReadInboundBody
        })?
        .to_bytes();

    let chat_req: ChatRequest =
        serde_json::from_slice(&body_bytes).map_err(GatewayError::InvalidInboundBody)?;

    // 记录输入消息
    tracing::info!(
        "收到请求消息: {} 条, model={}, stream={}",
        chat_req.messages.len(),
        chat_req.model,
        chat_req.stream
    );
    if config.log_req_body
        && let Ok(body_str) = std::str::from_utf8(&body_bytes)
    {
        log_full_body(body_str);
    }

    // 转换为私有API格式并序列化
    let lmp_req = lmp_compat::chat_request_to_lmp(&chat_req, config)?;
    let lmp_body = serde_json::to_vec(&lmp_req).map_err(GatewayError::SerializeRequest)?;

    // 构建到目标API的请求
    let proxy_req = HyperRequest::builder()
        .method(hyper::Method::POST)
        .uri(config.target_base_url.as_str())
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(lmp_body)))
        .map_err(GatewayError::BuildRequest)?;

    // 使用共享的 HTTP 客户端发送请求
    let backend_resp = client
        .request(proxy_req)
        .await
        .map_err(GatewayError::BackendUnreachable)?;

    let (parts, body) = backend_resp.into_parts();

    // 上游非 200：状态码和响应体原样透传给调用方
    if parts.status != StatusCode::OK {
        let status = parts.status.as_u16();
        tracing::warn!("目标API返回非200状态: {}", status);
        let raw = BodyExt::collect(body)
            .await
            .map_err(GatewayError::ReadBackendBody)?
            .to_bytes();
        return Err(GatewayError::BackendNonSuccessStatus { status, body: raw });
    }

    if chat_req.stream {
        relay_stream(body, res);
        Ok(())
    } else {
        relay_buffered(body, config, res).await
    }
}

/// 非流式转发：整体读取上游响应，回译为一个 JSON 对象
async fn relay_buffered(
    body: Incoming,
    config: &Config,
    res: &mut Response,
) -> Result<(), GatewayError> {
    let body_bytes = BodyExt::collect(body)
        .await
        .map_err(GatewayError::ReadBackendBody)?
        .to_bytes();

    let reply: LmpReply =
        serde_json::from_slice(&body_bytes).map_err(GatewayError::MalformedBackendReply)?;

    // 记录非流式输出消息
    tracing::info!("完整响应消息: {}", reply.response_message);

    let session = SessionContext::new();
    let completion = lmp_compat::lmp_reply_to_completion(&reply, &session);
    let payload = serde_json::to_vec(&completion).map_err(GatewayError::SerializeResponse)?;

    if config.log_res_body
        && let Ok(payload_str) = std::str::from_utf8(&payload)
    {
        log_full_response(payload_str);
    }

    res.status_code(StatusCode::OK);
    res.headers_mut().insert(
        HeaderName::from_static("content-type"),
        HeaderValue::from_static("application/json"),
    );
    res.body(payload);
    Ok(())
}

/// 流式转发：对上游事件流逐帧回译
///
/// 响应头先于第一帧写出，上游迟迟不推送时调用方也能立即看到流开始。
/// 一个上游帧对应一个调用方 chunk，每个 chunk 写出后立即刷新，
/// 读到下一行之前不做任何跨帧缓冲。循环在上游流结束或读取出错时退出，
/// 不向调用方发送终止哨兵，也不把读取错误翻译成结构化错误。
fn relay_stream(body: Incoming, res: &mut Response) {
    res.status_code(StatusCode::OK);
    let headers = res.headers_mut();
    headers.insert(
        HeaderName::from_static("content-type"),
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        HeaderName::from_static("cache-control"),
        HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        HeaderName::from_static("connection"),
        HeaderValue::from_static("keep-alive"),
    );

    // 本次响应所有 chunk 共享的会话上下文
    let session = SessionContext::new();
    tracing::info!("=== SSE 流式响应开始: session={} ===", session.id);

    let mut upstream = BodyStream::new(body);

    let sse = stream! {
        let mut framer = LineFramer::new();
        // 累积完整响应文本，仅用于流结束后的诊断日志
        let mut full_response = String::new();

        loop {
            let data = match upstream.next().await {
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => data,
                    // 非数据帧（trailers）直接忽略
                    Err(_) => continue,
                },
                Some(Err(e)) => {
                    // 读取错误只记录，调用方看到的是流提前结束
                    tracing::error!("SSE流读取过程中发生错误: {}", e);
                    break;
                }
                None => break,
            };

            for line in framer.push(&data) {
                if let Some(event) = lmp_compat::relay_frame_line(&line, &session, &mut full_response) {
                    yield Ok::<Bytes, Infallible>(event);
                }
            }
        }

        if let Some(line) = framer.finish() {
            if let Some(event) = lmp_compat::relay_frame_line(&line, &session, &mut full_response) {
                yield Ok::<Bytes, Infallible>(event);
            }
        }

        // 在流式响应结束时记录完整的消息
        if !full_response.is_empty() {
            tracing::info!("完整流式响应: {}", full_response);
        }
        tracing::info!("SSE代理连接关闭");
    };

    res.body(ResBody::stream(sse));
}
