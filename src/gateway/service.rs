//! 请求/响应日志辅助
//!
//! 日志落在共享的 tracing sink 上，每条记录作为整体写出，
//! 多请求并发打印不会互相穿插破坏单条记录。

use http::HeaderMap;
use tracing::{info, warn};

/// 分段打印大字符串，避免日志截断和字符边界 panic
fn log_in_chunks(label: &str, body: &str) {
    const CHUNK_SIZE: usize = 8000;

    let len = body.len();
    info!("=== {} (共 {} 字节) ===", label, len);

    if len <= CHUNK_SIZE {
        info!("{}", body);
    } else {
        let total_chunks = len.div_ceil(CHUNK_SIZE);
        let mut start = 0;

        for i in 0..total_chunks {
            let mut end = (start + CHUNK_SIZE).min(len);

            // 确保结束位置是 UTF-8 字符边界
            while end < len && !body.is_char_boundary(end) {
                end -= 1;
            }

            if let Some(chunk) = body.get(start..end) {
                info!("--- 第 {}/{} 段 ---\n{}", i + 1, total_chunks, chunk);
            } else {
                warn!("无法获取第 {}/{} 段内容", i + 1, total_chunks);
                break;
            }

            start = end;
        }
    }
    info!("=== {} 结束 ===", label);
}

/// 打印完整请求体
pub fn log_full_body(body: &str) {
    log_in_chunks("请求体", body);
}

/// 打印完整响应体
pub fn log_full_response(body: &str) {
    log_in_chunks("响应体", body);
}

/// 打印全部请求头
pub fn log_request_headers(method: &str, uri: &str, headers: &HeaderMap) {
    info!("=== 请求头 ===");
    info!("Method: {}", method);
    info!("URI: {}", uri);

    for (name, value) in headers {
        if let Ok(value_str) = value.to_str() {
            info!("{}: {}", name, value_str);
        }
    }
    info!("=== 请求头结束 ===");
}
