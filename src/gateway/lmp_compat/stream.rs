//! 上游事件流的行级切分与逐帧转发
//!
//! 上游按 `data:` 前缀的行推送事件，传输层的分片边界与行边界无关。
//! 这里先按换行符重组出完整的行，再逐行解析转发：
//! 一个上游帧对应一个调用方可见的 chunk，顺序与上游到达顺序一致。

use bytes::Bytes;

use super::response::{LmpReply, SessionContext, lmp_frame_to_chunk};

/// 数据帧的行前缀
const DATA_PREFIX: &str = "data:";

/// 跨分片的行缓冲
///
/// 追加字节后弹出其中完整的行，未完结的尾部留在缓冲中等待后续分片
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一段字节，返回其中所有完整的行（不含行结束符）
    pub fn push(&mut self, data: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// 流结束时取出缓冲中没有换行符的最后一行
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer).into_owned();
        self.buffer.clear();
        Some(line)
    }
}

/// 解析上游流中的一行
///
/// - 空行与无 `data:` 前缀的行（注释、心跳）直接忽略
/// - data 行解析失败时记录日志并跳过该帧，不中断整个流
pub fn parse_stream_frame(line: &str) -> Option<LmpReply> {
    if line.is_empty() {
        return None;
    }
    let payload = line.strip_prefix(DATA_PREFIX)?;
    match serde_json::from_str::<LmpReply>(payload) {
        Ok(frame) => Some(frame),
        Err(e) => {
            tracing::warn!("解析私有API响应失败: {}", e);
            None
        }
    }
}

/// 将上游的一行转换为一个调用方可见的 SSE 事件
///
/// 帧文本追加到 `full_response` 累积器（只用于流结束后的诊断日志）。
/// 返回 `None` 表示该行被跳过：空行、非 data 行、坏帧或序列化失败。
pub fn relay_frame_line(
    line: &str,
    session: &SessionContext,
    full_response: &mut String,
) -> Option<Bytes> {
    let frame = parse_stream_frame(line)?;
    full_response.push_str(&frame.response_message);

    let chunk = lmp_frame_to_chunk(&frame, session);
    match serde_json::to_vec(&chunk) {
        Ok(json) => {
            let mut event = Vec::with_capacity(json.len() + 8);
            event.extend_from_slice(b"data: ");
            event.extend_from_slice(&json);
            event.extend_from_slice(b"\n\n");
            Some(Bytes::from(event))
        }
        Err(e) => {
            tracing::error!("序列化OpenAI响应失败: {}", e);
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn frame_line(text: &str) -> String {
        format!(r#"data: {{"success":true,"code":0,"responseMessage":"{text}","data":null}}"#)
    }

    /// 用一组传输分片驱动完整的转发流程，返回所有产出的事件
    fn relay_all(chunks: &[&[u8]], session: &SessionContext) -> (Vec<Bytes>, String) {
        let mut framer = LineFramer::new();
        let mut full_response = String::new();
        let mut events = Vec::new();

        for chunk in chunks {
            for line in framer.push(chunk) {
                if let Some(event) = relay_frame_line(&line, session, &mut full_response) {
                    events.push(event);
                }
            }
        }
        if let Some(line) = framer.finish()
            && let Some(event) = relay_frame_line(&line, session, &mut full_response)
        {
            events.push(event);
        }
        (events, full_response)
    }

    fn delta_of(event: &Bytes) -> (String, String, i64) {
        let text = std::str::from_utf8(event).unwrap();
        let payload = text
            .strip_prefix("data: ")
            .unwrap()
            .strip_suffix("\n\n")
            .unwrap();
        let json: Value = serde_json::from_str(payload).unwrap();
        (
            json["choices"][0]["delta"]["content"]
                .as_str()
                .unwrap()
                .to_string(),
            json["id"].as_str().unwrap().to_string(),
            json["created"].as_i64().unwrap(),
        )
    }

    /// 测试行缓冲跨分片重组
    #[test]
    fn test_line_framer_reassembles_split_lines() {
        let mut framer = LineFramer::new();
        assert!(framer.push(b"data: {\"respon").is_empty());
        let lines = framer.push(b"seMessage\":\"hi\"}\ndata: tail");
        assert_eq!(lines, vec!["data: {\"responseMessage\":\"hi\"}"]);
        assert_eq!(framer.finish(), Some("data: tail".to_string()));
        assert_eq!(framer.finish(), None);
    }

    /// 测试 \r\n 行结束符被剥离
    #[test]
    fn test_line_framer_strips_crlf() {
        let mut framer = LineFramer::new();
        let lines = framer.push(b"one\r\ntwo\n");
        assert_eq!(lines, vec!["one", "two"]);
    }

    /// 测试空行与非 data 行被忽略
    #[test]
    fn test_non_data_lines_are_skipped() {
        assert!(parse_stream_frame("").is_none());
        assert!(parse_stream_frame(": keep-alive").is_none());
        assert!(parse_stream_frame("event: ping").is_none());
    }

    /// 测试 data 行带前导空格也能解析
    #[test]
    fn test_data_line_with_leading_space_parses() {
        let frame = parse_stream_frame(&frame_line("片段")).unwrap();
        assert_eq!(frame.response_message, "片段");
    }

    /// 测试 n 个帧产出 n 个 chunk，顺序一致且共享会话上下文
    #[test]
    fn test_frames_map_one_to_one_in_order() {
        let session = SessionContext::new();
        let input = format!(
            "{}\n\n{}\n\n{}\n",
            frame_line("甲"),
            frame_line("乙"),
            frame_line("丙")
        );
        let (events, full_response) = relay_all(&[input.as_bytes()], &session);

        assert_eq!(events.len(), 3);
        let deltas: Vec<(String, String, i64)> = events.iter().map(delta_of).collect();
        assert_eq!(
            deltas.iter().map(|d| d.0.as_str()).collect::<Vec<_>>(),
            vec!["甲", "乙", "丙"]
        );
        for (_, id, created) in &deltas {
            assert_eq!(id, &session.id);
            assert_eq!(*created, session.created);
        }
        assert_eq!(full_response, "甲乙丙");
    }

    /// 测试坏帧只被跳过，流继续：F1、坏帧、F2 产出恰好 2 个 chunk
    #[test]
    fn test_malformed_frame_is_skipped_not_fatal() {
        let session = SessionContext::new();
        let input = format!(
            "{}\ndata: {{not valid json\n{}\n",
            frame_line("前"),
            frame_line("后")
        );
        let (events, full_response) = relay_all(&[input.as_bytes()], &session);

        assert_eq!(events.len(), 2);
        assert_eq!(delta_of(&events[0]).0, "前");
        assert_eq!(delta_of(&events[1]).0, "后");
        assert_eq!(full_response, "前后");
    }

    /// 测试没有末尾换行的最后一帧也会被转发
    #[test]
    fn test_trailing_line_without_newline_is_relayed() {
        let session = SessionContext::new();
        let (events, _) = relay_all(&[frame_line("尾帧").as_bytes()], &session);
        assert_eq!(events.len(), 1);
        assert_eq!(delta_of(&events[0]).0, "尾帧");
    }

    /// 测试事件按 SSE 帧格式输出
    #[test]
    fn test_event_wire_format() {
        let session = SessionContext::new();
        let (events, _) = relay_all(&[format!("{}\n", frame_line("x")).as_bytes()], &session);
        let text = std::str::from_utf8(&events[0]).unwrap();
        assert!(text.starts_with("data: {"));
        assert!(text.ends_with("\n\n"));
    }
}
