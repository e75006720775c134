use taplo::formatter;

/// 格式化配置文件的 TOML 内容
///
/// 统一使用 4 空格缩进，启动时将格式化结果写回配置文件
pub fn format_toml(input: &str) -> String {
    let options = formatter::Options {
        indent_string: "    ".to_string(),
        ..Default::default()
    };
    formatter::format(input, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试格式化后内容仍可解析
    #[test]
    fn test_format_keeps_content_parseable() {
        let formatted = format_toml("server_address=\"0.0.0.0:8080\"\nlog_req_body=true\n");
        assert!(formatted.contains("server_address"));
        assert!(toml::from_str::<toml::Value>(&formatted).is_ok());
    }
}
