//! 公共工具模块

pub mod auth;

/// 安全地截断 UTF-8 字符串，确保不会在多字节字符中间截断
///
/// 返回不超过 `max_bytes` 字节的最长有效 UTF-8 子串
pub fn truncate_str_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

/// 截断用于日志预览的文本，超长时追加省略号
pub fn preview(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    format!("{}...", truncate_str_safe(s, max_bytes.saturating_sub(3)))
}

/// 脱敏凭据：保留首尾各 4 个字符，短值整体遮蔽
pub fn mask_secret(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 12 {
        return "***".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}
