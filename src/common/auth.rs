//! API Key 提取与比较

use axum::{body::Body, http::Request};
use subtle::ConstantTimeEq;

/// 从请求头提取 API Key
///
/// 优先 `x-api-key`，其次 `Authorization: Bearer <key>`
pub fn extract_api_key(request: &Request<Body>) -> Option<String> {
    let headers = request.headers();

    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.to_string());
    }

    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|key| key.trim().to_string())
}

/// 常量时间字符串比较，防止时序攻击
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, value: &str) -> Request<Body> {
        Request::builder()
            .header(name, value)
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_extract_from_x_api_key() {
        assert_eq!(
            extract_api_key(&request("x-api-key", "secret")),
            Some("secret".to_string())
        );
    }

    #[test]
    fn test_extract_from_bearer() {
        assert_eq!(
            extract_api_key(&request("authorization", "Bearer secret")),
            Some("secret".to_string())
        );
        assert_eq!(extract_api_key(&request("authorization", "Basic abc")), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
