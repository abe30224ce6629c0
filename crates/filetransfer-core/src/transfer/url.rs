//! URL 校验
//!
//! 纯语法检查，在任何网络活动之前执行，不做 DNS 解析。
//! 主机无法解析的合法 URL 会在连接阶段以 `CONNECTION_ERR` 报告。

use reqwest::Url;
use thiserror::Error;

/// 默认允许的传输协议
pub const DEFAULT_SCHEMES: [&str; 2] = ["http", "https"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("malformed URL {url:?}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("whitespace in host of {url:?}")]
    HostWhitespace { url: String },

    #[error("URL {url:?} has no host")]
    MissingHost { url: String },

    #[error("unsupported scheme {scheme:?} in {url:?}")]
    UnsupportedScheme { url: String, scheme: String },
}

/// 校验候选 URL
///
/// `allowed_schemes` 为空时使用 [`DEFAULT_SCHEMES`]。
pub fn validate_url<S: AsRef<str>>(candidate: &str, allowed_schemes: &[S]) -> Result<Url, UrlError> {
    // 先检查原始字符串：部分解析器会对非特殊协议的主机部分宽松处理
    if authority(candidate).is_some_and(|host| host.chars().any(char::is_whitespace)) {
        return Err(UrlError::HostWhitespace {
            url: candidate.to_string(),
        });
    }

    let url = Url::parse(candidate).map_err(|e| UrlError::Malformed {
        url: candidate.to_string(),
        reason: e.to_string(),
    })?;

    let scheme_allowed = if allowed_schemes.is_empty() {
        DEFAULT_SCHEMES.contains(&url.scheme())
    } else {
        allowed_schemes
            .iter()
            .any(|s| s.as_ref().eq_ignore_ascii_case(url.scheme()))
    };
    if !scheme_allowed {
        return Err(UrlError::UnsupportedScheme {
            url: candidate.to_string(),
            scheme: url.scheme().to_string(),
        });
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(UrlError::MissingHost {
            url: candidate.to_string(),
        }),
    }
}

/// 提取 `scheme://` 与路径之间的部分
fn authority(candidate: &str) -> Option<&str> {
    let (_, rest) = candidate.trim().split_once("://")?;
    let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    Some(&rest[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(url: &str) -> Result<Url, UrlError> {
        validate_url::<&str>(url, &[])
    }

    #[test]
    fn test_valid_urls() {
        let url = check("http://cordova-filetransfer.example.com/robots.txt").unwrap();
        assert_eq!(url.host_str(), Some("cordova-filetransfer.example.com"));
        assert!(check("https://127.0.0.1:8443/upload?x=1").is_ok());
        assert!(check("HTTP://example.com").is_ok());
    }

    #[test]
    fn test_unknown_host_is_syntactically_valid() {
        assert!(check("http://foobar.apache.org/index.html").is_ok());
    }

    #[test]
    fn test_bad_scheme() {
        let err = check("httpssss://example.com").unwrap_err();
        assert!(matches!(err, UrlError::UnsupportedScheme { ref scheme, .. } if scheme == "httpssss"));
    }

    #[test]
    fn test_space_in_host() {
        assert!(matches!(
            check("httpssss://exa mple.com").unwrap_err(),
            UrlError::HostWhitespace { .. }
        ));
        assert!(matches!(
            check("http://exa mple.com/path").unwrap_err(),
            UrlError::HostWhitespace { .. }
        ));
    }

    #[test]
    fn test_space_in_path_is_allowed() {
        assert!(check("http://example.com/some file.txt").is_ok());
    }

    #[test]
    fn test_unparsable() {
        assert!(matches!(check("").unwrap_err(), UrlError::Malformed { .. }));
        assert!(matches!(
            check("not a url").unwrap_err(),
            UrlError::Malformed { .. }
        ));
        assert!(matches!(
            check("http://").unwrap_err(),
            UrlError::Malformed { .. }
        ));
    }

    #[test]
    fn test_missing_host() {
        let err = validate_url("file:///etc/passwd", &["file"]).unwrap_err();
        assert!(matches!(err, UrlError::MissingHost { .. }));
    }

    #[test]
    fn test_custom_scheme_list() {
        assert!(validate_url("ftp://example.com/a", &["ftp"]).is_ok());
        assert!(validate_url("http://example.com/a", &["ftp"]).is_err());
    }
}
