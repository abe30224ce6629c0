//! 传输错误定义
//!
//! 错误码与原有移动端 FileTransfer 接口保持一致：
//!
//! | 错误码 | 值 |
//! |---|---|
//! | `FILE_NOT_FOUND_ERR` | 1 |
//! | `INVALID_URL_ERR` | 2 |
//! | `CONNECTION_ERR` | 3 |
//! | `ABORT_ERR` | 4 |

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 传输错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    FileNotFound = 1,
    InvalidUrl = 2,
    Connection = 3,
    Aborted = 4,
}

impl ErrorCode {
    /// 获取数值编码
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 从数值编码创建
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            1 => Some(ErrorCode::FileNotFound),
            2 => Some(ErrorCode::InvalidUrl),
            3 => Some(ErrorCode::Connection),
            4 => Some(ErrorCode::Aborted),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::FileNotFound => "FILE_NOT_FOUND_ERR",
            ErrorCode::InvalidUrl => "INVALID_URL_ERR",
            ErrorCode::Connection => "CONNECTION_ERR",
            ErrorCode::Aborted => "ABORT_ERR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        ErrorCode::from_u8(code)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown error code {code}")))
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 传输失败
///
/// 每次失败只有一个错误码；`http_status` 仅在服务器确实返回响应时存在。
#[derive(Debug)]
pub struct TransferError {
    code: ErrorCode,
    http_status: Option<u16>,
    source_url: String,
    target: String,
    body: Option<String>,
    source: Option<BoxError>,
}

impl TransferError {
    pub fn new(code: ErrorCode, source_url: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            code,
            http_status: None,
            source_url: source_url.into(),
            target: target.into(),
            body: None,
            source: None,
        }
    }

    pub fn with_http_status(mut self, status: Option<u16>) -> Self {
        self.http_status = status;
        self
    }

    /// 附加服务器返回的响应体
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// 附加底层原因
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn http_status(&self) -> Option<u16> {
        self.http_status
    }

    /// 传输源（上传为本地路径，下载为 URL）
    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    /// 传输目标（上传为 URL，下载为本地路径）
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} -> {})", self.code, self.source_url, self.target)?;
        if let Some(status) = self.http_status {
            write!(f, ", HTTP {status}")?;
        }
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// JSON 形式：`{code, source, target, http_status, body, exception}`
impl Serialize for TransferError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            code: ErrorCode,
            source: &'a str,
            target: &'a str,
            http_status: Option<u16>,
            #[serde(skip_serializing_if = "Option::is_none")]
            body: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            exception: Option<String>,
        }

        Wire {
            code: self.code,
            source: &self.source_url,
            target: &self.target,
            http_status: self.http_status,
            body: self.body.as_deref(),
            exception: self.source.as_ref().map(ToString::to_string),
        }
        .serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::FileNotFound.as_u8(), 1);
        assert_eq!(ErrorCode::InvalidUrl.as_u8(), 2);
        assert_eq!(ErrorCode::Connection.as_u8(), 3);
        assert_eq!(ErrorCode::Aborted.as_u8(), 4);
        assert_eq!(ErrorCode::from_u8(3), Some(ErrorCode::Connection));
        assert_eq!(ErrorCode::from_u8(0), None);
    }

    #[test]
    fn test_error_code_serde() {
        assert_eq!(serde_json::to_string(&ErrorCode::InvalidUrl).unwrap(), "2");
        let code: ErrorCode = serde_json::from_str("1").unwrap();
        assert_eq!(code, ErrorCode::FileNotFound);
        assert!(serde_json::from_str::<ErrorCode>("9").is_err());
    }

    #[test]
    fn test_error_json_shape() {
        let err = TransferError::new(
            ErrorCode::Connection,
            "/tmp/upload.txt",
            "http://localhost/403",
        )
        .with_http_status(Some(403))
        .with_body("Forbidden");

        let json: serde_json::Value = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], 3);
        assert_eq!(json["http_status"], 403);
        assert_eq!(json["source"], "/tmp/upload.txt");
        assert_eq!(json["target"], "http://localhost/403");
        assert_eq!(json["body"], "Forbidden");
        assert!(json.get("exception").is_none());
    }

    #[test]
    fn test_error_source_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = TransferError::new(ErrorCode::FileNotFound, "/missing", "http://host/")
            .with_source(io);

        assert!(err.source().is_some());
        assert_eq!(err.http_status(), None);
        let text = err.to_string();
        assert!(text.starts_with("FILE_NOT_FOUND_ERR"), "{text}");
        assert!(text.ends_with("missing"), "{text}");
    }
}
