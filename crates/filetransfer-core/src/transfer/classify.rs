//! 错误分类
//!
//! 在首次检测到失败的位置把底层错误映射为固定的错误码：
//!
//! | 条件 | 错误码 | http_status |
//! |---|---|---|
//! | URL 语法错误 | `InvalidUrl` | 无 |
//! | 本地文件缺失/不可读，或下载目标不可写 | `FileNotFound` | 无 |
//! | DNS 解析或连接失败 | `Connection` | 无 |
//! | 收到非 2xx 响应 | `Connection` | 状态码 |
//! | 调用方取消 | `Aborted` | 已收到响应时为状态码 |
//!
//! 先校验 URL，再检查本地路径，最后才进行网络访问。

use crate::error::{ErrorCode, TransferError};
use crate::transfer::request::RequestError;
use crate::transfer::types::TransferRequest;
use crate::transfer::url::UrlError;
use std::io;

/// 一次传输的错误分类器，携带 source/target 信息
#[derive(Debug, Clone)]
pub struct Classifier {
    source: String,
    target: String,
}

impl Classifier {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }

    pub fn for_request(request: &TransferRequest) -> Self {
        let (source, target) = request.endpoints();
        Self::new(source, target)
    }

    fn error(&self, code: ErrorCode) -> TransferError {
        TransferError::new(code, self.source.clone(), self.target.clone())
    }

    pub fn invalid_url(&self, err: UrlError) -> TransferError {
        self.error(ErrorCode::InvalidUrl).with_source(err)
    }

    /// 本地路径不是绝对路径或 `file://` URL
    pub fn bad_local_path(&self, path: &str) -> TransferError {
        self.error(ErrorCode::FileNotFound)
            .with_source(format!("invalid local path {path:?}"))
    }

    /// 本地文件访问失败；`status` 为已收到的响应状态
    pub fn local_io(&self, err: io::Error, status: Option<u16>) -> TransferError {
        self.error(ErrorCode::FileNotFound)
            .with_http_status(status)
            .with_source(err)
    }

    /// 请求头无法编码，在网络访问前失败
    pub fn bad_request(&self, err: RequestError) -> TransferError {
        self.error(ErrorCode::Connection).with_source(err)
    }

    /// 传输层错误
    ///
    /// 连接阶段失败时 `status` 为 `None`；读取响应体失败时为已收到的状态码。
    /// reqwest 在构建请求阶段报告的 URL 错误归类为 `InvalidUrl`。
    pub fn transport(&self, err: reqwest::Error, status: Option<u16>) -> TransferError {
        let code = if err.is_builder() && status.is_none() {
            ErrorCode::InvalidUrl
        } else {
            ErrorCode::Connection
        };
        self.error(code).with_http_status(status).with_source(err)
    }

    /// 服务器返回非 2xx 响应
    pub fn http_status(&self, status: u16, body: String) -> TransferError {
        let err = self.error(ErrorCode::Connection).with_http_status(Some(status));
        if body.is_empty() { err } else { err.with_body(body) }
    }

    pub fn aborted(&self, status: Option<u16>) -> TransferError {
        self.error(ErrorCode::Aborted).with_http_status(status)
    }

    /// 传输任务在给出终结结果前意外结束
    pub fn task_lost(&self) -> TransferError {
        self.error(ErrorCode::Connection)
            .with_source("transfer task ended without an outcome")
    }
}
