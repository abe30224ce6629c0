//! FileTransfer Core Library
//!
//! 基于 HTTP 的文件传输客户端核心：分块 multipart 上传、流式下载、进度通知和取消。
//!
//! # 模块
//!
//! - **transfer**: 传输引擎、请求构建、错误分类
//! - **fs**: 本地文件系统协作者（真实实现和内存实现）
//! - **error**: 错误码和错误结构
//! - **config**: 传输配置
//! - **server**: 本地回显服务器，用于测试
//!
//! # 使用示例
//!
//! ## 上传文件
//!
//! ```ignore
//! use filetransfer_core::{FileTransfer, TransferConfig, TransferOptions};
//!
//! let ft = FileTransfer::new(TransferConfig::load())?;
//! let options = TransferOptions::new()
//!     .param("value1", "test")
//!     .header("Authorization", "Basic dGVzdA==");
//!
//! let handle = ft.upload("/tmp/upload.txt", "https://example.com/upload", options);
//! match handle.wait_with(|p| println!("{}/{:?}", p.loaded, p.total)).await {
//!     TransferOutcome::Success(result) => println!("HTTP {}", result.response_code),
//!     TransferOutcome::Failure(error) => eprintln!("{}", error),
//! }
//! ```
//!
//! ## 下载并取消
//!
//! ```ignore
//! let handle = ft.download("https://example.com/big.bin", "/tmp/big.bin", TransferOptions::default());
//! let abort = handle.abort_handle();
//! abort.abort();
//! // 结果为 ABORT_ERR，未完成的文件已删除
//! let outcome = handle.wait().await;
//! ```

pub mod config;
pub mod error;
pub mod fs;
pub mod logging;
pub mod server;
pub mod transfer;

pub use config::TransferConfig;
pub use error::{ErrorCode, TransferError};
pub use fs::{Entry, FileSystem, LocalFileSystem, MemoryFileSystem};
pub use logging::LogLevel;
pub use server::EchoServer;

// Transfer re-exports
pub use transfer::{
    AbortHandle, CallbackEvent, Direction, FileTransfer, HeaderValue, ProgressEvent,
    SimpleTransferCallback, TransferCallback, TransferEvent, TransferHandle, TransferOptions,
    TransferOutcome, TransferResult, UploadMethod,
};
