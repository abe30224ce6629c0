//! 文件传输模块
//!
//! 包含:
//! - URL 校验和错误分类
//! - multipart 请求构建
//! - 传输引擎 (上传/下载/取消)
//! - 回调风格接口

pub mod callback;
pub mod classify;
pub mod engine;
pub mod request;
pub mod types;
pub mod url;

pub use callback::{CallbackEvent, SimpleTransferCallback, TransferCallback};
pub use engine::{AbortHandle, FileTransfer, TransferHandle};
pub use request::{MultipartBody, RequestError};
pub use types::{
    DEFAULT_FILE_KEY, DEFAULT_MIME_TYPE, Direction, HeaderValue, ProgressEvent, TransferEvent,
    TransferOptions, TransferOutcome, TransferRequest, TransferResult, UploadMethod,
};
pub use url::{UrlError, validate_url};
