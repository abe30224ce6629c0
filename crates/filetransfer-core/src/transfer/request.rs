//! 传输请求构建
//!
//! 上传请求使用 `multipart/form-data`：
//!
//! ```text
//! --BOUNDARY\r\n
//! Content-Disposition: form-data; name="file"; filename="upload.txt"\r\n
//! Content-Type: text/plain\r\n
//! \r\n
//! <文件内容>\r\n
//! --BOUNDARY\r\n
//! Content-Disposition: form-data; name="value1"\r\n
//! \r\n
//! test\r\n
//! --BOUNDARY--\r\n
//! ```
//!
//! 文件内容之前的部分称为 preamble，之后的部分称为 epilogue；
//! 两者都预先生成，文件内容以流的方式读取，因此 `Content-Length` 可以提前算出。

use crate::fs::{Entry, EntryReader};
use crate::transfer::types::{DEFAULT_MIME_TYPE, HeaderValue, TransferOptions};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use log::debug;
use reqwest::header::{self, HeaderMap, HeaderName};
use reqwest::{Method, Url};
use std::io;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio_util::io::ReaderStream;

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid header name {name:?}")]
    InvalidHeaderName { name: String },

    #[error("invalid value for header {name:?}")]
    InvalidHeaderValue { name: String },
}

/// 预先生成的 multipart 请求体
#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    preamble: Bytes,
    epilogue: Bytes,
    file_len: u64,
}

impl MultipartBody {
    /// 生成文件部分在前、表单字段在后的请求体
    pub fn new(options: &TransferOptions, file_name: &str, mime_type: &str, file_len: u64) -> Self {
        Self::with_boundary(
            format!("+++++{}", uuid::Uuid::new_v4().simple()),
            options,
            file_name,
            mime_type,
            file_len,
        )
    }

    fn with_boundary(
        boundary: String,
        options: &TransferOptions,
        file_name: &str,
        mime_type: &str,
        file_len: u64,
    ) -> Self {
        let preamble = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
             Content-Type: {mime_type}\r\n\r\n",
            escape_quoted(&options.file_key),
            escape_quoted(file_name),
        );

        let mut epilogue = String::from("\r\n");
        for (key, value) in &options.params {
            epilogue.push_str(&format!(
                "--{boundary}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{value}\r\n",
                escape_quoted(key),
            ));
        }
        epilogue.push_str(&format!("--{boundary}--\r\n"));

        Self {
            boundary,
            preamble: Bytes::from(preamble),
            epilogue: Bytes::from(epilogue),
            file_len,
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    /// 完整请求体的字节数
    pub fn content_length(&self) -> u64 {
        self.preamble.len() as u64 + self.file_len + self.epilogue.len() as u64
    }

    pub fn preamble(&self) -> &Bytes {
        &self.preamble
    }

    pub fn epilogue(&self) -> &Bytes {
        &self.epilogue
    }

    /// 把请求体转换为分块流，每块最多 `chunk_size` 字节
    ///
    /// 文件部分最多读取 `file_len` 字节，保证与 `Content-Length` 一致。
    pub fn into_stream(
        self,
        reader: EntryReader,
        chunk_size: usize,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        let chunk_size = chunk_size.max(1);
        let head = stream::iter(split_chunks(self.preamble, chunk_size).into_iter().map(Ok));
        let file = ReaderStream::with_capacity(reader.take(self.file_len), chunk_size);
        let tail = stream::iter(split_chunks(self.epilogue, chunk_size).into_iter().map(Ok));
        head.chain(file).chain(tail)
    }
}

fn split_chunks(bytes: Bytes, chunk_size: usize) -> Vec<Bytes> {
    (0..bytes.len())
        .step_by(chunk_size)
        .map(|start| bytes.slice(start..(start + chunk_size).min(bytes.len())))
        .collect()
}

/// 转义 Content-Disposition 引号字符串中的特殊字符
fn escape_quoted(value: &str) -> String {
    value
        .replace('"', "%22")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

/// 可直接发送的请求描述
#[derive(Debug)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<MultipartBody>,
}

/// 构建上传请求
pub fn build_upload(
    url: Url,
    options: &TransferOptions,
    file: &Entry,
) -> Result<PreparedRequest, RequestError> {
    let file_name = options.file_name.as_deref().unwrap_or(&file.name);
    let mime_type = options.mime_type.clone().unwrap_or_else(|| {
        mime_guess::from_path(file_name)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
    });

    let body = MultipartBody::new(options, file_name, &mime_type, file.size);

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        body.content_type()
            .parse()
            .map_err(|_| RequestError::InvalidHeaderValue {
                name: header::CONTENT_TYPE.to_string(),
            })?,
    );
    merge_headers(&mut headers, &options.headers)?;
    // Content-Length 始终以实际请求体为准
    headers.insert(header::CONTENT_LENGTH, body.content_length().into());

    Ok(PreparedRequest {
        method: options.http_method.as_reqwest(),
        url,
        headers,
        body: Some(body),
    })
}

/// 构建下载请求（GET，无请求体）
pub fn build_download(url: Url, options: &TransferOptions) -> Result<PreparedRequest, RequestError> {
    let mut headers = HeaderMap::new();
    merge_headers(&mut headers, &options.headers)?;
    Ok(PreparedRequest {
        method: Method::GET,
        url,
        headers,
        body: None,
    })
}

/// 合并自定义请求头
///
/// 同名的已有请求头被替换；多值以多条请求头行按顺序追加。
/// `Content-Length` 不允许覆盖。
fn merge_headers(
    headers: &mut HeaderMap,
    custom: &[(String, HeaderValue)],
) -> Result<(), RequestError> {
    for (name, value) in custom {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| RequestError::InvalidHeaderName { name: name.clone() })?;

        if header_name == header::CONTENT_LENGTH {
            debug!("Ignoring custom Content-Length header");
            continue;
        }

        headers.remove(&header_name);
        for v in value.values() {
            let header_value = v
                .parse::<header::HeaderValue>()
                .map_err(|_| RequestError::InvalidHeaderValue { name: name.clone() })?;
            headers.append(header_name.clone(), header_value);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn entry(name: &str, size: u64) -> Entry {
        Entry::new(Path::new("/data").join(name).as_path(), false, size)
    }

    fn url() -> Url {
        Url::parse("http://localhost/upload").unwrap()
    }

    async fn collect(body: MultipartBody, content: &[u8], chunk_size: usize) -> Vec<Bytes> {
        let reader: EntryReader = Box::new(io::Cursor::new(content.to_vec()));
        body.into_stream(reader, chunk_size)
            .map(|chunk| chunk.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_multipart_layout() {
        let options = TransferOptions::new()
            .mime_type("text/plain")
            .param("value1", "test")
            .param("value2", "param");
        let body = MultipartBody::with_boundary(
            "BOUNDARY".to_string(),
            &options,
            "upload.txt",
            "text/plain",
            5,
        );
        let expected_len = body.content_length();

        let chunks = collect(body, b"hello", 4096).await;
        let all: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let text = String::from_utf8(all).unwrap();

        assert_eq!(
            text,
            "--BOUNDARY\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"upload.txt\"\r\n\
             Content-Type: text/plain\r\n\r\n\
             hello\r\n\
             --BOUNDARY\r\nContent-Disposition: form-data; name=\"value1\"\r\n\r\ntest\r\n\
             --BOUNDARY\r\nContent-Disposition: form-data; name=\"value2\"\r\n\r\nparam\r\n\
             --BOUNDARY--\r\n"
        );
        assert_eq!(text.len() as u64, expected_len);
    }

    #[tokio::test]
    async fn test_chunks_are_bounded() {
        let content = vec![b'x'; 1000];
        let body = MultipartBody::new(&TransferOptions::default(), "a.bin", DEFAULT_MIME_TYPE, 1000);
        let expected_len = body.content_length();

        let chunks = collect(body, &content, 64).await;
        assert!(chunks.iter().all(|c| c.len() <= 64 && !c.is_empty()));
        let total: usize = chunks.iter().map(Bytes::len).sum();
        assert_eq!(total as u64, expected_len);
    }

    #[tokio::test]
    async fn test_file_longer_than_declared_is_truncated() {
        let body = MultipartBody::new(&TransferOptions::default(), "a.txt", "text/plain", 3);
        let expected_len = body.content_length();
        let chunks = collect(body, b"abcdef", 4096).await;
        let total: usize = chunks.iter().map(Bytes::len).sum();
        assert_eq!(total as u64, expected_len);
    }

    #[test]
    fn test_upload_defaults_from_entry() {
        let request = build_upload(url(), &TransferOptions::default(), &entry("photo.png", 10)).unwrap();
        let body = request.body.as_ref().unwrap();
        let preamble = String::from_utf8_lossy(body.preamble());

        assert_eq!(request.method, Method::POST);
        assert!(preamble.contains("name=\"file\"; filename=\"photo.png\""));
        assert!(preamble.contains("Content-Type: image/png"));
        assert_eq!(
            request.headers[header::CONTENT_LENGTH],
            body.content_length().to_string()
        );
        assert!(
            request.headers[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("multipart/form-data; boundary=")
        );
    }

    #[test]
    fn test_unknown_extension_uses_octet_stream() {
        let request = build_upload(url(), &TransferOptions::default(), &entry("blob", 1)).unwrap();
        let preamble = String::from_utf8_lossy(request.body.as_ref().unwrap().preamble()).to_string();
        assert!(preamble.contains("Content-Type: application/octet-stream"));
    }

    #[test]
    fn test_repeated_header_values() {
        let options = TransferOptions::new()
            .header("CustomHeader1", "CustomValue1")
            .header("CustomHeader2", ["CustomValue2", "CustomValue3"]);
        let request = build_upload(url(), &options, &entry("upload.txt", 1)).unwrap();

        let values: Vec<&str> = request
            .headers
            .get_all("customheader2")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values, ["CustomValue2", "CustomValue3"]);
        assert_eq!(request.headers["customheader1"], "CustomValue1");
    }

    #[test]
    fn test_custom_headers_override_except_content_length() {
        let options = TransferOptions::new()
            .header("Content-Type", "application/x-custom")
            .header("Content-Length", "1");
        let request = build_upload(url(), &options, &entry("upload.txt", 4)).unwrap();
        let body = request.body.as_ref().unwrap();

        assert_eq!(request.headers[header::CONTENT_TYPE], "application/x-custom");
        assert_eq!(request.headers.get_all(header::CONTENT_LENGTH).iter().count(), 1);
        assert_eq!(
            request.headers[header::CONTENT_LENGTH],
            body.content_length().to_string()
        );
    }

    #[test]
    fn test_put_method() {
        let options = TransferOptions::new().http_method(crate::transfer::types::UploadMethod::Put);
        let request = build_upload(url(), &options, &entry("a.txt", 1)).unwrap();
        assert_eq!(request.method, Method::PUT);
    }

    #[test]
    fn test_download_request() {
        let options = TransferOptions::new().header("Authorization", "Basic dGVzdA==");
        let request = build_download(url(), &options).unwrap();
        assert_eq!(request.method, Method::GET);
        assert!(request.body.is_none());
        assert_eq!(request.headers[header::AUTHORIZATION], "Basic dGVzdA==");
    }

    #[test]
    fn test_invalid_header() {
        let options = TransferOptions::new().header("Bad Name", "v");
        assert!(matches!(
            build_download(url(), &options),
            Err(RequestError::InvalidHeaderName { .. })
        ));

        let options = TransferOptions::new().header("X-Ok", "line\nbreak");
        assert!(matches!(
            build_download(url(), &options),
            Err(RequestError::InvalidHeaderValue { .. })
        ));
    }

    #[test]
    fn test_escape_quoted() {
        assert_eq!(escape_quoted("a\"b\r\nc"), "a%22b%0D%0Ac");
    }
}
