//! 传输请求、选项和结果

use crate::error::TransferError;
use crate::fs::Entry;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// 默认的文件表单字段名
pub const DEFAULT_FILE_KEY: &str = "file";

/// 无法推断时使用的 MIME 类型
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// 传输方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Upload,
    Download,
}

/// 上传使用的 HTTP 方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadMethod {
    #[default]
    Post,
    Put,
}

impl UploadMethod {
    pub fn as_reqwest(self) -> reqwest::Method {
        match self {
            UploadMethod::Post => reqwest::Method::POST,
            UploadMethod::Put => reqwest::Method::PUT,
        }
    }
}

/// 自定义请求头的值
///
/// 多值以重复的请求头行发送，而不是用逗号合并。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderValue {
    /// 按顺序遍历所有值
    pub fn values(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            HeaderValue::Single(v) => std::slice::from_ref(v),
            HeaderValue::Multiple(vs) => vs,
        };
        slice.iter().map(String::as_str)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        HeaderValue::Single(value.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        HeaderValue::Single(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        HeaderValue::Multiple(values)
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValue {
    fn from(values: [&str; N]) -> Self {
        HeaderValue::Multiple(values.iter().map(ToString::to_string).collect())
    }
}

/// 传输选项
///
/// 所有字段都有默认值：文件字段名为 `"file"`，无额外参数和请求头。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferOptions {
    /// multipart 中文件部分的字段名
    pub file_key: String,
    /// 上传的文件名，未设置时使用本地文件的基本名称
    pub file_name: Option<String>,
    /// 文件部分的 MIME 类型，未设置时根据文件名推断
    pub mime_type: Option<String>,
    /// 附加表单字段（按插入顺序发送）
    #[serde(deserialize_with = "ordered_pairs::deserialize")]
    pub params: Vec<(String, String)>,
    /// 自定义请求头（按插入顺序合并）
    #[serde(deserialize_with = "ordered_pairs::deserialize")]
    pub headers: Vec<(String, HeaderValue)>,
    pub http_method: UploadMethod,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            file_key: DEFAULT_FILE_KEY.to_string(),
            file_name: None,
            mime_type: None,
            params: Vec::new(),
            headers: Vec::new(),
            http_method: UploadMethod::Post,
        }
    }
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_key(mut self, key: impl Into<String>) -> Self {
        self.file_key = key.into();
        self
    }

    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = Some(name.into());
        self
    }

    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    /// 添加表单字段，同名字段会被覆盖
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    /// 添加自定义请求头，同名请求头会被覆盖
    pub fn header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn http_method(mut self, method: UploadMethod) -> Self {
        self.http_method = method;
        self
    }
}

/// 有序键值对：接受 `{"k": v}` 对象（保持文档顺序）或 `[["k", v]]` 列表
mod ordered_pairs {
    use serde::de::{Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
    use std::fmt;
    use std::marker::PhantomData;

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        deserializer.deserialize_any(PairsVisitor(PhantomData))
    }

    struct PairsVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for PairsVisitor<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map or a list of [name, value] pairs")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut pairs = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(pair) = map.next_entry::<String, V>()? {
                pairs.push(pair);
            }
            Ok(pairs)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut pairs = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(pair) = seq.next_element::<(String, V)>()? {
                pairs.push(pair);
            }
            Ok(pairs)
        }
    }
}

/// 提交后的传输请求（由任务独占，不再修改）
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub direction: Direction,
    pub local_path: String,
    pub remote_url: String,
    pub options: TransferOptions,
}

impl TransferRequest {
    /// 错误报告中的 (source, target)
    pub(crate) fn endpoints(&self) -> (&str, &str) {
        match self.direction {
            Direction::Upload => (&self.local_path, &self.remote_url),
            Direction::Download => (&self.remote_url, &self.local_path),
        }
    }
}

/// 成功结果
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub direction: Direction,
    /// 上传为已发送字节数，下载为已接收字节数
    pub bytes: u64,
    pub response_code: u16,
    /// 上传时为服务器响应体；下载时为空（内容已写入本地文件）
    pub response: Bytes,
    /// 响应头（重复的请求头保持多条）
    pub headers: Vec<(String, String)>,
    /// 下载目标条目
    pub entry: Option<Entry>,
}

impl TransferResult {
    pub fn bytes_sent(&self) -> u64 {
        match self.direction {
            Direction::Upload => self.bytes,
            Direction::Download => 0,
        }
    }

    pub fn bytes_received(&self) -> u64 {
        match self.direction {
            Direction::Upload => 0,
            Direction::Download => self.bytes,
        }
    }

    pub fn response_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.response)
    }

    /// 获取响应头的第一个值（名称不区分大小写）
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// 进度通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressEvent {
    /// 累计已传输字节数
    pub loaded: u64,
    /// 总字节数（未知时为 `None`）
    pub total: Option<u64>,
}

impl ProgressEvent {
    pub fn length_computable(&self) -> bool {
        self.total.is_some()
    }

    /// 完成比例，总长度未知时为 `None`
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            #[allow(clippy::cast_precision_loss)]
            Some(total) => Some(self.loaded as f64 / total as f64),
            None => None,
        }
    }
}

/// 终结结果：成功或失败，二者互斥
#[derive(Debug)]
pub enum TransferOutcome {
    Success(TransferResult),
    Failure(TransferError),
}

impl TransferOutcome {
    pub fn into_result(self) -> Result<TransferResult, TransferError> {
        match self {
            TransferOutcome::Success(result) => Ok(result),
            TransferOutcome::Failure(error) => Err(error),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success(_))
    }
}

impl From<Result<TransferResult, TransferError>> for TransferOutcome {
    fn from(result: Result<TransferResult, TransferError>) -> Self {
        match result {
            Ok(r) => TransferOutcome::Success(r),
            Err(e) => TransferOutcome::Failure(e),
        }
    }
}

/// 单个传输的事件序列：若干进度事件，然后恰好一个终结事件
#[derive(Debug)]
pub enum TransferEvent {
    Progress(ProgressEvent),
    Finished(TransferOutcome),
}
