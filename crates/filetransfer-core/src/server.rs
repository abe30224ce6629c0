//! 本地回显服务器
//!
//! 供集成测试和 `filetransfer serve` 使用，行为固定：
//!
//! - `GET /robots.txt`: 文本文件
//! - `ANY /status/:code`: 读完请求体后以给定状态码响应
//! - `POST|PUT /upload`: 解析 multipart，以 JSON 返回字段、文件和请求头
//! - `GET /slow`: 缓慢输出的数据流，用于取消测试
//! - `GET /download/:size`: 固定内容的 `size` 字节数据

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{any, get, post},
};
use futures_util::stream;
use log::{debug, error, info};
use serde_json::{Map, Value, json};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

pub const ROBOTS_TXT: &str = "User-agent: *\nDisallow: /slow\n";

/// `/slow` 每块的大小和间隔
const SLOW_CHUNK: usize = 1024;
const SLOW_CHUNKS: usize = 600;
const SLOW_INTERVAL: Duration = Duration::from_millis(100);

/// `/download/:size` 的上限
const MAX_DOWNLOAD_SIZE: usize = 64 * 1024 * 1024;

#[derive(Default)]
struct EchoState {
    last_upload_headers: Mutex<Vec<(String, String)>>,
}

/// 回显服务器
pub struct EchoServer {
    port: u16,
    state: Arc<EchoState>,
    shutdown: CancellationToken,
}

impl EchoServer {
    pub fn new() -> Self {
        Self {
            port: 0, // 使用随机端口
            state: Arc::new(EchoState::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// 指定监听端口
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// 获取分配的端口
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 本机访问地址
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// 在后台启动服务器，返回实际端口
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let app = router(self.state.clone());

        let listener = TcpListener::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))).await?;
        let port = listener.local_addr()?.port();
        self.port = port;

        info!("Echo server listening on port {}", port);

        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("Echo server error: {}", e);
            }
        });

        Ok(port)
    }

    /// 最近一次上传请求的全部请求头（名称小写，按出现顺序）
    pub async fn last_upload_headers(&self) -> Vec<(String, String)> {
        self.state.last_upload_headers.lock().await.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Default for EchoServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn router(state: Arc<EchoState>) -> Router {
    Router::new()
        .route("/robots.txt", get(robots_handler))
        .route("/status/:code", any(status_handler))
        .route("/upload", post(upload_handler).put(upload_handler))
        .route("/slow", get(slow_handler))
        .route("/download/:size", get(download_handler))
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

async fn robots_handler() -> impl IntoResponse {
    ROBOTS_TXT
}

async fn status_handler(Path(code): Path<u16>, body: Bytes) -> impl IntoResponse {
    debug!("Status request {} ({} body bytes)", code, body.len());
    match StatusCode::from_u16(code) {
        Ok(status) => (status, status.canonical_reason().unwrap_or_default()).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "invalid status code").into_response(),
    }
}

async fn upload_handler(
    State(state): State<Arc<EchoState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, String)> {
    let mut fields = Map::new();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(ToString::to_string);
        let content_type = field.content_type().map(ToString::to_string);
        let data = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

        match file_name {
            Some(file_name) => files.push(json!({
                "name": name,
                "fileName": file_name,
                "contentType": content_type,
                "size": data.len(),
            })),
            None => {
                fields.insert(name, Value::String(String::from_utf8_lossy(&data).into_owned()));
            }
        }
    }

    let raw: Vec<(String, String)> = headers
        .iter()
        .map(|(n, v)| (n.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();

    let mut echoed = Map::new();
    for (name, value) in &raw {
        if let Value::Array(values) = echoed
            .entry(name.clone())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            values.push(Value::String(value.clone()));
        }
    }

    info!("Upload received: {} fields, {} files", fields.len(), files.len());
    *state.last_upload_headers.lock().await = raw;

    Ok(Json(json!({
        "fields": fields,
        "files": files,
        "headers": echoed,
    })))
}

async fn slow_handler() -> impl IntoResponse {
    let chunks = stream::unfold(0usize, |sent| async move {
        if sent == SLOW_CHUNKS {
            return None;
        }
        tokio::time::sleep(SLOW_INTERVAL).await;
        Some((Ok::<_, std::io::Error>(Bytes::from(vec![b'.'; SLOW_CHUNK])), sent + 1))
    });
    Body::from_stream(chunks)
}

async fn download_handler(Path(size): Path<usize>) -> impl IntoResponse {
    if size > MAX_DOWNLOAD_SIZE {
        return (StatusCode::PAYLOAD_TOO_LARGE, "size too large").into_response();
    }
    (StatusCode::OK, payload(size)).into_response()
}

/// `/download/:size` 的内容
pub fn payload(size: usize) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation)]
    (0..size).map(|i| (i % 251) as u8).collect()
}
