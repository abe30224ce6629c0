//! 传输引擎
//!
//! 每次上传/下载在独立的 tokio 任务中执行，由 [`TransferHandle`] 跟踪。
//!
//! # 事件顺序
//!
//! 同一传输的所有事件在一个通道上按顺序投递：若干 [`TransferEvent::Progress`]，
//! 然后恰好一个 [`TransferEvent::Finished`]。终结事件之后不会再有任何事件。
//!
//! # 取消
//!
//! [`AbortHandle::abort`] 只是请求终止：任务在下一个等待点观察到取消，关闭连接和文件，
//! 删除未完成的下载文件，并以 `ABORT_ERR` 结束。终结之后调用 abort 不产生任何效果。

use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::fs::{Entry, FileSystem, LocalFileSystem, check_writable, normalize_local_path};
use crate::transfer::classify::Classifier;
use crate::transfer::request::{MultipartBody, build_download, build_upload};
use crate::transfer::types::{
    Direction, ProgressEvent, TransferEvent, TransferOptions, TransferOutcome, TransferRequest,
    TransferResult,
};
use crate::transfer::url::validate_url;
use bytes::Bytes;
use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::header::HeaderMap;
use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const RUNNING: u8 = 0;
const ABORTING: u8 = 1;
const FINISHED: u8 = 2;

/// 传输任务与句柄共享的状态
struct HandleShared {
    state: AtomicU8,
    cancel: CancellationToken,
}

impl HandleShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(RUNNING),
            cancel: CancellationToken::new(),
        }
    }

    /// 请求取消，仅在运行中有效
    fn request_abort(&self) -> bool {
        let accepted = self
            .state
            .compare_exchange(RUNNING, ABORTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if accepted {
            self.cancel.cancel();
        }
        accepted
    }

    /// 进入终结状态，返回 `false` 表示在此之前已请求取消
    fn finish(&self) -> bool {
        match self
            .state
            .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(_) => {
                self.state.store(FINISHED, Ordering::Release);
                false
            }
        }
    }

    fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    fn is_finished(&self) -> bool {
        self.state.load(Ordering::Acquire) == FINISHED
    }
}

/// 取消句柄，可克隆并在其他任务中使用
#[derive(Clone)]
pub struct AbortHandle {
    shared: Arc<HandleShared>,
}

impl AbortHandle {
    /// 请求取消传输
    ///
    /// 返回 `true` 表示请求已被接受；传输已结束或已在取消中时返回 `false`。
    pub fn abort(&self) -> bool {
        self.shared.request_abort()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("state", &self.shared.state.load(Ordering::Relaxed))
            .finish()
    }
}

/// 单个传输的句柄
pub struct TransferHandle {
    id: Uuid,
    direction: Direction,
    events: mpsc::Receiver<TransferEvent>,
    abort: AbortHandle,
    classifier: Classifier,
    finished: bool,
}

impl TransferHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// 请求取消，见 [`AbortHandle::abort`]
    pub fn abort(&self) -> bool {
        self.abort.abort()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// 接收下一个事件；终结事件之后返回 `None`
    ///
    /// 进度事件可能丢失：事件通道已满时新的进度会被丢弃，
    /// 每个 `loaded` 都是累计值，因此后续进度仍然准确。终结事件不会丢失。
    pub async fn next_event(&mut self) -> Option<TransferEvent> {
        if self.finished {
            return None;
        }
        match self.events.recv().await {
            Some(TransferEvent::Progress(progress)) => Some(TransferEvent::Progress(progress)),
            Some(TransferEvent::Finished(outcome)) => {
                self.finished = true;
                Some(TransferEvent::Finished(outcome))
            }
            None => {
                // 任务在发送终结事件前退出（例如 panic）
                self.finished = true;
                Some(TransferEvent::Finished(TransferOutcome::Failure(
                    self.classifier.task_lost(),
                )))
            }
        }
    }

    /// 等待终结结果，忽略进度
    pub async fn wait(self) -> TransferOutcome {
        self.wait_with(|_| {}).await
    }

    /// 等待终结结果，进度事件依次交给 `on_progress`
    ///
    /// 与 [`next_event`](Self::next_event) 相同，消费过慢时部分进度会被跳过，
    /// 但结果总会送达。
    pub async fn wait_with<F>(mut self, mut on_progress: F) -> TransferOutcome
    where
        F: FnMut(&ProgressEvent),
    {
        while let Some(event) = self.next_event().await {
            match event {
                TransferEvent::Progress(progress) => on_progress(&progress),
                TransferEvent::Finished(outcome) => return outcome,
            }
        }
        TransferOutcome::Failure(self.classifier.task_lost())
    }
}

impl std::fmt::Debug for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferHandle")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// 文件传输客户端
///
/// `upload`/`download` 会 `tokio::spawn` 传输任务，必须在 tokio 运行时中调用。
pub struct FileTransfer {
    client: reqwest::Client,
    fs: Arc<dyn FileSystem>,
    config: Arc<TransferConfig>,
    active: Mutex<Vec<Weak<HandleShared>>>,
}

impl FileTransfer {
    pub fn new(config: TransferConfig) -> anyhow::Result<Self> {
        let config = config.sanitized();

        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs);
        if !config.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            fs: Arc::new(LocalFileSystem::new()),
            config: Arc::new(config),
            active: Mutex::new(Vec::new()),
        })
    }

    /// 替换文件系统协作者
    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn file_system(&self) -> Arc<dyn FileSystem> {
        self.fs.clone()
    }

    /// 以 multipart 方式上传本地文件
    pub fn upload(
        &self,
        local_path: impl Into<String>,
        server_url: impl Into<String>,
        options: TransferOptions,
    ) -> TransferHandle {
        self.submit(TransferRequest {
            direction: Direction::Upload,
            local_path: local_path.into(),
            remote_url: server_url.into(),
            options,
        })
    }

    /// 下载到本地路径（创建或截断）
    pub fn download(
        &self,
        source_url: impl Into<String>,
        target_path: impl Into<String>,
        options: TransferOptions,
    ) -> TransferHandle {
        self.submit(TransferRequest {
            direction: Direction::Download,
            local_path: target_path.into(),
            remote_url: source_url.into(),
            options,
        })
    }

    pub async fn upload_and_wait(
        &self,
        local_path: impl Into<String>,
        server_url: impl Into<String>,
        options: TransferOptions,
    ) -> Result<TransferResult, TransferError> {
        self.upload(local_path, server_url, options)
            .wait()
            .await
            .into_result()
    }

    pub async fn download_and_wait(
        &self,
        source_url: impl Into<String>,
        target_path: impl Into<String>,
        options: TransferOptions,
    ) -> Result<TransferResult, TransferError> {
        self.download(source_url, target_path, options)
            .wait()
            .await
            .into_result()
    }

    /// 取消此客户端发起的所有进行中的传输，返回被取消的数量
    pub fn abort_all(&self) -> usize {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        let mut aborted = 0;
        active.retain(|weak| match weak.upgrade() {
            Some(shared) => {
                if shared.request_abort() {
                    aborted += 1;
                }
                !shared.is_finished()
            }
            None => false,
        });
        aborted
    }

    fn submit(&self, request: TransferRequest) -> TransferHandle {
        let shared = Arc::new(HandleShared::new());
        {
            let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            active.retain(|weak| weak.upgrade().is_some_and(|s| !s.is_finished()));
            active.push(Arc::downgrade(&shared));
        }

        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.event_buffer);
        let classifier = Classifier::for_request(&request);
        let direction = request.direction;

        info!(
            "Transfer {} submitted: {:?} local={} remote={}",
            id, direction, request.local_path, request.remote_url
        );

        let task = TransferTask {
            id,
            client: self.client.clone(),
            fs: self.fs.clone(),
            config: self.config.clone(),
            shared: shared.clone(),
            events: tx,
            classifier: classifier.clone(),
        };
        tokio::spawn(task.run(request));

        TransferHandle {
            id,
            direction,
            events: rx,
            abort: AbortHandle { shared },
            classifier,
            finished: false,
        }
    }
}

/// 在 spawned 任务中执行的单次传输
struct TransferTask {
    id: Uuid,
    client: reqwest::Client,
    fs: Arc<dyn FileSystem>,
    config: Arc<TransferConfig>,
    shared: Arc<HandleShared>,
    events: mpsc::Sender<TransferEvent>,
    classifier: Classifier,
}

impl TransferTask {
    async fn run(self, request: TransferRequest) {
        let outcome = match request.direction {
            Direction::Upload => {
                let result = self.upload(&request).await;
                self.settle(result)
            }
            Direction::Download => {
                let mut created = None;
                let result = self.download(&request, &mut created).await;
                let outcome = self.settle(result);
                if let (TransferOutcome::Failure(_), Some(entry)) = (&outcome, created) {
                    self.discard(&entry).await;
                }
                outcome
            }
        };

        match &outcome {
            TransferOutcome::Success(result) => info!(
                "Transfer {} completed: HTTP {}, {} bytes",
                self.id, result.response_code, result.bytes
            ),
            TransferOutcome::Failure(error) => warn!("Transfer {} failed: {}", self.id, error),
        }

        // 句柄被丢弃时结果无人接收
        let _ = self.events.send(TransferEvent::Finished(outcome)).await;
    }

    /// 确定终结结果：终结前已请求取消则改为 ABORT_ERR
    fn settle(&self, result: Result<TransferResult, TransferError>) -> TransferOutcome {
        if self.shared.finish() {
            return result.into();
        }
        let status = match &result {
            Ok(r) => Some(r.response_code),
            Err(e) => e.http_status(),
        };
        TransferOutcome::Failure(self.classifier.aborted(status))
    }

    fn progress(&self, loaded: u64, total: Option<u64>) {
        if !self.shared.is_running() {
            return;
        }
        // 进度只是通知，通道满时丢弃
        let _ = self
            .events
            .try_send(TransferEvent::Progress(ProgressEvent { loaded, total }));
    }

    async fn discard(&self, entry: &Entry) {
        match self.fs.remove(entry).await {
            Ok(()) => debug!("Removed partial download {:?}", entry.full_path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove partial download {:?}: {}",
                entry.full_path, e
            ),
        }
    }

    async fn upload(&self, request: &TransferRequest) -> Result<TransferResult, TransferError> {
        let c = &self.classifier;

        let url = validate_url(&request.remote_url, &self.config.allowed_schemes)
            .map_err(|e| c.invalid_url(e))?;

        let path = normalize_local_path(&request.local_path)
            .ok_or_else(|| c.bad_local_path(&request.local_path))?;
        let entry = self
            .fs
            .resolve(&path)
            .await
            .map_err(|e| c.local_io(e, None))?;
        if entry.is_directory {
            return Err(c.local_io(
                io::Error::new(io::ErrorKind::IsADirectory, "cannot upload a directory"),
                None,
            ));
        }
        let reader = self
            .fs
            .open_reader(&entry)
            .await
            .map_err(|e| c.local_io(e, None))?;

        let prepared = build_upload(url, &request.options, &entry).map_err(|e| c.bad_request(e))?;
        let total = prepared.body.as_ref().map(MultipartBody::content_length);

        // 请求体由连接任务拉取，进度先经中间通道交回本任务，
        // 以保证进度事件不会出现在终结事件之后
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel::<u64>();
        let mut builder = self
            .client
            .request(prepared.method, prepared.url)
            .headers(prepared.headers);
        if let Some(body) = prepared.body {
            let mut sent: u64 = 0;
            let stream = body
                .into_stream(reader, self.config.chunk_size)
                .map(move |chunk| {
                    if let Ok(bytes) = &chunk {
                        sent += bytes.len() as u64;
                        let _ = tick_tx.send(sent);
                    }
                    chunk
                });
            builder = builder.body(reqwest::Body::wrap_stream(stream));
        }

        debug!("Transfer {} uploading {:?} ({:?} bytes)", self.id, path, total);

        let send = builder.send();
        tokio::pin!(send);
        let mut bytes_sent: u64 = 0;
        let response = loop {
            tokio::select! {
                biased;
                () = self.shared.cancel.cancelled() => return Err(c.aborted(None)),
                Some(sent) = tick_rx.recv() => {
                    bytes_sent = sent;
                    self.progress(sent, total);
                }
                result = &mut send => break result.map_err(|e| c.transport(e, None))?,
            }
        };
        while let Ok(sent) = tick_rx.try_recv() {
            bytes_sent = sent;
            self.progress(sent, total);
        }
        drop(tick_rx);

        let status = response.status();
        let code = status.as_u16();
        let headers = collect_headers(response.headers());
        debug!("Transfer {} got HTTP {}", self.id, code);

        let body = tokio::select! {
            biased;
            () = self.shared.cancel.cancelled() => return Err(c.aborted(Some(code))),
            body = response.bytes() => body.map_err(|e| c.transport(e, Some(code)))?,
        };

        if !status.is_success() {
            return Err(c.http_status(code, String::from_utf8_lossy(&body).into_owned()));
        }

        Ok(TransferResult {
            direction: Direction::Upload,
            bytes: bytes_sent,
            response_code: code,
            response: body,
            headers,
            entry: None,
        })
    }

    async fn download(
        &self,
        request: &TransferRequest,
        created: &mut Option<Entry>,
    ) -> Result<TransferResult, TransferError> {
        let c = &self.classifier;

        let url = validate_url(&request.remote_url, &self.config.allowed_schemes)
            .map_err(|e| c.invalid_url(e))?;

        let path = normalize_local_path(&request.local_path)
            .ok_or_else(|| c.bad_local_path(&request.local_path))?;
        let prepared = build_download(url, &request.options).map_err(|e| c.bad_request(e))?;

        // 只做检查，目标文件在收到 2xx 响应后才创建
        check_writable(self.fs.as_ref(), &path)
            .await
            .map_err(|e| c.local_io(e, None))?;

        let send = self
            .client
            .request(prepared.method, prepared.url)
            .headers(prepared.headers)
            .send();
        let response = tokio::select! {
            biased;
            () = self.shared.cancel.cancelled() => return Err(c.aborted(None)),
            result = send => result.map_err(|e| c.transport(e, None))?,
        };

        let status = response.status();
        let code = status.as_u16();
        debug!("Transfer {} got HTTP {}", self.id, code);

        if !status.is_success() {
            let body = tokio::select! {
                biased;
                () = self.shared.cancel.cancelled() => return Err(c.aborted(Some(code))),
                text = response.text() => text.unwrap_or_default(),
            };
            return Err(c.http_status(code, body));
        }

        let headers = collect_headers(response.headers());
        let total = response.content_length();
        let mut entry = self
            .fs
            .create(&path)
            .await
            .map_err(|e| c.local_io(e, Some(code)))?;
        *created = Some(entry.clone());
        let mut writer = self
            .fs
            .open_writer(&entry)
            .await
            .map_err(|e| c.local_io(e, Some(code)))?;

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        loop {
            let next = tokio::select! {
                biased;
                () = self.shared.cancel.cancelled() => return Err(c.aborted(Some(code))),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(chunk)) => {
                    writer
                        .write_all(&chunk)
                        .await
                        .map_err(|e| c.local_io(e, Some(code)))?;
                    received += chunk.len() as u64;
                    self.progress(received, total);
                }
                Some(Err(e)) => return Err(c.transport(e, Some(code))),
                None => break,
            }
        }
        writer
            .shutdown()
            .await
            .map_err(|e| c.local_io(e, Some(code)))?;

        entry.size = received;
        Ok(TransferResult {
            direction: Direction::Download,
            bytes: received,
            response_code: code,
            response: Bytes::new(),
            headers,
            entry: Some(entry),
        })
    }
}

fn collect_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::fs::MemoryFileSystem;

    fn transfer(fs: &MemoryFileSystem) -> FileTransfer {
        let config = TransferConfig {
            use_system_proxy: false,
            ..Default::default()
        };
        FileTransfer::new(config)
            .unwrap()
            .with_file_system(Arc::new(fs.clone()))
    }

    #[test]
    fn test_abort_state_machine() {
        let shared = HandleShared::new();
        assert!(shared.is_running());
        assert!(shared.request_abort());
        assert!(shared.cancel.is_cancelled());
        assert!(!shared.request_abort());
        assert!(!shared.finish());
        assert!(shared.is_finished());
        assert!(!shared.request_abort());

        let shared = HandleShared::new();
        assert!(shared.finish());
        assert!(!shared.request_abort());
        assert!(!shared.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_malformed_url_touches_nothing() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/malformed_url.txt", b"Some content\n".to_vec());
        let ft = transfer(&fs);

        for url in ["httpssss://example.com", "httpssss://exa mple.com"] {
            let err = ft
                .upload_and_wait("/malformed_url.txt", url, TransferOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidUrl);
            assert_eq!(err.http_status(), None);

            let err = ft
                .download_and_wait(url, "/download_malformed_url.txt", TransferOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.code(), ErrorCode::InvalidUrl);
        }
        assert_eq!(fs.operations(), 0);
    }

    #[tokio::test]
    async fn test_malformed_url_wins_over_missing_file() {
        let fs = MemoryFileSystem::new();
        let ft = transfer(&fs);
        let err = ft
            .upload_and_wait("/does_not_exist.txt", "httpssss://example.com", TransferOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidUrl);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let fs = MemoryFileSystem::new();
        let ft = transfer(&fs);
        // 端口 9 (discard) 不会被访问
        let err = ft
            .upload_and_wait("/does_not_exist.txt", "http://127.0.0.1:9/upload", TransferOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound);
        assert_eq!(err.http_status(), None);
        assert_eq!(err.source_url(), "/does_not_exist.txt");
    }

    #[tokio::test]
    async fn test_upload_directory_is_file_not_found() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/dir/a.txt", Vec::new());
        let ft = transfer(&fs);
        let err = ft
            .upload_and_wait("/dir", "http://127.0.0.1:9/upload", TransferOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound);
    }

    #[tokio::test]
    async fn test_bad_download_path() {
        let fs = MemoryFileSystem::new();
        let ft = transfer(&fs);
        let err = ft
            .download_and_wait("http://127.0.0.1:9/", "c:\\54321", TransferOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound);
        assert_eq!(fs.operations(), 0);
    }

    #[tokio::test]
    async fn test_failed_download_keeps_existing_target() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/keep.txt", b"precious".to_vec());
        let ft = transfer(&fs);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = ft
            .download_and_wait(format!("http://127.0.0.1:{port}/"), "/keep.txt", TransferOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Connection);
        assert_eq!(fs.read_file("/keep.txt").unwrap(), b"precious");
    }

    #[tokio::test]
    async fn test_download_into_directory() {
        let fs = MemoryFileSystem::new();
        fs.insert_file("/dir/a.txt", Vec::new());
        let ft = transfer(&fs);
        let err = ft
            .download_and_wait("http://127.0.0.1:9/", "/dir", TransferOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::FileNotFound);
        assert!(fs.contains(std::path::Path::new("/dir/a.txt")));
    }

    #[tokio::test]
    async fn test_invalid_header_fails_before_network() {
        let fs = MemoryFileSystem::new();
        let ft = transfer(&fs);
        let options = TransferOptions::new().header("Bad Header", "v");
        let err = ft
            .download_and_wait("http://127.0.0.1:9/", "/out.txt", options)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Connection);
        assert_eq!(err.http_status(), None);
        assert!(!fs.contains(std::path::Path::new("/out.txt")));
    }

    #[tokio::test]
    async fn test_abort_after_finish_is_noop() {
        let fs = MemoryFileSystem::new();
        let ft = transfer(&fs);
        let mut handle = ft.upload("relative.txt", "http://127.0.0.1:9/", TransferOptions::default());
        let abort = handle.abort_handle();

        let Some(TransferEvent::Finished(outcome)) = handle.next_event().await else {
            panic!("expected terminal event");
        };
        assert!(!outcome.is_success());
        assert!(handle.next_event().await.is_none());

        assert!(abort.is_finished());
        assert!(!abort.abort());
        assert_eq!(ft.abort_all(), 0);
    }
}
