//! 回调风格的传输接口
//!
//! 与事件通道等价：若干次 `on_progress`，然后 `on_success` 或 `on_failure` 恰好一次。

use crate::error::TransferError;
use crate::transfer::engine::{FileTransfer, TransferHandle};
use crate::transfer::types::{ProgressEvent, TransferOptions, TransferOutcome, TransferResult};
use tokio::sync::mpsc;

/// 传输回调
pub trait TransferCallback: Send + Sync {
    /// 进度更新（事件通道已满时部分进度会被跳过）
    fn on_progress(&self, _progress: &ProgressEvent) {}
    /// 传输成功
    fn on_success(&self, result: TransferResult);
    /// 传输失败（含取消）
    fn on_failure(&self, error: TransferError);
}

/// 把传输的事件依次交给回调，返回是否成功
pub async fn deliver<C>(handle: TransferHandle, callback: &C) -> bool
where
    C: TransferCallback + ?Sized,
{
    match handle.wait_with(|progress| callback.on_progress(progress)).await {
        TransferOutcome::Success(result) => {
            callback.on_success(result);
            true
        }
        TransferOutcome::Failure(error) => {
            callback.on_failure(error);
            false
        }
    }
}

impl FileTransfer {
    /// 上传并通过回调报告进度和结果
    pub async fn upload_with_callback<C>(
        &self,
        local_path: impl Into<String>,
        server_url: impl Into<String>,
        options: TransferOptions,
        callback: &C,
    ) -> bool
    where
        C: TransferCallback + ?Sized,
    {
        deliver(self.upload(local_path, server_url, options), callback).await
    }

    /// 下载并通过回调报告进度和结果
    pub async fn download_with_callback<C>(
        &self,
        source_url: impl Into<String>,
        target_path: impl Into<String>,
        options: TransferOptions,
        callback: &C,
    ) -> bool
    where
        C: TransferCallback + ?Sized,
    {
        deliver(self.download(source_url, target_path, options), callback).await
    }
}

/// 把回调转换为通道事件
///
/// 通道无界，终结事件不会因为积压的进度事件而丢失。
pub struct SimpleTransferCallback {
    tx: mpsc::UnboundedSender<CallbackEvent>,
}

#[derive(Debug)]
pub enum CallbackEvent {
    Progress(ProgressEvent),
    Success(TransferResult),
    Failure(TransferError),
}

impl SimpleTransferCallback {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CallbackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TransferCallback for SimpleTransferCallback {
    fn on_progress(&self, progress: &ProgressEvent) {
        let _ = self.tx.send(CallbackEvent::Progress(*progress));
    }

    fn on_success(&self, result: TransferResult) {
        let _ = self.tx.send(CallbackEvent::Success(result));
    }

    fn on_failure(&self, error: TransferError) {
        let _ = self.tx.send(CallbackEvent::Failure(error));
    }
}
