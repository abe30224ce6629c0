//! FileTransfer CLI
//!
//! 命令行客户端，直接调用 filetransfer-core 完成上传/下载

use anyhow::Result;
use clap::{Parser, Subcommand};
use filetransfer_core::{
    EchoServer, FileTransfer, HeaderValue, ProgressEvent, TransferConfig, TransferHandle,
    TransferOptions, TransferOutcome, UploadMethod,
};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "filetransfer", version, about = "HTTP 文件上传/下载工具")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 上传文件 (multipart/form-data)
    Upload {
        /// 本地文件路径
        file: String,
        /// 服务器地址
        url: String,
        /// 文件字段名
        #[arg(long)]
        file_key: Option<String>,
        /// 上报的文件名
        #[arg(long)]
        file_name: Option<String>,
        #[arg(long)]
        mime_type: Option<String>,
        /// 表单字段 (key=value，可重复)
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
        /// 请求头 (name=value，同名重复时发送多条)
        #[arg(long = "header", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,
        /// 使用 PUT 代替 POST
        #[arg(long)]
        put: bool,
    },
    /// 下载文件
    Download {
        /// 源地址
        url: String,
        /// 保存路径
        target: String,
        #[arg(long = "header", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,
    },
    /// 启动本地回显服务器
    Serve {
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// 查看或初始化配置文件
    Config {
        /// 写入默认配置
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = TransferConfig::load();

    // 桥接 log crate（filetransfer-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.filter_directive())),
        )
        .try_init();

    match cli.command {
        Commands::Upload {
            file,
            url,
            file_key,
            file_name,
            mime_type,
            params,
            headers,
            put,
        } => {
            let mut options = TransferOptions::new();
            if let Some(key) = file_key {
                options = options.file_key(key);
            }
            if let Some(name) = file_name {
                options = options.file_name(name);
            }
            if let Some(mime) = mime_type {
                options = options.mime_type(mime);
            }
            if put {
                options = options.http_method(UploadMethod::Put);
            }
            for (key, value) in params {
                options = options.param(key, value);
            }
            options = apply_headers(options, headers);

            let ft = FileTransfer::new(config)?;
            let local = absolute(&file)?;
            println!("📤 上传: {} -> {}", local, url);
            let outcome = drive(ft.upload(local, url, options)).await;
            Ok(report(outcome))
        }
        Commands::Download {
            url,
            target,
            headers,
        } => {
            let options = apply_headers(TransferOptions::new(), headers);

            let ft = FileTransfer::new(config)?;
            let local = absolute(&target)?;
            println!("📥 下载: {} -> {}", url, local);
            let outcome = drive(ft.download(url, local, options)).await;
            Ok(report(outcome))
        }
        Commands::Serve { port } => {
            let mut server = EchoServer::new().with_port(port);
            let port = server.start().await?;
            println!("🌐 回显服务器: http://127.0.0.1:{}/", port);
            println!("   按 Ctrl-C 停止");
            tokio::signal::ctrl_c().await?;
            server.shutdown();
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { init } => {
            let path = TransferConfig::config_path();
            if init {
                let path = TransferConfig::default().save()?;
                println!("✅ 已写入默认配置: {}", path.display());
            } else {
                println!("配置文件: {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&TransferConfig::load())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 等待传输结束，期间打印进度，Ctrl-C 取消
async fn drive(handle: TransferHandle) -> TransferOutcome {
    let abort = handle.abort_handle();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⏹ 正在取消...");
            abort.abort();
        }
    });

    let outcome = handle.wait_with(print_progress).await;
    ctrl_c.abort();
    eprintln!();
    outcome
}

fn print_progress(progress: &ProgressEvent) {
    match progress.fraction() {
        Some(fraction) => eprint!(
            "\r   {} / {} bytes ({:.1}%)",
            progress.loaded,
            progress.total.unwrap_or_default(),
            fraction * 100.0
        ),
        None => eprint!("\r   {} bytes", progress.loaded),
    }
}

/// 打印结果，失败时以错误码退出
fn report(outcome: TransferOutcome) -> ExitCode {
    match outcome {
        TransferOutcome::Success(result) => {
            println!("✅ 完成: HTTP {}, {} bytes", result.response_code, result.bytes);
            if !result.response.is_empty() {
                println!("{}", result.response_text());
            }
            ExitCode::SUCCESS
        }
        TransferOutcome::Failure(error) => {
            tracing::debug!("Transfer failed: {:?}", error);
            match serde_json::to_string_pretty(&error) {
                Ok(json) => println!("{}", json),
                Err(_) => println!("{}", error),
            }
            ExitCode::from(error.code().as_u8())
        }
    }
}

/// 同名请求头合并为多值
fn apply_headers(mut options: TransferOptions, headers: Vec<(String, String)>) -> TransferOptions {
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (name, value) in headers {
        match grouped.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, values)) => values.push(value),
            None => grouped.push((name, vec![value])),
        }
    }
    for (name, mut values) in grouped {
        let value = if values.len() == 1 {
            HeaderValue::Single(values.remove(0))
        } else {
            HeaderValue::Multiple(values)
        };
        options = options.header(name, value);
    }
    options
}

/// 相对路径按当前目录展开，`file:` URL 原样保留
fn absolute(path: &str) -> Result<String> {
    if path.starts_with("file:") {
        return Ok(path.to_string());
    }
    Ok(std::path::absolute(path)?.to_string_lossy().to_string())
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {s:?}"))?;
    Ok((key.to_string(), value.to_string()))
}
