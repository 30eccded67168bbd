use anyhow::{bail, Context};
use clap::{CommandFactory, Parser};
use remotejob_lib::core::{BatchSummary, Direction, ProgressUpdate};
use remotejob_lib::logging::init_logging;
use remotejob_lib::{ProcessTransport, RunConfig, RunEngine, RunReport};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 把输入目录传到远程主机，执行命令，再把结果目录取回本地
#[derive(Debug, Parser)]
#[command(name = "remotejob", version, about)]
struct Cli {
    /// 本地输入目录（覆盖配置中的 inputs_to_transfer）
    #[arg(short = 's', long = "source_dir")]
    source_dir: Option<PathBuf>,

    /// 本地结果目录（覆盖配置中的 local_results_dir）
    #[arg(short = 'd', long = "destination")]
    destination: Option<PathBuf>,

    /// 配置文档路径
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// 图形界面
    #[arg(short = 'g', long = "gui")]
    gui: bool,

    /// 并发传输数
    #[arg(long)]
    workers: Option<usize>,

    /// 日志级别
    #[arg(long = "log-level")]
    log_level: Option<String>,

    /// 运行报告输出路径（JSON）
    #[arg(long)]
    report: Option<PathBuf>,

    /// 整体超时（秒），到时取消运行
    #[arg(long)]
    timeout: Option<u64>,
}

fn load_config(cli: &Cli) -> anyhow::Result<RunConfig> {
    let Some(path) = &cli.config else {
        bail!("缺少配置文档，请使用 --config 指定");
    };
    let mut config = RunConfig::load(path)?;
    config.apply_overrides(cli.source_dir.clone(), cli.destination.clone(), cli.workers)?;
    if let Some(level) = &cli.log_level {
        config.log.level = level.clone();
    }
    Ok(config)
}

/// 进度行状态
///
/// 各 worker 完成后各自发送更新，到达顺序不保证，这里只让显示的完成数单调前进。
#[derive(Debug, Default)]
struct ProgressLine {
    direction: Option<Direction>,
    remaining: usize,
}

impl ProgressLine {
    /// 返回要写到 stderr 的文本，过时的更新返回 `None`
    fn render(&mut self, update: &ProgressUpdate) -> Option<String> {
        let mut out = String::new();
        match self.direction {
            Some(d) if d == update.direction => {
                if update.remaining >= self.remaining {
                    return None;
                }
            }
            Some(_) => out.push('\n'),
            None => {}
        }
        self.direction = Some(update.direction);
        self.remaining = update.remaining;

        let label = match update.direction {
            Direction::Outbound => "上传",
            Direction::Inbound => "下载",
        };
        let done = update.total - update.remaining;
        let percent = if update.total == 0 {
            100.0
        } else {
            done as f64 * 100.0 / update.total as f64
        };
        out.push_str(&format!("\r[{}] {}/{} ({:.1}%)", label, done, update.total, percent));
        Some(out)
    }

    /// 通道关闭后的收尾换行
    fn finish(&self) -> Option<&'static str> {
        self.direction.map(|_| "\n")
    }
}

/// 在 stderr 上显示进度
fn spawn_progress_printer() -> (mpsc::Sender<ProgressUpdate>, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<ProgressUpdate>(64);
    let handle = tokio::spawn(async move {
        let mut stderr = std::io::stderr();
        let mut line = ProgressLine::default();
        while let Some(update) = rx.recv().await {
            if let Some(text) = line.render(&update) {
                let _ = write!(stderr, "{}", text);
            }
        }
        if let Some(text) = line.finish() {
            let _ = write!(stderr, "{}", text);
        }
    });
    (tx, handle)
}

fn print_summary(summary: &BatchSummary) {
    let label = match summary.direction {
        Direction::Outbound => "上传",
        Direction::Inbound => "下载",
    };
    println!(
        "{}: {} 个文件, 成功 {}, 失败 {}",
        label,
        summary.total,
        summary.completed,
        summary.failed.len()
    );
    for failed in &summary.failed {
        println!("  [{}] {}: {}", failed.status, failed.source_path, failed.reason);
    }
}

fn write_report(path: &Path, report: &RunReport) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(report)?;
    std::fs::write(path, content)
        .with_context(|| format!("无法写入运行报告 {}", path.display()))
}

async fn run(cli: Cli, config: RunConfig) -> anyhow::Result<RunReport> {
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，正在取消...");
            ctrl_c.cancel();
        }
    });

    if let Some(secs) = cli.timeout {
        let timeout = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!("运行超过 {}s，正在取消...", secs);
            timeout.cancel();
        });
    }

    let transport = Arc::new(ProcessTransport::new(config.transport_config()));
    let engine = RunEngine::new(config, transport).with_cancel(cancel);

    let (progress_tx, printer) = spawn_progress_printer();
    let result = engine.run(Some(progress_tx)).await;
    let _ = printer.await;

    let report = result.context("运行失败")?;

    if let Some(path) = &cli.report {
        write_report(path, &report)?;
        info!("运行报告已写入 {}", path.display());
    }

    Ok(report)
}

#[tokio::main]
async fn main() -> ExitCode {
    // 无参数时只打印帮助
    if std::env::args_os().len() <= 1 {
        let _ = Cli::command().print_help();
        println!();
        return ExitCode::SUCCESS;
    }

    let cli = Cli::parse();

    if cli.gui {
        eprintln!("图形界面不在此版本中提供，请使用命令行参数");
        return ExitCode::SUCCESS;
    }

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("错误: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_logging(&config.log);

    match run(cli, config).await {
        Ok(report) => {
            print_summary(&report.outbound);
            print_summary(&report.inbound);
            if report.has_failures() {
                warn!("部分文件传输失败，详见上方列表");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
