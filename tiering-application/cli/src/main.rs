//! 分层存储测试 CLI

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::output::OutputFormat;

#[derive(Parser)]
#[command(name = "tiertest")]
#[command(about = "分层存储服务测试执行器", long_about = None)]
#[command(version)]
struct Cli {
    /// 日志级别 (RUST_LOG 优先，未指定时使用配置文件中的 log_level)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 执行测试套件
    Run(RunArgs),

    /// 列出套件中的用例
    List(ListArgs),

    /// 列出已注册的动作
    Actions {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

/// 用例筛选参数
#[derive(Args)]
pub struct FilterArgs {
    /// 只选择该分类的用例
    #[arg(long)]
    category: Option<String>,

    /// 只选择该优先级的用例 (P0/P1/P2)
    #[arg(long)]
    priority: Option<String>,

    /// 只选择指定 ID 的用例 (可重复)
    #[arg(long = "id")]
    ids: Vec<String>,
}

#[derive(Args)]
pub struct RunArgs {
    /// 套件文件路径 (.yaml/.yml/.json)
    suite: String,

    /// 被测服务地址 (覆盖配置文件)
    #[arg(long)]
    base_url: Option<String>,

    /// 使用进程内的内存服务
    #[arg(long, conflicts_with = "base_url")]
    memory: bool,

    /// 执行器配置文件
    #[arg(short, long)]
    config: Option<String>,

    #[command(flatten)]
    filter: FilterArgs,

    /// 输出格式
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// 报告输出文件
    #[arg(short, long)]
    output: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    /// 套件文件路径
    suite: String,

    #[command(flatten)]
    filter: FilterArgs,

    /// 输出格式
    #[arg(short, long, value_enum, default_value = "table")]
    format: OutputFormat,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run(args) => {
            let settings = config::load_settings(args.config.as_deref(), args.base_url.as_deref())?;
            init_logging(cli.log_level.as_deref().unwrap_or(&settings.log_level));
            info!("tiertest 启动");
            commands::run::handle(args, settings).await?
        }
        Commands::List(args) => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            commands::list::handle(args)?;
            0
        }
        Commands::Actions { format } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            commands::actions::handle(format)?;
            0
        }
    };

    std::process::exit(exit_code)
}
