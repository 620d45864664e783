//! Run 命令处理

use anyhow::{Context, Result};
use colored::{ColoredString, Colorize};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;

use tiering_boundary::{HttpTieringClient, MemoryTieringService, TieringService};
use tiering_executor::{
    ActionRegistry, CaseReport, ExecutorSettings, Outcome, SuiteReport, TestRunner,
};

use super::output::{render, OutputFormat};
use crate::config::expand_path;
use crate::RunArgs;

/// 执行套件，返回进程退出码
pub async fn handle(args: RunArgs, settings: ExecutorSettings) -> Result<i32> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(format!("加载套件: {}", args.suite));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let suite = super::load_suite(&args.suite, &args.filter)?;
    spinner.finish_with_message(format!(
        "{} 套件加载成功: {} 个用例",
        "✓".green().bold(),
        suite.len().to_string().cyan()
    ));

    if suite.is_empty() {
        println!("{}", "没有匹配的用例".yellow());
        return Ok(0);
    }

    let service: Arc<dyn TieringService> = if args.memory {
        Arc::new(MemoryTieringService::new())
    } else {
        Arc::new(HttpTieringClient::new(settings.service.clone())?)
    };
    println!("被测服务: {}", service.name().cyan());

    let registry = Arc::new(ActionRegistry::with_builtin()?);
    let runner = TestRunner::new(service, registry).with_settings(settings);

    let progress = ProgressBar::new(suite.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=>-"),
    );

    let report = runner
        .run_suite_with(&suite, |case| {
            progress.set_message(case.id.clone());
            progress.inc(1);
        })
        .await;
    progress.finish_and_clear();

    if let Some(output) = &args.output {
        let path = expand_path(output)?;
        std::fs::write(&path, render(&report, args.format)?)
            .with_context(|| format!("写入报告失败: {:?}", path))?;
        print_report(&report);
        println!("报告已写入: {}", path.display().to_string().cyan());
    } else if args.format == OutputFormat::Table {
        print_report(&report);
    } else {
        println!("{}", render(&report, args.format)?);
    }

    Ok(report.exit_code())
}

fn outcome_icon(outcome: Outcome) -> ColoredString {
    match outcome {
        Outcome::Passed => "✓".green(),
        Outcome::Failed => "✗".red(),
        Outcome::Error => "!".yellow(),
    }
}

fn print_case(case: &CaseReport) {
    println!(
        "{} {} [{}] {} ({} ms)",
        outcome_icon(case.verdict).bold(),
        case.id.cyan(),
        case.priority,
        case.name,
        case.duration_ms.to_string().bright_black()
    );

    let Some(failure) = case.failure() else {
        return;
    };
    println!(
        "   步骤 {}/{} {} {}: {}",
        failure.index + 1,
        case.steps_total,
        failure.action.bold(),
        failure.outcome,
        failure.detail.red()
    );
    for worker in failure.workers.iter().filter(|w| !w.is_passed()) {
        println!(
            "     worker {} {}: {}",
            worker.index,
            worker.outcome,
            worker.detail.bright_black()
        );
    }
}

fn print_report(report: &SuiteReport) {
    println!("\n{}", "=".repeat(60));
    println!("{}", "执行报告".bold());
    println!("{}", "=".repeat(60));
    println!();

    for case in &report.cases {
        print_case(case);
    }

    println!();
    println!("用例统计:");
    println!("  总数: {}", report.total.to_string().bright_blue());
    println!("  通过: {}", report.passed.to_string().green());
    println!("  失败: {}", report.failed.to_string().red());
    println!("  错误: {}", report.errored.to_string().yellow());
    println!("  耗时: {} ms", report.duration_ms.to_string().bright_black());

    println!("{}", "=".repeat(60));
    if report.all_passed() {
        println!("{} 全部用例通过", "✓".green().bold());
    } else {
        println!("{} 存在未通过的用例", "✗".red().bold());
    }
    println!("{}", "=".repeat(60));
}
