//! List 命令处理

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use super::output::{output_formatted, OutputFormat, TableRow};
use crate::ListArgs;

#[derive(Serialize)]
struct CaseRow {
    id: String,
    priority: String,
    category: String,
    name: String,
    steps: usize,
}

impl TableRow for CaseRow {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "优先级", "分类", "步骤", "名称"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.priority.clone(),
            self.category.clone(),
            self.steps.to_string(),
            self.name.clone(),
        ]
    }

    fn widths() -> Vec<usize> {
        vec![16, 8, 24, 6, 40]
    }
}

pub fn handle(args: ListArgs) -> Result<()> {
    let suite = super::load_suite(&args.suite, &args.filter)?;

    if suite.is_empty() {
        println!("{}", "没有匹配的用例".yellow());
        return Ok(());
    }

    let rows: Vec<CaseRow> = suite
        .cases
        .iter()
        .map(|case| CaseRow {
            id: case.id.clone(),
            priority: case.priority.to_string(),
            category: case.category.clone().unwrap_or_default(),
            name: case.name.clone(),
            steps: case.steps.len(),
        })
        .collect();

    output_formatted(&rows, args.format)?;

    if args.format == OutputFormat::Table {
        println!();
        println!(
            "共 {} 个用例, 分类: {}",
            suite.len().to_string().green(),
            suite.categories().join(", ").bright_black()
        );
    }
    Ok(())
}
