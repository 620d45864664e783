//! CLI 通用输出格式化模块
//!
//! 提供 table/json/yaml 三种输出格式

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;

/// 输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

/// 可输出为表格行的数据 trait
pub trait TableRow {
    /// 返回表格列标题
    fn headers() -> Vec<&'static str>;

    /// 返回该项的表格行数据
    fn row(&self) -> Vec<String>;

    /// 各列宽度 (默认 20)
    fn widths() -> Vec<usize> {
        Self::headers().iter().map(|_| 20).collect()
    }
}

fn format_line(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end()
        .to_string()
}

/// 表格格式输出
pub fn print_table<T: TableRow>(items: &[T]) {
    let widths = T::widths();
    let headers: Vec<String> = T::headers().iter().map(|h| h.to_string()).collect();

    let header_line = format_line(&headers, &widths);
    println!("{}", header_line);
    println!("{}", "-".repeat(widths.iter().sum::<usize>() + widths.len().saturating_sub(1)));

    for item in items {
        println!("{}", format_line(&item.row(), &widths));
    }
}

/// 序列化为 JSON / YAML
pub fn render<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
        OutputFormat::Json | OutputFormat::Table => Ok(serde_json::to_string_pretty(value)?),
    }
}

/// 根据格式参数选择输出方式
pub fn output_formatted<T: TableRow + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => print_table(items),
        other => println!("{}", render(items, other)?),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        name: String,
    }

    #[test]
    fn test_format_line_pads_columns() {
        let line = format_line(&["a".to_string(), "b".to_string()], &[4, 4]);
        assert_eq!(line, "a    b");
    }

    #[test]
    fn test_render() {
        let rows = vec![Row {
            name: "upload".to_string(),
        }];
        assert!(render(&rows, OutputFormat::Json).unwrap().contains("\"name\": \"upload\""));
        assert!(render(&rows, OutputFormat::Yaml).unwrap().contains("name: upload"));
    }
}
