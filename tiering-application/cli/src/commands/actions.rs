//! Actions 命令处理

use anyhow::Result;
use serde::Serialize;

use tiering_executor::ActionRegistry;

use super::output::{output_formatted, OutputFormat, TableRow};

#[derive(Serialize)]
struct ActionRow {
    name: String,
    description: String,
}

impl TableRow for ActionRow {
    fn headers() -> Vec<&'static str> {
        vec!["动作", "说明"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.description.clone()]
    }

    fn widths() -> Vec<usize> {
        vec![30, 60]
    }
}

pub fn handle(format: OutputFormat) -> Result<()> {
    let registry = ActionRegistry::with_builtin()?;
    let rows: Vec<ActionRow> = registry
        .list()
        .into_iter()
        .map(|(name, description)| ActionRow {
            name: name.to_string(),
            description: description.to_string(),
        })
        .collect();

    output_formatted(&rows, format)
}
