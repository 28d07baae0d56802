use crate::cli::{ListExecutionsArgs, ShowExecutionArgs};
use crate::commands::AppContext;
use crate::error::Result;
use colored::Colorize;
use comfy_table::{presets, Cell, Table};
use cref_db::GroupFilter;

fn status_cell(successful: Option<bool>) -> Cell {
    match successful {
        Some(true) => Cell::new("ok".green().to_string()),
        Some(false) => Cell::new("failed".red().to_string()),
        None => Cell::new("pending".dimmed().to_string()),
    }
}

pub fn handle_list(args: ListExecutionsArgs, context: &AppContext) -> Result<()> {
    let summary = context.db.summary(&GroupFilter {
        provider: args.provider,
        diagnostic: args.diagnostic,
        satisfiable_only: false,
    })?;

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header([
        "Group",
        "Provider",
        "Diagnostic",
        "Key",
        "Execution",
        "Status",
    ]);
    for row in &summary {
        table.add_row([
            Cell::new(row.group_id),
            Cell::new(&row.provider),
            Cell::new(&row.diagnostic),
            Cell::new(&row.key),
            match row.execution_id {
                Some(id) => Cell::new(id),
                None => Cell::new("-"),
            },
            status_cell(row.successful),
        ]);
    }
    println!("{table}");
    println!("{} execution group(s)", summary.len());
    Ok(())
}

pub fn handle_show(args: ShowExecutionArgs, context: &AppContext) -> Result<()> {
    let group = context.db.group(args.group_id)?;
    let history = context.db.executions(args.group_id)?;

    println!("Group {}", group.id.to_string().bold());
    println!("  Provider:    {}", group.provider_slug);
    println!("  Diagnostic:  {}", group.diagnostic_slug);
    println!("  Key:         {}", group.key);
    println!(
        "  Satisfiable: {}",
        if group.satisfiable { "yes" } else { "no" }
    );
    println!("  Datasets:");
    for dataset in &group.selection.datasets {
        println!(
            "    - {} {} ({})",
            dataset.source_type,
            dataset.identity(),
            dataset.path.display()
        );
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header(["Execution", "Status", "Error kind", "Started", "Finished", "Result"]);
    for execution in &history {
        table.add_row([
            Cell::new(execution.id),
            status_cell(execution.successful),
            match execution.error_kind {
                Some(kind) => Cell::new(kind),
                None => Cell::new("-"),
            },
            Cell::new(execution.started_at.to_rfc3339()),
            match &execution.finished_at {
                Some(ts) => Cell::new(ts.to_rfc3339()),
                None => Cell::new("-"),
            },
            match &execution.result_path {
                Some(path) => Cell::new(path.display()),
                None => Cell::new("-"),
            },
        ]);
    }
    println!("{table}");
    Ok(())
}
