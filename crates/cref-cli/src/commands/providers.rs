use crate::commands::AppContext;
use crate::error::Result;
use colored::Colorize;
use comfy_table::{presets, Cell, Table};
use cref_core::registry;

pub fn handle_list(context: &AppContext) -> Result<()> {
    let report = registry::discover(&context.config.paths.providers_dir);

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_header(["Provider", "Version", "Diagnostics"]);
    for provider in &report.providers {
        let diagnostics = provider
            .diagnostics
            .iter()
            .map(|d| d.slug.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row([
            Cell::new(&provider.slug),
            Cell::new(&provider.version),
            Cell::new(diagnostics),
        ]);
    }
    println!("{table}");
    println!("{} provider(s) discovered", report.providers.len());

    for error in &report.errors {
        eprintln!("  {} {}", "WARN".yellow().bold(), error);
    }
    Ok(())
}
