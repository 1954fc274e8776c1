use anyhow::Result;
use colored::Colorize;

use crate::Context;
use crate::commands::Session;
use crate::ui;

pub fn run(ctx: &Context) -> Result<()> {
    let session = Session::load(ctx)?;
    let source = session
        .settings
        .catalog
        .path
        .as_deref()
        .unwrap_or("built-in");

    ui::header("Module Catalog");
    ui::kv("Source", source);

    let modules = session.registry.all();
    let width = modules.iter().map(|m| m.name().len()).max().unwrap_or(0);
    println!();
    for module in &modules {
        let version = module.version().unwrap_or_else(|| "-".to_string());
        let optional = if module.optional() {
            " optional".yellow().to_string()
        } else {
            String::new()
        };
        println!(
            "  {:<width$}  {:<10}{optional}",
            module.name().bold(),
            version.dimmed()
        );
        println!("  {:<width$}  {}", "", module.description());
        if !module.depends_on().is_empty() {
            println!(
                "  {:<width$}  {} {}",
                "",
                "needs".dimmed(),
                module.depends_on().join(", ")
            );
        }
        if let Some(health) = module.health_check() {
            println!(
                "  {:<width$}  {} {}",
                "",
                "health".dimmed(),
                format!(
                    "every {}, up to {}",
                    ui::format_duration(health.interval),
                    ui::format_duration(health.timeout)
                )
                .dimmed()
            );
        }
    }

    println!();
    ui::dim(&ui::plural(modules.len(), "module"));
    Ok(())
}
