//! Model listing command handler

use crate::commands::AppContext;
use crate::error::Result;
use colored::Colorize;
use prettytable::{format, Table};

/// List the models a backend can serve.
pub async fn list_models(ctx: &AppContext, backend: &str) -> Result<()> {
    let models = ctx.gateway.list_models(backend).await?;
    if models.is_empty() {
        println!("{}", format!("No models known to {}.", backend).yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
    table.add_row(prettytable::row![
        "Model".bold(),
        "Display Name".bold(),
        "Context".bold()
    ]);
    for model in models {
        let context = model
            .context_window
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(prettytable::row![model.name.cyan(), model.display_name, context]);
    }
    table.printstd();
    Ok(())
}
