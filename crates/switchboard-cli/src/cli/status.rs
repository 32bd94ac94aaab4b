//! `swbd status`: effective configuration and outbox counts.

use anyhow::Result;
use console::style;

use crate::state::AppState;

pub async fn status(state: &AppState, json: bool) -> Result<()> {
    let store = state.open_store().await?;
    let counts = store.count_outbox_by_status().await?;
    store.pool().close().await;

    if json {
        let outbox: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(status, n)| (status.to_string(), serde_json::Value::from(*n)))
            .collect();
        let out = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "data_dir": state.data_dir.display().to_string(),
            "database_url": state.database_url,
            "max_in_flight": state.config.max_in_flight,
            "error_buffer": state.config.error_buffer,
            "ingress_buffer": state.config.ingress_capacity(),
            "outbox": outbox,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("  {} Switchboard v{}", style("⚡").bold(), env!("CARGO_PKG_VERSION"));
    println!();
    println!("  {}", style("── Bus ──").dim());
    println!("  Max in flight:  {}", style(state.config.max_in_flight).bold());
    println!("  Error buffer:   {}", state.config.error_buffer);
    println!("  Ingress buffer: {}", state.config.ingress_capacity());
    println!();
    println!("  {}", style("── Store ──").dim());
    println!("  Data dir: {}", style(state.data_dir.display()).cyan());
    println!("  Database: {}", state.database_url);
    if counts.is_empty() {
        println!("  Outbox:   {}", style("empty").dim());
    }
    for (status, n) in &counts {
        println!("  Outbox {status}: {n}");
    }
    println!();
    Ok(())
}
