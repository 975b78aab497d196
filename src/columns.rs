//! `columns` command: the resolved mapping next to the live table.
//!
//! Lists every logical field, the physical column it maps to and whether the
//! table currently has that column, so a wrong mapping shows up before a
//! reconciliation run does.

use anyhow::{Context, Result};
use log::info;

use crate::{
    config::AppConfig,
    mapping::{ColumnMapping, Field},
    report,
    schema::TableLayout,
    store::RecordStore,
};

pub fn execute(config: &AppConfig) -> Result<()> {
    let mapping = config.column_mapping().context("Resolving column mapping")?;
    let path = config.database.path()?;
    let store = RecordStore::new(&path, mapping);
    let layout = store
        .layout()
        .with_context(|| format!("Inspecting table '{}' in {path:?}", store.mapping().table()))?;

    print!("{}", render(store.mapping(), &layout));
    let missing = Field::ALL
        .into_iter()
        .filter(|field| layout.index(*field).is_none())
        .count();
    info!(
        "Listed {} mapped field(s) for table '{}'; {missing} column(s) absent",
        Field::ALL.len(),
        store.mapping().table()
    );
    Ok(())
}

pub fn render(mapping: &ColumnMapping, layout: &TableLayout) -> String {
    let rows = mapping
        .entries()
        .map(|(field, column)| {
            let mut role = String::new();
            if field.is_required() {
                role.push_str("required");
            } else if field.is_bookkeeping() {
                role.push_str("bookkeeping");
            }
            vec![
                field.to_string(),
                column.to_string(),
                layout.presence(field).to_string(),
                role,
            ]
        })
        .collect::<Vec<_>>();
    let mut output = report::render_table(&["field", "column", "status", "role"], &rows);
    output.push_str(&pending_rule(mapping));
    output.push('\n');
    output
}

/// Which rows a `sync` run selects. Only a configured `sync_flag` key enables
/// the flag rule; an omitted key falls back to the remote id.
fn pending_rule(mapping: &ColumnMapping) -> String {
    let bookkeeping = mapping.bookkeeping();
    if mapping.supports_sync_columns() {
        format!("Pending rows: '{}' not true", bookkeeping.flag)
    } else {
        format!(
            "Pending rows: '{}' is null (no sync_flag configured)",
            bookkeeping.remote_id
        )
    }
}
