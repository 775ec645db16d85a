//! Explain command: print the statements compiled for the demo schema.

use crate::demo;
use crate::error::{Error, Result};
use crate::schema::{Schema, Table, TypeName};
use colored::Colorize;
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct TableOutput {
    type_name: String,
    table: String,
    type_id: i64,
    fingerprint: String,
    ddl: Vec<String>,
    insert: String,
    update: Option<String>,
    collections: Vec<CollectionOutput>,
}

#[derive(Serialize)]
struct CollectionOutput {
    field: String,
    statements: Vec<String>,
}

fn describe(schema: &Schema, table: &Table, rows: usize) -> TableOutput {
    let def = table.def();
    let ddl = def.create_table_sql(|target| schema.try_table(target).map(|t| t.def().table.clone()));
    TableOutput {
        type_name: table.type_name().to_string(),
        table: def.table.clone(),
        type_id: table.type_id(),
        fingerprint: table.fingerprint().to_string(),
        ddl,
        insert: table.insert_sql(rows).to_string(),
        update: table.update_sql(rows).map(|s| s.to_string()),
        collections: def
            .collections
            .iter()
            .map(|c| CollectionOutput {
                field: c.field.clone(),
                statements: table
                    .collection_sql(&c.field, rows)
                    .unwrap_or_default()
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            })
            .collect(),
    }
}

/// Execute the explain command.
///
/// # Errors
///
/// Returns an error if `type_name` is not a demo type or `rows` is zero.
pub fn execute(type_name: Option<&str>, rows: usize, json: bool) -> Result<()> {
    if rows == 0 {
        return Err(Error::Config("--rows must be at least 1".into()));
    }

    let schema = demo::schema();
    let tables: Vec<Arc<Table>> = match type_name {
        Some(name) => vec![schema.table(&TypeName::from(name.to_string()))?],
        None => schema.tables(),
    };
    let output: Vec<TableOutput> = tables.iter().map(|t| describe(&schema, t, rows)).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for table in &output {
        println!(
            "{} {}",
            table.type_name.cyan().bold(),
            format!("({}, type id {})", table.table, table.type_id).dimmed()
        );
        for ddl in &table.ddl {
            println!("{ddl};");
        }
        println!("{}", "-- insert".dimmed());
        println!("{};", table.insert);
        if let Some(update) = &table.update {
            println!("{}", "-- update".dimmed());
            println!("{update};");
        }
        for collection in &table.collections {
            println!("{}", format!("-- collection {}", collection.field).dimmed());
            for sql in &collection.statements {
                println!("{sql};");
            }
        }
        println!();
    }
    Ok(())
}
