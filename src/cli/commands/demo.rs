//! Demo command: save the demo graph into SQLite.

use crate::config::{SaveSettings, load_settings};
use crate::demo::{self, DemoGraph};
use crate::driver::{RecordingDriver, SqliteStorage};
use crate::error::Result;
use crate::model::EntityArena;
use crate::saver::{self, SaveContext};
use crate::schema::Schema;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct EntityOutput {
    name: &'static str,
    type_name: String,
    id: Option<i64>,
    version: Option<i64>,
}

#[derive(Serialize)]
struct TableCount {
    table: String,
    rows: i64,
}

#[derive(Serialize)]
struct DemoOutput {
    dry_run: bool,
    max_rows_per_statement: usize,
    statements: usize,
    entities: Vec<EntityOutput>,
    tables: Vec<TableCount>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sql: Vec<String>,
}

fn entities(arena: &EntityArena, demo: &DemoGraph) -> Vec<EntityOutput> {
    [
        ("genre", demo.genre),
        ("label", demo.label),
        ("artist", demo.artist),
        ("album", demo.album),
        ("review", demo.review),
    ]
    .into_iter()
    .map(|(name, handle)| {
        let e = &arena[handle];
        EntityOutput {
            name,
            type_name: e.type_name().to_string(),
            id: e.id(),
            version: e.version(),
        }
    })
    .collect()
}

fn table_counts(storage: &SqliteStorage, schema: &Schema) -> Result<Vec<TableCount>> {
    let mut out = Vec::new();
    for table in schema.tables() {
        let def = table.def();
        let names = std::iter::once(def.table.clone()).chain(def.collections.iter().map(|c| c.table.clone()));
        for name in names {
            let rows = storage.count(&name)?;
            out.push(TableCount { table: name, rows });
        }
    }
    Ok(out)
}

/// Execute the demo command.
///
/// With `dry_run` the save runs inside a transaction that is rolled back,
/// and every statement is printed with its parameters inlined.
///
/// # Errors
///
/// Returns an error if the settings, the database or the save fail.
pub fn execute(db: Option<&Path>, dry_run: bool, config: Option<&Path>, json: bool) -> Result<()> {
    let settings: SaveSettings = load_settings(config)?;
    let schema = demo::schema();
    let mut storage = match db {
        Some(path) => SqliteStorage::open(path)?,
        None => SqliteStorage::open_memory()?,
    };
    storage.create_tables(&schema)?;

    let mut arena = EntityArena::new();
    let graph = demo::build_graph(&mut arena);
    let ctx = SaveContext::new(&schema).with_settings(settings.clone());

    let commands = {
        let tx = storage.conn_mut().transaction()?;
        let recorder = RecordingDriver::new(&tx);
        saver::save(&ctx, &recorder, &mut arena, &graph.roots())?;
        let commands = recorder.commands();
        drop(recorder);
        if dry_run {
            tx.rollback()?;
        } else {
            tx.commit()?;
        }
        commands
    };

    let output = DemoOutput {
        dry_run,
        max_rows_per_statement: settings.rows_per_statement(),
        statements: commands.len(),
        entities: entities(&arena, &graph),
        tables: table_counts(&storage, &schema)?,
        sql: if dry_run {
            commands.iter().map(|c| c.to_inline_sql()).collect()
        } else {
            Vec::new()
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if dry_run {
        println!("{}", "Statements (rolled back)".yellow().bold());
        for sql in &output.sql {
            println!("  {sql};");
        }
        println!();
    }

    let heading = if dry_run { "Demo graph (not committed)" } else { "Saved demo graph" };
    println!(
        "{} {}",
        heading.green().bold(),
        format!("({} statements)", output.statements).dimmed()
    );
    for entity in &output.entities {
        let id = entity.id.map_or_else(|| "-".to_string(), |id| id.to_string());
        let version = entity
            .version
            .map_or_else(String::new, |v| format!(" v{v}"));
        println!("  {:<8} {}({id}){}", entity.name, entity.type_name, version.dimmed());
    }

    println!("{}", "Rows".cyan().bold());
    for count in &output.tables {
        println!("  {:<14} {}", count.table, count.rows);
    }
    Ok(())
}
