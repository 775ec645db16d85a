//! Version command implementation.

use crate::config::DEFAULT_MAX_ROWS;
use crate::error::Result;
use serde::Serialize;

#[derive(Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    build: &'a str,
    sqlite: &'a str,
    default_max_rows: usize,
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let output = VersionOutput {
        version: env!("CARGO_PKG_VERSION"),
        build: if cfg!(debug_assertions) { "dev" } else { "release" },
        sqlite: rusqlite::version(),
        default_max_rows: DEFAULT_MAX_ROWS,
    };

    if json {
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    println!(
        "gsave version {} ({}), SQLite {}",
        output.version, output.build, output.sqlite
    );
    Ok(())
}
