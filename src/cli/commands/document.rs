//! Document commands: validate, import and export.

use std::fs;
use std::path::Path;

use colored::Colorize;
use serde_json::json;

use crate::cli::commands::Workspace;
use crate::error::Result;
use crate::files::atomic_write;
use crate::sync::{parse_document, SyncMode};

/// Validate a document file.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read, `Validation` naming the first
/// defect.
pub fn validate(file: &Path, dir: Option<&Path>, json: bool) -> Result<()> {
    let text = fs::read_to_string(file)?;
    let workspace = Workspace::load(dir, None)?;
    workspace.registry().is_json_valid(&text)?;

    if json {
        println!("{}", serde_json::to_string(&json!({ "valid": true }))?);
    } else {
        println!("{} {} is a valid document", "✓".green(), file.display());
    }
    Ok(())
}

/// Import a document file.
///
/// # Errors
///
/// Returns `Io` if the file cannot be read, or the import failure.
pub fn import(file: &Path, dir: Option<&Path>, secret: Option<&str>, json: bool) -> Result<()> {
    let text = fs::read_to_string(file)?;
    let database = parse_document(&text)?.database;
    let workspace = Workspace::load(dir, secret)?;
    let changes = workspace.registry().import_from_json(&text)?;
    workspace.finish()?;

    if json {
        println!(
            "{}",
            serde_json::to_string(&json!({ "database": database, "changes": changes }))?
        );
    } else {
        println!(
            "{} Imported {} ({} row(s) changed)",
            "✓".green(),
            database.bold(),
            changes.changes
        );
    }
    Ok(())
}

/// Export a database, to `out` or stdout.
///
/// # Errors
///
/// Returns an error if the database cannot be opened, the export fails or
/// the output cannot be written.
pub fn export(
    name: &str,
    mode: SyncMode,
    out: Option<&Path>,
    dir: Option<&Path>,
    secret: Option<&str>,
    json: bool,
) -> Result<()> {
    let workspace = Workspace::load(dir, secret)?;
    let name = workspace.attach(name)?;
    let document = workspace.registry().export_to_json(&name, mode)?;
    workspace.finish()?;

    let payload = serde_json::to_string_pretty(&document)?;
    let Some(out) = out else {
        println!("{payload}");
        return Ok(());
    };

    atomic_write(out, &format!("{payload}\n"))?;
    if json {
        println!(
            "{}",
            serde_json::to_string(&json!({
                "database": name,
                "mode": mode,
                "tables": document.tables.len(),
                "path": out.display().to_string(),
            }))?
        );
    } else {
        println!(
            "{} Exported {} ({mode}, {} table(s)) to {}",
            "✓".green(),
            name.bold(),
            document.tables.len(),
            out.display()
        );
    }
    Ok(())
}
