//! Database commands: list, exec, query and sync-date.

use std::path::Path;

use colored::Colorize;
use serde_json::json;

use crate::cli::commands::Workspace;
use crate::error::{Error, Result};
use crate::storage::{Row, SqlValue};

/// List database files.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list(dir: Option<&Path>, json: bool) -> Result<()> {
    let workspace = Workspace::load(dir, None)?;
    let names = workspace.registry().get_database_list()?;

    if json {
        println!("{}", serde_json::to_string(&json!({ "databases": names }))?);
    } else if names.is_empty() {
        println!("No databases.");
    } else {
        for name in &names {
            println!("{name}");
        }
    }
    Ok(())
}

/// Execute statements against a database.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or a statement fails.
pub fn exec(
    name: &str,
    sql: &str,
    transaction: bool,
    dir: Option<&Path>,
    secret: Option<&str>,
    json: bool,
) -> Result<()> {
    let workspace = Workspace::load(dir, secret)?;
    let name = workspace.attach(name)?;
    let changes = workspace.registry().execute(&name, sql, transaction)?;
    workspace.finish()?;

    if json {
        println!("{}", serde_json::to_string(&changes)?);
    } else {
        println!(
            "{} {} row(s) changed, last id {}",
            "✓".green(),
            changes.changes,
            changes.last_id
        );
    }
    Ok(())
}

/// Run a query and print its rows.
///
/// # Errors
///
/// Returns `InvalidArgument` if `values` is not a JSON array,
/// `InvalidParameterType` for a non-scalar value, or the query failure.
pub fn query(
    name: &str,
    sql: &str,
    values: Option<&str>,
    dir: Option<&Path>,
    secret: Option<&str>,
    json: bool,
) -> Result<()> {
    let values = parse_values(values)?;
    let workspace = Workspace::load(dir, secret)?;
    let name = workspace.attach(name)?;
    let rows = workspace.registry().query(&name, sql, &values)?;
    workspace.finish()?;

    if json {
        println!("{}", serde_json::to_string(&json!({ "rows": rows }))?);
    } else {
        print_rows(&rows);
    }
    Ok(())
}

/// Show the sync date, setting it first when `set` is given.
///
/// # Errors
///
/// Returns an error if the database cannot be opened or the tracker fails.
pub fn sync_date(
    name: &str,
    set: Option<i64>,
    dir: Option<&Path>,
    secret: Option<&str>,
    json: bool,
) -> Result<()> {
    let workspace = Workspace::load(dir, secret)?;
    let name = workspace.attach(name)?;
    if let Some(epoch) = set {
        workspace.registry().create_sync_table(&name)?;
        workspace.registry().set_sync_date(&name, epoch)?;
    }
    let epoch = workspace.registry().get_sync_date(&name)?;
    workspace.finish()?;

    let iso = chrono::DateTime::from_timestamp(epoch, 0).map(|d| d.to_rfc3339());
    if json {
        println!(
            "{}",
            serde_json::to_string(&json!({ "database": name, "sync_date": epoch, "iso": iso }))?
        );
    } else if epoch == 0 {
        println!("{name}: never synced");
    } else {
        println!("{name}: {epoch} ({})", iso.unwrap_or_default());
    }
    Ok(())
}

fn parse_values(values: Option<&str>) -> Result<Vec<SqlValue>> {
    let Some(raw) = values else {
        return Ok(Vec::new());
    };
    let parsed: serde_json::Value = serde_json::from_str(raw)?;
    let list = parsed
        .as_array()
        .ok_or_else(|| Error::InvalidArgument("--values must be a JSON array".to_string()))?;
    SqlValue::from_json_list(list)
}

fn print_rows(rows: &[Row]) {
    let Some(first) = rows.first() else {
        println!("{}", "(no rows)".dimmed());
        return;
    };
    let header: Vec<&str> = first.keys().map(String::as_str).collect();
    println!("{}", header.join("\t").bold());
    for row in rows {
        let cells: Vec<String> = row
            .values()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => "NULL".to_string(),
                other => other.to_string(),
            })
            .collect();
        println!("{}", cells.join("\t"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values() {
        assert!(parse_values(None).unwrap().is_empty());
        assert_eq!(
            parse_values(Some(r#"[1, "a", null]"#)).unwrap(),
            vec![SqlValue::Integer(1), SqlValue::Text("a".into()), SqlValue::Null]
        );
        assert!(matches!(parse_values(Some("{}")), Err(Error::InvalidArgument(_))));
        assert!(matches!(
            parse_values(Some("[true]")),
            Err(Error::InvalidParameterType { position: 0, .. })
        ));
    }
}
