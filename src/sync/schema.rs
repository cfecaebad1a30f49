//! Translation between catalog DDL and document schema entries.
//!
//! Export reads `sqlite_master` and splits each `CREATE` statement into the
//! pieces a document stores; import glues those pieces back together.
//! Splitting is textual: top-level commas, parentheses and quotes are
//! respected, nothing else is interpreted.

use rusqlite::Connection;

use crate::error::{Error, Result};
use crate::storage::statements::{find_ignore_case, quote_identifier};
use crate::sync::tracker::SYNC_TABLE;
use crate::sync::types::{JsonColumn, JsonIndex, JsonTrigger, JsonView};

/// A catalog object: name plus its `CREATE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub sql: String,
}

// ── Catalog ─────────────────────────────────────────────────

/// User tables in creation order, excluding internal and sync tables.
///
/// # Errors
///
/// Returns `Execution` if the catalog cannot be read.
pub fn user_tables(conn: &Connection) -> Result<Vec<CatalogEntry>> {
    catalog(
        conn,
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND name != ?1 AND sql NOT NULL
         ORDER BY rowid",
        SYNC_TABLE,
    )
}

/// Explicit indexes on `table`. Automatic indexes have no SQL and are skipped.
///
/// # Errors
///
/// Returns `Execution` if the catalog cannot be read.
pub fn table_indexes(conn: &Connection, table: &str) -> Result<Vec<CatalogEntry>> {
    catalog(
        conn,
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'index' AND tbl_name = ?1 AND sql NOT NULL
         ORDER BY rowid",
        table,
    )
}

/// Triggers attached to `table`.
///
/// # Errors
///
/// Returns `Execution` if the catalog cannot be read.
pub fn table_triggers(conn: &Connection, table: &str) -> Result<Vec<CatalogEntry>> {
    catalog(
        conn,
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'trigger' AND tbl_name = ?1 AND sql NOT NULL
         ORDER BY rowid",
        table,
    )
}

/// Every view.
///
/// # Errors
///
/// Returns `Execution` if the catalog cannot be read.
pub fn views(conn: &Connection) -> Result<Vec<CatalogEntry>> {
    catalog(
        conn,
        "SELECT name, sql FROM sqlite_master
         WHERE type = 'view' AND name NOT LIKE ?1 AND sql NOT NULL
         ORDER BY rowid",
        "sqlite_%",
    )
}

fn catalog(conn: &Connection, query: &str, arg: &str) -> Result<Vec<CatalogEntry>> {
    let mut stmt = conn.prepare(query)?;
    let entries = stmt
        .query_map([arg], |row| {
            Ok(CatalogEntry {
                name: row.get(0)?,
                sql: row.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(entries)
}

// ── Tables ──────────────────────────────────────────────────

/// Split a `CREATE TABLE` statement into schema entries.
///
/// # Errors
///
/// Returns `Export` if the statement has no column list.
pub fn parse_table_definition(sql: &str) -> Result<Vec<JsonColumn>> {
    let (open, close) = outer_parens(sql)
        .ok_or_else(|| Error::Export(format!("no column list in: {sql}")))?;
    split_top_level(&sql[open + 1..close])
        .into_iter()
        .map(|item| parse_schema_item(&item))
        .collect()
}

fn parse_schema_item(item: &str) -> Result<JsonColumn> {
    let (head, rest) = split_first_word(item);
    if head.eq_ignore_ascii_case("FOREIGN") {
        let (open, close) = first_parens(rest)
            .ok_or_else(|| Error::Export(format!("malformed foreign key: {item}")))?;
        return Ok(JsonColumn::foreign_key(
            rest[open + 1..close].trim(),
            rest[close + 1..].trim(),
        ));
    }
    if head.eq_ignore_ascii_case("CONSTRAINT") {
        let (name, value) = split_first_word(rest);
        return Ok(JsonColumn::constraint(name, value));
    }
    Ok(JsonColumn::column(head, rest))
}

/// Rebuild a `CREATE TABLE IF NOT EXISTS` statement.
#[must_use]
pub fn build_create_table(table: &str, schema: &[JsonColumn]) -> String {
    let items: Vec<String> = schema
        .iter()
        .map(|entry| {
            let item = if let Some(fk) = &entry.foreignkey {
                format!("FOREIGN KEY ({fk}) {}", entry.value)
            } else if let Some(name) = &entry.constraint {
                format!("CONSTRAINT {name} {}", entry.value)
            } else {
                format!("{} {}", entry.column.as_deref().unwrap_or_default(), entry.value)
            };
            item.trim().to_string()
        })
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        quote_identifier(table),
        items.join(", ")
    )
}

// ── Indexes ─────────────────────────────────────────────────

/// Read an index definition.
///
/// # Errors
///
/// Returns `Export` if the column list cannot be found.
pub fn parse_index(entry: &CatalogEntry) -> Result<JsonIndex> {
    let malformed = || Error::Export(format!("malformed index {}: {}", entry.name, entry.sql));
    let on = find_ignore_case(&entry.sql, " ON ").ok_or_else(malformed)?;
    let tail = &entry.sql[on..];
    let (open, close) = first_parens(tail).ok_or_else(malformed)?;
    let head = &entry.sql[..on];
    let unique = find_ignore_case(head, "UNIQUE").is_some();
    let condition = tail[close + 1..].trim().trim_end_matches(';').trim_end();
    Ok(JsonIndex {
        name: entry.name.clone(),
        value: tail[open + 1..close].trim().to_string(),
        mode: unique.then(|| "UNIQUE".to_string()),
        condition: (!condition.is_empty()).then(|| condition.to_string()),
    })
}

#[must_use]
pub fn build_index(table: &str, index: &JsonIndex) -> String {
    let unique = if index.mode.is_some() { "UNIQUE " } else { "" };
    let condition = index
        .condition
        .as_deref()
        .map(|c| format!(" {c}"))
        .unwrap_or_default();
    format!(
        "CREATE {unique}INDEX IF NOT EXISTS {} ON {} ({}){condition};",
        quote_identifier(&index.name),
        quote_identifier(table),
        index.value
    )
}

// ── Triggers ────────────────────────────────────────────────

/// Read a trigger definition attached to `table`.
///
/// # Errors
///
/// Returns `Export` if the statement does not have the
/// `CREATE TRIGGER name <time event> ON table [condition] BEGIN ... END` shape.
pub fn parse_trigger(table: &str, entry: &CatalogEntry) -> Result<JsonTrigger> {
    let malformed = || Error::Export(format!("malformed trigger {}: {}", entry.name, entry.sql));
    let sql = entry.sql.as_str();

    let keyword = find_ignore_case(sql, "TRIGGER").ok_or_else(malformed)?;
    let mut rest = sql[keyword + "TRIGGER".len()..].trim_start();
    if rest.get(..13).is_some_and(|h| h.eq_ignore_ascii_case("IF NOT EXISTS")) {
        rest = rest[13..].trim_start();
    }
    let (_, rest) = split_first_word(rest);
    let on = find_ignore_case(rest, " ON ").ok_or_else(malformed)?;
    let timeevent = rest[..on].trim();

    let after_on = rest[on + 4..].trim_start();
    let (target, body) = split_first_word(after_on);
    if !unquote(target).eq_ignore_ascii_case(table) {
        return Err(malformed());
    }

    let begin = find_ignore_case(body, "BEGIN").ok_or_else(malformed)?;
    let condition = body[..begin].trim();
    Ok(JsonTrigger {
        name: entry.name.clone(),
        timeevent: timeevent.to_string(),
        condition: (!condition.is_empty()).then(|| condition.to_string()),
        logic: body[begin..].trim().to_string(),
    })
}

#[must_use]
pub fn build_trigger(table: &str, trigger: &JsonTrigger) -> String {
    let condition = trigger
        .condition
        .as_deref()
        .map(|c| format!("{c} "))
        .unwrap_or_default();
    let logic = trigger.logic.trim_end().trim_end_matches(';');
    format!(
        "CREATE TRIGGER IF NOT EXISTS {} {} ON {} {condition}{logic};",
        quote_identifier(&trigger.name),
        trigger.timeevent,
        quote_identifier(table),
    )
}

// ── Views ───────────────────────────────────────────────────

/// Read a view definition.
///
/// # Errors
///
/// Returns `Export` if there is no `AS` clause.
pub fn parse_view(entry: &CatalogEntry) -> Result<JsonView> {
    let at = find_ignore_case(&entry.sql, " AS ")
        .ok_or_else(|| Error::Export(format!("malformed view {}: {}", entry.name, entry.sql)))?;
    Ok(JsonView {
        name: entry.name.clone(),
        value: entry.sql[at + 4..].trim().to_string(),
    })
}

#[must_use]
pub fn build_view(view: &JsonView) -> String {
    format!(
        "CREATE VIEW IF NOT EXISTS {} AS {};",
        quote_identifier(&view.name),
        view.value.trim_end().trim_end_matches(';')
    )
}

// ── Text helpers ────────────────────────────────────────────

/// First word and the trimmed remainder. A quoted first word keeps its quotes.
fn split_first_word(text: &str) -> (&str, &str) {
    let text = text.trim();
    let end = match text.chars().next() {
        Some(q @ ('"' | '`' | '\'')) => text[1..].find(q).map(|i| i + 2),
        Some('[') => text.find(']').map(|i| i + 1),
        _ => None,
    }
    .or_else(|| text.find(char::is_whitespace))
    .unwrap_or(text.len());
    (&text[..end], text[end..].trim())
}

fn unquote(word: &str) -> &str {
    word.trim_matches(|c| matches!(c, '"' | '`' | '[' | ']' | '\''))
}

/// Byte offsets of the first `(` and its matching `)`.
fn first_parens(text: &str) -> Option<(usize, usize)> {
    let open = text.find('(')?;
    let mut depth = 0usize;
    let mut quote = None;
    for (i, c) in text[open..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return Some((open, open + i));
                }
            }
            _ => {}
        }
    }
    None
}

/// Byte offsets of the first `(` and the last `)`.
fn outer_parens(text: &str) -> Option<(usize, usize)> {
    let open = text.find('(')?;
    let close = text.rfind(')')?;
    (close > open).then_some((open, close))
}

/// Split on commas that are outside parentheses and quotes.
fn split_top_level(text: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote = None;
    for c in text.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"' | '`') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                items.push(current.trim().to_string());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table_definition() {
        let sql = "CREATE TABLE orders (id INTEGER PRIMARY KEY NOT NULL, \
                   amount REAL DEFAULT (0.0), note TEXT DEFAULT 'a, b', user_id INTEGER, \
                   FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE, \
                   CONSTRAINT amount_pos CHECK (amount >= 0))";
        let schema = parse_table_definition(sql).unwrap();
        assert_eq!(schema.len(), 6);
        assert_eq!(schema[0], JsonColumn::column("id", "INTEGER PRIMARY KEY NOT NULL"));
        assert_eq!(schema[1], JsonColumn::column("amount", "REAL DEFAULT (0.0)"));
        assert_eq!(schema[2], JsonColumn::column("note", "TEXT DEFAULT 'a, b'"));
        assert_eq!(
            schema[4],
            JsonColumn::foreign_key("user_id", "REFERENCES users(id) ON DELETE CASCADE")
        );
        assert_eq!(schema[5], JsonColumn::constraint("amount_pos", "CHECK (amount >= 0)"));
    }

    #[test]
    fn test_quoted_column_names_survive() {
        let schema = parse_table_definition(r#"CREATE TABLE t ("first name" TEXT, id INTEGER)"#)
            .unwrap();
        assert_eq!(schema[0], JsonColumn::column("\"first name\"", "TEXT"));
    }

    #[test]
    fn test_unnamed_table_constraint_round_trips_textually() {
        let schema = parse_table_definition("CREATE TABLE t (a INTEGER, b INTEGER, PRIMARY KEY (a, b))")
            .unwrap();
        assert_eq!(schema[2], JsonColumn::column("PRIMARY", "KEY (a, b)"));
        assert_eq!(
            build_create_table("t", &schema),
            "CREATE TABLE IF NOT EXISTS \"t\" (a INTEGER, b INTEGER, PRIMARY KEY (a, b));"
        );
    }

    #[test]
    fn test_index_round_trip() {
        let entry = CatalogEntry {
            name: "idx_email".into(),
            sql: "CREATE UNIQUE INDEX idx_email ON users (email COLLATE NOCASE, name)".into(),
        };
        let index = parse_index(&entry).unwrap();
        assert_eq!(index.value, "email COLLATE NOCASE, name");
        assert_eq!(index.mode.as_deref(), Some("UNIQUE"));
        assert_eq!(
            build_index("users", &index),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"idx_email\" ON \"users\" (email COLLATE NOCASE, name);"
        );
    }

    #[test]
    fn test_partial_index_keeps_where_clause() {
        let entry = CatalogEntry {
            name: "t_email".into(),
            sql: "CREATE UNIQUE INDEX t_email ON t (email) WHERE deleted = 0".into(),
        };
        let index = parse_index(&entry).unwrap();
        assert_eq!(index.value, "email");
        assert_eq!(index.condition.as_deref(), Some("WHERE deleted = 0"));
        assert_eq!(
            build_index("t", &index),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"t_email\" ON \"t\" (email) WHERE deleted = 0;"
        );
    }

    #[test]
    fn test_trigger_parse_with_condition() {
        let entry = CatalogEntry {
            name: "users_touch".into(),
            sql: "CREATE TRIGGER users_touch AFTER UPDATE ON users FOR EACH ROW WHEN NEW.last_modified <= OLD.last_modified BEGIN UPDATE users SET last_modified = strftime('%s','now') WHERE id = OLD.id; END".into(),
        };
        let trigger = parse_trigger("users", &entry).unwrap();
        assert_eq!(trigger.timeevent, "AFTER UPDATE");
        assert_eq!(
            trigger.condition.as_deref(),
            Some("FOR EACH ROW WHEN NEW.last_modified <= OLD.last_modified")
        );
        assert!(trigger.logic.starts_with("BEGIN UPDATE users"));
        assert!(trigger.logic.ends_with("END"));
        assert!(build_trigger("users", &trigger).starts_with(
            "CREATE TRIGGER IF NOT EXISTS \"users_touch\" AFTER UPDATE ON \"users\" FOR EACH ROW WHEN"
        ));
    }

    #[test]
    fn test_trigger_on_other_table_is_rejected() {
        let entry = CatalogEntry {
            name: "t1".into(),
            sql: "CREATE TRIGGER t1 AFTER INSERT ON other BEGIN SELECT 1; END".into(),
        };
        assert!(parse_trigger("users", &entry).is_err());
    }

    #[test]
    fn test_view_round_trip() {
        let entry = CatalogEntry {
            name: "adults".into(),
            sql: "CREATE VIEW adults AS SELECT * FROM users WHERE age >= 18".into(),
        };
        let view = parse_view(&entry).unwrap();
        assert_eq!(view.value, "SELECT * FROM users WHERE age >= 18");
        assert_eq!(
            build_view(&view),
            "CREATE VIEW IF NOT EXISTS \"adults\" AS SELECT * FROM users WHERE age >= 18;"
        );
    }

    #[test]
    fn test_catalog_skips_internal_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE b (id INTEGER PRIMARY KEY AUTOINCREMENT);
             CREATE TABLE a (id INTEGER);
             CREATE TABLE sync_table (id INTEGER PRIMARY KEY NOT NULL, sync_date INTEGER);
             CREATE INDEX a_id ON a (id);",
        )
        .unwrap();
        let names: Vec<String> = user_tables(&conn).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["b", "a"]);
        assert_eq!(table_indexes(&conn, "a").unwrap().len(), 1);
    }
}
