//! Version command implementation.

use crate::error::Result;
use serde::Serialize;

#[derive(Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    build: &'a str,
    sqlcipher: bool,
}

/// Execute the version command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let build = if cfg!(debug_assertions) {
        "dev"
    } else {
        "release"
    };
    let sqlcipher = cfg!(feature = "sqlcipher");

    if json {
        let output = VersionOutput {
            version,
            build,
            sqlcipher,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    let cipher = if sqlcipher { "sqlcipher" } else { "plain sqlite" };
    println!("sqlkeep version {version} ({build}, {cipher})");
    Ok(())
}
