//! Writes the API's OpenAPI document as pretty JSON.
//!
//! Usage:
//!   cargo run --bin generate_openapi > openapi.json
//!   cargo run --bin generate_openapi -- --output openapi.json

use std::{env, fs, io::Write, path::PathBuf};

use anyhow::{bail, Context, Result};
use aquarium_monitor::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn output_path() -> Result<Option<PathBuf>> {
    let mut args = env::args().skip(1);
    let mut output = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--output" | "-o" => {
                let path = args.next().context("--output needs a path")?;
                output = Some(PathBuf::from(path));
            }
            other => match other.strip_prefix("--output=") {
                Some(path) => output = Some(PathBuf::from(path)),
                None => bail!("unexpected argument: {other}"),
            },
        }
    }
    Ok(output)
}

fn main() -> Result<()> {
    let json = ApiDoc::openapi()
        .to_pretty_json()
        .context("Failed to serialise OpenAPI document")?;

    match output_path()? {
        Some(path) => {
            fs::write(&path, &json).with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("OpenAPI document written to {}", path.display());
        }
        None => std::io::stdout()
            .write_all(json.as_bytes())
            .context("Failed to write to stdout")?,
    }

    Ok(())
}
