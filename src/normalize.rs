//! Traditional → simplified Chinese conversion over arbitrary JSON.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;

use crate::error::{Img2PoeError, Result};

/// Convert one string to simplified Chinese. Characters without a mapping
/// pass through unchanged.
pub fn simplify_text(text: &str) -> String {
    zhconv::zhconv(text, zhconv::Variant::ZhHans)
}

/// Rewrite every string leaf of `value`. Shape, key order and non-string
/// scalars are preserved.
pub fn to_simplified(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(simplify_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(to_simplified).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), to_simplified(v)))
                .collect(),
        ),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertReport {
    pub converted: usize,
    pub failed: usize,
}

/// List the `*.json` files directly inside `dir`, sorted by name.
pub(crate) fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Img2PoeError::Corpus(format!(
            "{} is not a readable directory",
            dir.display()
        )));
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Convert every `*.json` file in `input`, writing into `output` (created if
/// needed) under the same name, or over the source when `output` is `None`.
///
/// A missing input folder is an error. A file that cannot be read, parsed or
/// written is logged and counted as failed; the rest still get converted.
pub fn convert_folder(input: &Path, output: Option<&Path>) -> Result<ConvertReport> {
    let files = json_files(input)?;
    if let Some(out) = output {
        std::fs::create_dir_all(out)?;
    }

    let mut report = ConvertReport::default();
    for src in files {
        let dst = match (output, src.file_name()) {
            (Some(out), Some(name)) => out.join(name),
            _ => src.clone(),
        };
        match convert_file(&src, &dst) {
            Ok(()) => {
                tracing::info!("converted {} -> {}", src.display(), dst.display());
                report.converted += 1;
            }
            Err(e) => {
                tracing::warn!("failed to convert {}: {}", src.display(), e);
                report.failed += 1;
            }
        }
    }
    Ok(report)
}

fn convert_file(src: &Path, dst: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(src)?;
    let value: Value = serde_json::from_str(&raw)?;
    let simplified = to_simplified(&value);

    let mut buf = Vec::with_capacity(raw.len());
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    simplified.serialize(&mut ser)?;
    std::fs::write(dst, buf)?;
    Ok(())
}
