use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::cluster::ClusterLabel;
use crate::error::Result;

/// Separator between a line and its cluster id.
pub const SEPARATOR: &str = "|ClusterID: ";

/// What to do with lines labelled as noise by density clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoisePolicy {
    /// Emit them with id -1.
    #[default]
    Report,
    /// Leave them out of the output.
    Drop,
}

/// `"<text>|ClusterID: <id>"`, with the text untouched.
pub fn format_record(text: &str, label: ClusterLabel) -> String {
    format!("{text}{SEPARATOR}{label}")
}

/// Writes one newline-terminated record per line in input order and returns
/// the number written.
pub fn write_records<'a, W, I>(writer: &mut W, records: I, noise: NoisePolicy) -> Result<usize>
where
    W: Write + ?Sized,
    I: IntoIterator<Item = (&'a str, ClusterLabel)>,
{
    let mut written = 0;
    for (text, label) in records {
        if label.is_noise() && noise == NoisePolicy::Drop {
            continue;
        }
        writeln!(writer, "{}", format_record(text, label))?;
        written += 1;
    }
    Ok(written)
}

/// Runs `fill` against a temporary file next to `path` and moves it into
/// place only if `fill` succeeds, so a failed run leaves no partial file.
pub fn write_atomically<F, T>(path: &Path, fill: F) -> Result<T>
where
    F: FnOnce(&mut dyn Write) -> Result<T>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let tmp = NamedTempFile::new_in(dir)?;
    let mut writer = BufWriter::new(tmp);
    let value = fill(&mut writer)?;
    let tmp = writer.into_inner().map_err(|e| e.into_error())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    info!("wrote {}", path.display());
    Ok(value)
}
