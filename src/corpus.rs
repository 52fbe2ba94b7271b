use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{LineError, Result};

/// One raw record of the input, stripped of its record separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub index: usize,
    pub error: LineError,
}

/// The span of corpus indices read from one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub first: usize,
    pub records: usize,
}

/// A static batch of log lines. Lines that failed to decode keep their index
/// slot in `skipped` so the remaining lines keep their original positions.
#[derive(Debug, Default, Clone)]
pub struct Corpus {
    lines: Vec<LogLine>,
    skipped: Vec<SkippedLine>,
    sources: Vec<SourceFile>,
}

/// `path` itself if it is a file, otherwise every `.log` file below it in
/// file-name order.
pub fn collect_log_files(path: &Path) -> Result<Vec<PathBuf>> {
    if fs::metadata(path)?.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let is_log = entry.path().extension().is_some_and(|ext| ext == "log");
        if entry.file_type().is_file() && is_log {
            files.push(entry.into_path());
        }
    }
    debug!("found {} log files under {}", files.len(), path.display());
    Ok(files)
}

fn strip_separator(record: &[u8]) -> &[u8] {
    record.strip_suffix(b"\r").unwrap_or(record)
}

impl Corpus {
    /// Reads newline-separated records. A read failure is fatal; a record that
    /// is not valid UTF-8 is skipped with a warning.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Corpus> {
        let mut corpus = Corpus::default();
        corpus.append(reader)?;
        debug!(
            "read {} lines, skipped {}",
            corpus.lines.len(),
            corpus.skipped.len()
        );
        Ok(corpus)
    }

    /// Reads a single file, or every `.log` file below a directory.
    pub fn from_path(path: &Path) -> Result<Corpus> {
        Self::from_paths(&collect_log_files(path)?)
    }

    /// Concatenates the files in order. Indices run on across files; use
    /// [`Corpus::locate`] for the per-file line number.
    pub fn from_paths<P: AsRef<Path>>(paths: &[P]) -> Result<Corpus> {
        let mut corpus = Corpus::default();
        for path in paths {
            let path = path.as_ref();
            let first = corpus.total();
            let records = corpus.append(BufReader::new(File::open(path)?))?;
            debug!("{}: {} records", path.display(), records);
            corpus.sources.push(SourceFile {
                path: path.to_path_buf(),
                first,
                records,
            });
        }
        info!(
            "read {} lines from {} files, skipped {}",
            corpus.lines.len(),
            corpus.sources.len(),
            corpus.skipped.len()
        );
        Ok(corpus)
    }

    fn append<R: BufRead>(&mut self, reader: R) -> Result<usize> {
        let offset = self.total();
        let mut records = 0;
        for record in reader.split(b'\n') {
            let record = record?;
            let index = offset + records;
            records += 1;
            match String::from_utf8(strip_separator(&record).to_vec()) {
                Ok(text) => self.lines.push(LogLine { index, text }),
                Err(_) => {
                    let error = LineError::InvalidEncoding { index };
                    warn!("skipping record: {}", error);
                    self.skipped.push(SkippedLine { index, error });
                }
            }
        }
        Ok(records)
    }

    pub fn from_lines<I, S>(lines: I) -> Corpus
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Corpus {
            lines: lines
                .into_iter()
                .enumerate()
                .map(|(index, text)| LogLine {
                    index,
                    text: text.into(),
                })
                .collect(),
            skipped: Vec::new(),
            sources: Vec::new(),
        }
    }

    pub fn lines(&self) -> &[LogLine] {
        &self.lines
    }

    pub fn skipped(&self) -> &[SkippedLine] {
        &self.skipped
    }

    /// Number of usable lines.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of records read, including skipped ones.
    pub fn total(&self) -> usize {
        self.lines.len() + self.skipped.len()
    }

    /// Empty unless the corpus was read with [`Corpus::from_paths`].
    pub fn sources(&self) -> &[SourceFile] {
        &self.sources
    }

    /// The file a corpus index came from and its 0-based line in that file.
    pub fn locate(&self, index: usize) -> Option<(&Path, usize)> {
        self.sources
            .iter()
            .find(|s| (s.first..s.first + s.records).contains(&index))
            .map(|s| (s.path.as_path(), index - s.first))
    }
}
