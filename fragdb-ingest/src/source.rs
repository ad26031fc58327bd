use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;

/// An ordered feed of `{"time": …, "log": …}` envelope lines. Where the
/// bytes came from is none of the pipeline's business.
pub trait LineSource {
    /// Reads at most `limit` lines. `truncated` reports that the source had
    /// more to give; the driver treats that as fatal.
    fn read_lines(&mut self, limit: usize) -> io::Result<SourceLines>;
}

#[derive(Debug, Default)]
pub struct SourceLines {
    pub lines: Vec<String>,
    pub truncated: bool,
}

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LineSource for FileSource {
    fn read_lines(&mut self, limit: usize) -> io::Result<SourceLines> {
        let reader = BufReader::new(File::open(&self.path)?);
        read_capped(reader.lines(), limit)
    }
}

/// A pre-materialized source, mainly for tests and dry runs.
pub struct VecSource {
    lines: Vec<String>,
}

impl VecSource {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

impl LineSource for VecSource {
    fn read_lines(&mut self, limit: usize) -> io::Result<SourceLines> {
        let truncated = self.lines.len() > limit;
        let mut lines = std::mem::take(&mut self.lines);
        lines.truncate(limit);
        Ok(SourceLines { lines, truncated })
    }
}

fn read_capped(
    iter: impl Iterator<Item = io::Result<String>>,
    limit: usize,
) -> io::Result<SourceLines> {
    let mut out = SourceLines::default();
    for line in iter {
        if out.lines.len() == limit {
            out.truncated = true;
            break;
        }
        out.lines.push(line?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_source_reports_truncation() {
        let mut source = VecSource::new(vec!["a".into(), "b".into(), "c".into()]);
        let read = source.read_lines(2).unwrap();
        assert_eq!(read.lines, vec!["a".to_string(), "b".to_string()]);
        assert!(read.truncated);
    }

    #[test]
    fn vec_source_under_limit_is_not_truncated() {
        let mut source = VecSource::new(vec!["a".into()]);
        let read = source.read_lines(10).unwrap();
        assert_eq!(read.lines.len(), 1);
        assert!(!read.truncated);
    }
}
