//! Memory-bounded, line-indexed program readers.
//!
//! Grounded on `src/gcode/stream.rs`'s `GcodeStreamReader` trait and its
//! `FileStreamReader`/`StringStreamReader` implementations. Pause/resume
//! there lived in a `PausableStream` wrapper around the reader; here that
//! responsibility moves into `StreamingEngine`'s own phase state machine,
//! so this module only has to answer "what's the next line" and "can you
//! jump to line N", the seek support `StreamOptions::resume_from` needs.

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use grblcore_types::Result;

/// A line-indexed, seekable source of program text.
///
/// Implementations must never hold the whole program in memory at once
/// for file-backed sources, only the current read buffer.
pub trait ProgramReader: Send {
    /// Reads the next non-empty line, or `None` at end of program.
    fn read_line(&mut self) -> Result<Option<String>>;

    /// 0-indexed line the next `read_line` call will return.
    fn current_line_index(&self) -> usize;

    fn total_lines(&self) -> Option<usize>;

    /// Repositions so the next `read_line` returns `line_index`.
    fn seek_to_line(&mut self, line_index: usize) -> Result<()>;

    fn is_eof(&self) -> bool;
}

pub struct FileProgramReader {
    reader: BufReader<File>,
    path: PathBuf,
    current_index: usize,
    total_lines: Option<usize>,
    eof: bool,
}

impl FileProgramReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = BufReader::new(File::open(&path)?);
        Ok(Self { reader, path, current_index: 0, total_lines: None, eof: false })
    }

    /// Counts lines by a single forward scan; only done on request since
    /// it requires reading the whole file once.
    pub fn count_total_lines(&mut self) -> Result<usize> {
        if let Some(total) = self.total_lines {
            return Ok(total);
        }
        let file = File::open(&self.path)?;
        let count = BufReader::new(file).lines().count();
        self.total_lines = Some(count);
        Ok(count)
    }
}

impl ProgramReader for FileProgramReader {
    fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if self.eof {
                return Ok(None);
            }
            let mut line = String::new();
            let bytes = self.reader.read_line(&mut line)?;
            if bytes == 0 {
                self.eof = true;
                return Ok(None);
            }
            self.current_index += 1;
            let trimmed = line.trim().to_string();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(trimmed));
        }
    }

    fn current_line_index(&self) -> usize {
        self.current_index
    }

    fn total_lines(&self) -> Option<usize> {
        self.total_lines
    }

    fn seek_to_line(&mut self, line_index: usize) -> Result<()> {
        self.reader.get_mut().seek(SeekFrom::Start(0))?;
        self.reader = BufReader::new(self.reader.get_ref().try_clone()?);
        self.current_index = 0;
        self.eof = false;
        let mut skipped = 0;
        while skipped < line_index {
            let mut discard = String::new();
            if self.reader.read_line(&mut discard)? == 0 {
                self.eof = true;
                break;
            }
            skipped += 1;
        }
        self.current_index = skipped;
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.eof
    }
}

pub struct InMemoryProgramReader {
    lines: Vec<String>,
    current_index: usize,
}

impl InMemoryProgramReader {
    /// Blank lines are kept (not filtered out here) so `current_line_index`
    /// stays a raw line count, matching `FileProgramReader` and the
    /// "skipped but counted for progress" decision in DESIGN.md.
    pub fn new(content: &str) -> Self {
        let lines: Vec<String> = content.lines().map(|l| l.trim().to_string()).collect();
        Self { lines, current_index: 0 }
    }
}

impl ProgramReader for InMemoryProgramReader {
    fn read_line(&mut self) -> Result<Option<String>> {
        while self.current_index < self.lines.len() {
            let line = self.lines[self.current_index].clone();
            self.current_index += 1;
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
        Ok(None)
    }

    fn current_line_index(&self) -> usize {
        self.current_index
    }

    fn total_lines(&self) -> Option<usize> {
        Some(self.lines.len())
    }

    fn seek_to_line(&mut self, line_index: usize) -> Result<()> {
        self.current_index = line_index.min(self.lines.len());
        Ok(())
    }

    fn is_eof(&self) -> bool {
        self.current_index >= self.lines.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn in_memory_reader_skips_blank_lines() {
        let mut reader = InMemoryProgramReader::new("G0 X0\n\nG1 X1\n");
        assert_eq!(reader.read_line().unwrap(), Some("G0 X0".to_string()));
        assert_eq!(reader.read_line().unwrap(), Some("G1 X1".to_string()));
        assert_eq!(reader.read_line().unwrap(), None);
        assert!(reader.is_eof());
    }

    #[test]
    fn in_memory_reader_seeks_to_line() {
        let mut reader = InMemoryProgramReader::new("N0\nN1\nN2\nN3\n");
        reader.seek_to_line(2).unwrap();
        assert_eq!(reader.read_line().unwrap(), Some("N2".to_string()));
    }

    #[test]
    fn file_reader_counts_and_reads_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "G0 X0").unwrap();
        writeln!(file, "G1 X1").unwrap();
        let mut reader = FileProgramReader::open(file.path()).unwrap();
        assert_eq!(reader.count_total_lines().unwrap(), 2);
        assert_eq!(reader.read_line().unwrap(), Some("G0 X0".to_string()));
        assert_eq!(reader.current_line_index(), 1);
    }

    #[test]
    fn file_reader_seek_resumes_mid_program() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for i in 0..5 {
            writeln!(file, "N{i}").unwrap();
        }
        let mut reader = FileProgramReader::open(file.path()).unwrap();
        reader.seek_to_line(3).unwrap();
        assert_eq!(reader.read_line().unwrap(), Some("N3".to_string()));
    }
}
