//! Append-only export of listed tasks.
//!
//! [`JsonLinesSink`] writes one [`ExportRecord`] per line; [`JsonLinesReader`]
//! reads them back forward-only without loading the whole export.

use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::Task;

/// One exported task, tagged with the list it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub list_id: String,
    pub task: Task,
}

/// Destination for streamed list pages.
pub trait TaskSink: Send {
    /// Append one page of tasks for `list_id`.
    fn append(&mut self, list_id: &str, tasks: &[Task]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Result of exporting one list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListExportSummary {
    pub list_id: String,
    pub items_written: usize,
    /// Set when the list stopped early.
    pub error: Option<String>,
}

impl ListExportSummary {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// JSON-lines writer over any `Write`.
pub struct JsonLinesSink<W: Write> {
    writer: W,
    written: usize,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, written: 0 }
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TaskSink for JsonLinesSink<W> {
    fn append(&mut self, list_id: &str, tasks: &[Task]) -> io::Result<()> {
        for task in tasks {
            let record = ExportRecord {
                list_id: list_id.to_string(),
                task: task.clone(),
            };
            serde_json::to_writer(&mut self.writer, &record)?;
            self.writer.write_all(b"\n")?;
            self.written += 1;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Forward-only reader over a JSON-lines export. Blank lines are skipped.
pub struct JsonLinesReader<R: BufRead> {
    lines: io::Lines<R>,
}

impl<R: BufRead> JsonLinesReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

impl<R: BufRead> Iterator for JsonLinesReader<R> {
    type Item = io::Result<ExportRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(io::Error::from));
        }
    }
}
