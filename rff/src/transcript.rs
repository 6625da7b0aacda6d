//! Per-iteration transcript written as JSON Lines.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::controller::IterationRecord;
use crate::core::types::RunResult;

/// Final line of a transcript.
#[derive(Debug, Serialize)]
struct Summary<'a> {
    kind: &'static str,
    task: &'a str,
    #[serde(flatten)]
    result: &'a RunResult,
}

/// Appends one JSON object per iteration, then a summary line.
#[derive(Debug)]
pub struct TranscriptWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TranscriptWriter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create transcript dir {}", parent.display()))?;
        }
        let file =
            File::create(path).with_context(|| format!("create transcript {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }

    pub fn record(&mut self, record: &IterationRecord) -> Result<()> {
        self.write_line(record)
    }

    pub fn finish(mut self, task: &str, result: &RunResult) -> Result<()> {
        self.write_line(&Summary {
            kind: "result",
            task,
            result,
        })?;
        self.out
            .flush()
            .with_context(|| format!("flush transcript {}", self.path.display()))
    }

    fn write_line<T: Serialize>(&mut self, value: &T) -> Result<()> {
        serde_json::to_writer(&mut self.out, value).context("serialize transcript line")?;
        self.out
            .write_all(b"\n")
            .with_context(|| format!("write transcript {}", self.path.display()))
    }
}
