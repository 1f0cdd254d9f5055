//! Input file bookkeeping and the diagnostic report.
//!
//! The driver hands the core a list of [`FileEntry`]s; every phase records
//! user-facing errors into a shared [`Report`] and flips the entry's
//! `errored` flag so later phases can keep going on a best-effort basis.

use std::fmt;
use std::path::{Path, PathBuf};

/// A one-based source position.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Loc {
    pub line: u32,
    pub column: u32,
}

impl Loc {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

/// One input file of the compilation.
#[derive(Debug)]
pub struct FileEntry {
    pub path: PathBuf,
    /// true for code modules (`.vc`), false for declaration modules (`.vd`)
    pub is_code: bool,
    /// set by any phase that reported an error against this file
    pub errored: bool,
}

impl FileEntry {
    pub fn new(path: PathBuf, is_code: bool) -> Self {
        Self {
            path,
            is_code,
            errored: false,
        }
    }

    pub fn display_name(&self) -> String {
        self.path.display().to_string()
    }

    /// Output path: the two-character code extension is replaced with `s`.
    pub fn assembly_path(&self) -> PathBuf {
        self.path.with_extension("s")
    }
}

/// Classifies a path by extension. `None` for files the core does not accept.
pub fn classify(path: &Path) -> Option<bool> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("vc") => Some(true),
        Some("vd") => Some(false),
        _ => None,
    }
}

/// A single rendered diagnostic.
///
/// Secondary notes indent with a tab below the main line.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Diagnostic {
    pub file: String,
    pub loc: Loc,
    pub message: String,
    pub notes: Vec<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}: error: {}",
            self.file, self.loc.line, self.loc.column, self.message
        )?;
        for note in &self.notes {
            write!(f, "\n\t{note}")?;
        }
        Ok(())
    }
}

/// Accumulates diagnostics across all files and phases.
#[derive(Debug, Default)]
pub struct Report {
    diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, file: &str, loc: Loc, message: impl fmt::Display) {
        self.diagnostics.push(Diagnostic {
            file: file.to_owned(),
            loc,
            message: message.to_string(),
            notes: Vec::new(),
        });
    }

    /// Attaches a note to the most recent diagnostic.
    pub fn note(&mut self, note: impl fmt::Display) {
        let last = self
            .diagnostics
            .last_mut()
            .expect("a note must follow an error");
        last.notes.push(note.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for d in &self.diagnostics {
            writeln!(f, "{d}")?;
        }
        Ok(())
    }
}
