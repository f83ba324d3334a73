// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// DSC structure scanner.
//
// Walks a spooled PostScript file once, recording byte offsets of the
// document header, every `%%Page:` boundary, and the trailer, plus any
// `%%IncludeFeature:` option markers found inside page setup.  Page
// ranges are later materialized into standalone temporary documents by
// seeking back into the spool file, so the whole job is never held in
// memory.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use ripwerk_core::error::{Result, RipwerkError};

/// Byte span of one page, starting at its `%%Page:` line.
#[derive(Debug, Clone, Copy)]
pub struct PageSpan {
    /// 1-indexed page number by position in the file.
    pub number: u32,
    pub start: u64,
    pub end: u64,
}

/// Structure summary of one spooled PostScript document.
pub struct ScannedDocument {
    path: PathBuf,
    /// Bytes `[0, header_end)` are the document prologue.
    header_end: u64,
    pages: Vec<PageSpan>,
    /// Trailer span `[trailer_start, file_end)`, if a `%%Trailer` exists.
    trailer_start: Option<u64>,
    file_end: u64,
    /// Option overrides per page, in the order the markers appeared.
    overrides: HashMap<u32, Vec<(String, String)>>,
}

impl ScannedDocument {
    /// Scan the spool file at `path`.
    pub fn scan(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut pages: Vec<PageSpan> = Vec::new();
        let mut overrides: HashMap<u32, Vec<(String, String)>> = HashMap::new();
        let mut header_end: Option<u64> = None;
        let mut trailer_start: Option<u64> = None;
        let mut offset: u64 = 0;
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            let line_start = offset;
            offset += read as u64;

            if line.starts_with(b"%%Page:") {
                if let Some(last) = pages.last_mut() {
                    last.end = line_start;
                }
                if header_end.is_none() {
                    header_end = Some(line_start);
                }
                let number = pages.len() as u32 + 1;
                pages.push(PageSpan {
                    number,
                    start: line_start,
                    end: line_start,
                });
            } else if line.starts_with(b"%%Trailer") && trailer_start.is_none() {
                if let Some(last) = pages.last_mut() {
                    last.end = line_start;
                }
                trailer_start = Some(line_start);
            } else if line.starts_with(b"%%IncludeFeature:") {
                if let Some(page) = pages.last() {
                    if let Some((option, value)) = parse_feature_marker(&line) {
                        overrides.entry(page.number).or_default().push((option, value));
                    }
                } else {
                    // A feature marker before the first page belongs to the
                    // document prologue; defaults already cover it.
                    debug!("ignoring feature marker in document prologue");
                }
            }
        }

        if let Some(last) = pages.last_mut() {
            if last.end == last.start {
                last.end = trailer_start.unwrap_or(offset);
            }
        }

        debug!(
            path = %path.display(),
            pages = pages.len(),
            overrides = overrides.len(),
            "document scanned"
        );

        Ok(Self {
            path: path.to_path_buf(),
            header_end: header_end.unwrap_or(offset),
            pages,
            trailer_start,
            file_end: offset,
            overrides,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages found. Zero means the page count cannot be
    /// determined and the file cannot be printed page-by-page.
    pub fn page_count(&self) -> Result<u32> {
        match self.pages.len() {
            0 => Err(RipwerkError::PageCount(format!(
                "{} contains no page boundaries",
                self.path.display()
            ))),
            n => Ok(n as u32),
        }
    }

    pub fn pages(&self) -> &[PageSpan] {
        &self.pages
    }

    /// Option overrides declared by in-document markers on this page.
    pub fn overrides_for(&self, page: u32) -> &[(String, String)] {
        self.overrides.get(&page).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Materialize pages `first..=last` into a standalone temporary
    /// document: prologue, the selected page spans, then the trailer.
    ///
    /// The returned handle unlinks the file on drop, so dropping it right
    /// after the consuming renderer exits satisfies the no-leak rule.
    pub fn extract_range(&self, first: u32, last: u32) -> Result<NamedTempFile> {
        let total = self.pages.len() as u32;
        if first == 0 || first > last || last > total {
            return Err(RipwerkError::RangeOutOfBounds {
                first,
                last,
                pages: total,
            });
        }

        let mut source = File::open(&self.path)?;
        let mut out = NamedTempFile::new()?;

        copy_span(&mut source, out.as_file_mut(), 0, self.header_end)?;
        for span in &self.pages[(first as usize - 1)..(last as usize)] {
            copy_span(&mut source, out.as_file_mut(), span.start, span.end)?;
        }
        if let Some(trailer) = self.trailer_start {
            copy_span(&mut source, out.as_file_mut(), trailer, self.file_end)?;
        }
        out.as_file_mut().flush()?;

        debug!(first, last, temp = %out.path().display(), "page range extracted");
        Ok(out)
    }
}

/// Parse `%%IncludeFeature: *Option value` into its parts.
fn parse_feature_marker(line: &[u8]) -> Option<(String, String)> {
    let text = str::from_utf8(line).ok()?;
    let rest = text.strip_prefix("%%IncludeFeature:")?.trim();
    let mut words = rest.split_whitespace();
    let option = words.next()?.trim_start_matches('*');
    let value = words.next().unwrap_or("");
    if option.is_empty() {
        warn!(marker = rest, "malformed feature marker");
        return None;
    }
    Some((option.to_string(), value.to_string()))
}

fn copy_span(source: &mut File, out: &mut File, start: u64, end: u64) -> Result<()> {
    if end <= start {
        return Ok(());
    }
    source.seek(SeekFrom::Start(start))?;
    let mut taken = std::io::Read::by_ref(source).take(end - start);
    std::io::copy(&mut taken, out)?;
    Ok(())
}
