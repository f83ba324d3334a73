// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Page-scoped render planner.
//
// Walks a scanned document page by page, applies per-page option
// overrides into the transient "currentpage" scope, and schedules one
// renderer invocation per contiguous range of pages that share the same
// effective options.  Differences confined to PostScript-embedded options
// never close a range: their code travels inside the stream, not on the
// renderer command line.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use ripwerk_core::error::Result;
use ripwerk_core::types::PageRange;
use ripwerk_document::ScannedDocument;
use ripwerk_options::{Engine, OptionsetId};

/// One scheduled renderer invocation.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    /// Scope holding the effective options for the whole range.
    pub optionset: OptionsetId,
    /// Pages to render; `None` renders the whole document without any
    /// page extraction.
    pub range: Option<PageRange>,
}

/// Plan and execute the rendering of one document.
///
/// `extra_overrides` supplements the document's own feature markers with
/// externally supplied per-page values (command-line page ranges); where
/// both bind the same option on the same page, the external value wins.
///
/// The `render` callback is invoked once per scheduled range, in page
/// order, and runs to completion before planning continues — renderer
/// invocations are strictly serialized because they share the downstream
/// sink.  The first callback error aborts all remaining ranges.
pub fn plan_document<F>(
    engine: &mut Engine,
    doc: &ScannedDocument,
    extra_overrides: &HashMap<u32, Vec<(String, String)>>,
    mut render: F,
) -> Result<()>
where
    F: FnMut(&mut Engine, &RenderRequest) -> Result<()>,
{
    let total = doc.page_count()?;

    let default = engine.optionset("default");
    let current = engine.optionset("currentpage");
    let previous = engine.optionset("previouspage");

    engine.delete_values(current);
    engine.copy_values(default, current);
    engine.delete_values(previous);
    engine.copy_values(current, previous);

    let result = scan_pages(
        engine,
        doc,
        extra_overrides,
        total,
        current,
        previous,
        &mut render,
    );

    // Transient planner scopes never outlive the document.
    engine.delete_values(current);
    engine.delete_values(previous);
    result
}

fn scan_pages<F>(
    engine: &mut Engine,
    doc: &ScannedDocument,
    extra_overrides: &HashMap<u32, Vec<(String, String)>>,
    total: u32,
    current: OptionsetId,
    previous: OptionsetId,
    render: &mut F,
) -> Result<()>
where
    F: FnMut(&mut Engine, &RenderRequest) -> Result<()>,
{
    let mut first_page_of_range = 1u32;
    let mut boundary_found = false;

    for page in 1..=total {
        for (option, value) in doc.overrides_for(page) {
            apply_override(engine, current, option, value);
        }
        if let Some(extra) = extra_overrides.get(&page) {
            for (option, value) in extra {
                apply_override(engine, current, option, value);
            }
        }

        if !engine.equal(current, previous, true) {
            // The range is closed by the change, not opened by it: pages
            // up to the previous one render with the previous scope.
            if page > first_page_of_range {
                let range = PageRange {
                    first: first_page_of_range,
                    last: page - 1,
                };
                info!(%range, "options changed, flushing range");
                let request = RenderRequest {
                    optionset: previous,
                    range: Some(range),
                };
                render(engine, &request)?;
                boundary_found = true;
                first_page_of_range = page;
            } else {
                debug!(page, "options changed on the first page of a range");
            }
        }
        engine.copy_values(current, previous);
    }

    if boundary_found {
        let range = PageRange {
            first: first_page_of_range,
            last: total,
        };
        info!(%range, "flushing final range");
        let request = RenderRequest {
            optionset: previous,
            range: Some(range),
        };
        render(engine, &request)
    } else {
        // Uniform options across the document: one unranged request, no
        // page extraction at all.
        let request = RenderRequest {
            optionset: previous,
            range: None,
        };
        info!(pages = total, "uniform options, rendering whole document");
        render(engine, &request)
    }
}

fn apply_override(engine: &mut Engine, current: OptionsetId, option: &str, value: &str) {
    match engine.catalog().find(option) {
        Some(id) => {
            if let Err(err) = engine.set_validated_value(id, current, value, false) {
                warn!(option, value, %err, "page override dropped");
            }
        }
        None => warn!(option, value, "page override names an unknown option"),
    }
}
