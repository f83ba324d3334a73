// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end pipeline tests: real subprocesses, real pipes, fake
// renderers built from shell one-liners.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::{NamedTempFile, TempDir};

use ripwerk_core::FilterConfig;
use ripwerk_core::RipwerkError;
use ripwerk_core::types::{ExitCode, Job, StageStatus};
use ripwerk_filter::driver::{exit_code_for, run_job};
use ripwerk_filter::glue;
use ripwerk_options::{Catalog, Engine, ExecStyle, OptionType};

const UEL: &str = "\x1b%-12345X";

/// Sink that both the driver and the test can hold.
#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn test_engine() -> Engine {
    let mut catalog = Catalog::new();
    let duplex = catalog.assure_option("Duplex", OptionType::Enum, ExecStyle::CommandLine);
    // Empty driver text keeps the fake renderer command line untouched
    // while still making option differences split page ranges.
    catalog.assure_setting(duplex, "On").driverval = "".into();
    catalog.assure_setting(duplex, "Off").driverval = "".into();
    let watermark = catalog.assure_option("Watermark", OptionType::String, ExecStyle::PostScript);
    catalog.option_mut(watermark).proto = Some("(%s) watermark".into());

    let mut engine = Engine::new(catalog);
    let default = engine.optionset("default");
    engine
        .set_validated_value(duplex, default, "Off", false)
        .unwrap();
    engine
}

fn test_job() -> Job {
    Job::new("pipeline-test", "alice", "workstation")
}

fn spool_document(pages: u32, markers: &[(u32, &str)]) -> NamedTempFile {
    let mut spool = NamedTempFile::new().unwrap();
    writeln!(spool, "%!PS-Adobe-3.0\n%%Pages: {pages}\n%%EndComments").unwrap();
    for page in 1..=pages {
        writeln!(spool, "%%Page: {page} {page}").unwrap();
        for (marker_page, marker) in markers {
            if *marker_page == page {
                writeln!(spool, "%%IncludeFeature: {marker}").unwrap();
            }
        }
        writeln!(spool, "(page {page}) show").unwrap();
    }
    writeln!(spool, "%%Trailer\n%%EOF").unwrap();
    spool.flush().unwrap();
    spool
}

fn cat_config() -> FilterConfig {
    FilterConfig {
        renderer: "cat".into(),
        ..FilterConfig::default()
    }
}

fn no_cancel() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}

#[test]
fn uniform_document_streams_through_unchanged() {
    let mut engine = test_engine();
    let spool = spool_document(3, &[]);
    let sink = SharedBuf::default();

    run_job(
        &mut engine,
        &test_job(),
        &cat_config(),
        &[spool.path().to_path_buf()],
        no_cancel(),
        Box::new(sink.clone()),
    )
    .unwrap();

    let expected = std::fs::read_to_string(spool.path()).unwrap();
    assert_eq!(sink.contents(), expected);
}

#[test]
fn option_change_renders_two_ranges() {
    let mut engine = test_engine();
    let spool = spool_document(4, &[(3, "*Duplex On")]);
    let sink = SharedBuf::default();

    run_job(
        &mut engine,
        &test_job(),
        &cat_config(),
        &[spool.path().to_path_buf()],
        no_cancel(),
        Box::new(sink.clone()),
    )
    .unwrap();

    let out = sink.contents();
    for page in 1..=4 {
        assert!(out.contains(&format!("(page {page}) show")), "page {page} missing");
    }
    // Two renderer invocations, each fed a standalone extracted document
    // carrying the shared prologue.
    assert_eq!(out.matches("%!PS-Adobe-3.0").count(), 2);
    let first = out.find("(page 2) show").unwrap();
    let second = out.find("(page 3) show").unwrap();
    assert!(first < second);
}

#[test]
fn postscript_setup_code_precedes_the_document() {
    let mut engine = test_engine();
    let watermark = engine.catalog().find("Watermark").unwrap();
    let default = engine.optionset("default");
    engine
        .set_validated_value(watermark, default, "Internal", false)
        .unwrap();

    let spool = spool_document(2, &[]);
    let sink = SharedBuf::default();
    run_job(
        &mut engine,
        &test_job(),
        &cat_config(),
        &[spool.path().to_path_buf()],
        no_cancel(),
        Box::new(sink.clone()),
    )
    .unwrap();

    let out = sink.contents();
    assert!(out.starts_with("(Internal) watermark\n%!PS-Adobe-3.0"));
}

#[test]
fn driver_jcl_header_is_merged_with_operator_commands() {
    let mut engine = test_engine();
    let spool = spool_document(2, &[]);
    let sink = SharedBuf::default();

    let config = FilterConfig {
        // The fake renderer emits a PJL header of its own, then forwards
        // the document.
        renderer: format!(
            "printf '{UEL_ESC}@PJL\\n@PJL SET RESOLUTION=300\\n@PJL ENTER LANGUAGE=POSTSCRIPT\\n'; cat",
            UEL_ESC = "\\033%%-12345X"
        ),
        jcl_prepend: vec![
            format!("{UEL}@PJL"),
            "@PJL SET RESOLUTION=600".into(),
            "@PJL SET DUPLEX=OFF".into(),
            UEL.into(),
        ],
        jcl_append: vec![format!("{UEL}@PJL EOJ")],
        ..FilterConfig::default()
    };

    run_job(
        &mut engine,
        &test_job(),
        &config,
        &[spool.path().to_path_buf()],
        no_cancel(),
        Box::new(sink.clone()),
    )
    .unwrap();

    let out = sink.contents();
    let expected_header = format!(
        "{UEL}@PJL\n@PJL SET DUPLEX=OFF\n@PJL SET RESOLUTION=600\n@PJL ENTER LANGUAGE=POSTSCRIPT\n%!PS-Adobe-3.0"
    );
    assert!(out.starts_with(&expected_header), "header not merged: {out:?}");
    // A detected driver header brings its own trailer: no operator append.
    assert!(!out.contains("@PJL EOJ"));
}

#[test]
fn operator_append_closes_jobs_without_driver_header() {
    let mut engine = test_engine();
    let spool = spool_document(1, &[]);
    let sink = SharedBuf::default();

    let config = FilterConfig {
        renderer: "cat".into(),
        jcl_prepend: vec![
            format!("{UEL}@PJL"),
            "@PJL SET RESOLUTION=600".into(),
            UEL.into(),
        ],
        jcl_append: vec![format!("{UEL}@PJL EOJ")],
        ..FilterConfig::default()
    };

    run_job(
        &mut engine,
        &test_job(),
        &config,
        &[spool.path().to_path_buf()],
        no_cancel(),
        Box::new(sink.clone()),
    )
    .unwrap();

    let out = sink.contents();
    // No driver header in `cat` output: verbatim prepend, then append.
    assert!(out.starts_with(&format!("{UEL}@PJL\n@PJL SET RESOLUTION=600\n{UEL}\n%!PS")));
    assert!(out.ends_with(&format!("{UEL}@PJL EOJ\n")));
}

#[test]
fn failing_renderer_aborts_after_first_range() {
    let mut engine = test_engine();
    let spool = spool_document(4, &[(3, "*Duplex On")]);
    let dir = TempDir::new().unwrap();
    let counter = dir.path().join("invocations");

    let config = FilterConfig {
        renderer: format!("printf x >> {}; exit 139", counter.display()),
        ..FilterConfig::default()
    };

    let err = run_job(
        &mut engine,
        &test_job(),
        &config,
        &[spool.path().to_path_buf()],
        no_cancel(),
        Box::new(SharedBuf::default()),
    )
    .unwrap_err();

    assert!(matches!(
        &err,
        RipwerkError::StageFailed { stage, status: StageStatus::Exited(139) }
            if stage.as_str() == "renderer"
    ));
    assert_eq!(exit_code_for(&err), ExitCode::DefectiveJob);
    // The first failure stops the planner: exactly one invocation.
    assert_eq!(std::fs::read_to_string(&counter).unwrap(), "x");
}

#[test]
fn unpageable_file_is_skipped_but_decides_the_exit_code() {
    let mut engine = test_engine();
    let mut broken = NamedTempFile::new().unwrap();
    writeln!(broken, "%!PS-Adobe-3.0\n(no page comments) show").unwrap();
    broken.flush().unwrap();
    let good = spool_document(2, &[]);
    let sink = SharedBuf::default();

    let err = run_job(
        &mut engine,
        &test_job(),
        &cat_config(),
        &[broken.path().to_path_buf(), good.path().to_path_buf()],
        no_cancel(),
        Box::new(sink.clone()),
    )
    .unwrap_err();

    // The good file still printed.
    assert!(sink.contents().contains("(page 2) show"));
    assert!(matches!(err, RipwerkError::PageCount(_)));
    assert_eq!(exit_code_for(&err), ExitCode::DefectiveJob);
}

#[test]
fn cancellation_yields_the_signal_exit_code() {
    let mut engine = test_engine();
    let spool = spool_document(2, &[]);
    let cancel = Arc::new(AtomicBool::new(true));

    let err = run_job(
        &mut engine,
        &test_job(),
        &cat_config(),
        &[spool.path().to_path_buf()],
        Arc::clone(&cancel),
        Box::new(SharedBuf::default()),
    )
    .unwrap_err();

    assert!(matches!(err, RipwerkError::Canceled));
    assert_eq!(exit_code_for(&err).code(), 4);
    assert!(cancel.load(Ordering::SeqCst));
}

#[test]
fn postpipe_receives_the_final_stream() {
    let mut engine = test_engine();
    let spool = spool_document(2, &[]);
    let dir = TempDir::new().unwrap();
    let received: PathBuf = dir.path().join("received");

    let config = FilterConfig {
        renderer: "cat".into(),
        postpipe: Some(format!("cat > {}", received.display())),
        ..FilterConfig::default()
    };

    run_job(
        &mut engine,
        &test_job(),
        &config,
        &[spool.path().to_path_buf()],
        no_cancel(),
        Box::new(SharedBuf::default()),
    )
    .unwrap();

    let expected = std::fs::read_to_string(spool.path()).unwrap();
    assert_eq!(std::fs::read_to_string(&received).unwrap(), expected);
}

#[test]
fn page_range_options_from_the_spooler_split_rendering() {
    let mut engine = test_engine();
    let mut job = test_job();
    glue::apply_option_string(&mut engine, &mut job, "2-3:Duplex=On");
    let spool = spool_document(4, &[]);
    let sink = SharedBuf::default();

    run_job(
        &mut engine,
        &job,
        &cat_config(),
        &[spool.path().to_path_buf()],
        no_cancel(),
        Box::new(sink.clone()),
    )
    .unwrap();

    // Ranges [1,1], [2,3], [4,4]: three extracted documents.
    assert_eq!(sink.contents().matches("%!PS-Adobe-3.0").count(), 3);
}
