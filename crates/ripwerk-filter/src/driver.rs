// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Top-level job driver.
//
// Wires the page planner, the render command builder, the subprocess
// orchestrator, and the JCL merge stage into one pipeline per render
// range and pumps every scheduled range into the shared output sink.
// All teardown decisions live here: a fatal error or a delivered
// termination signal kills every tracked stage before the error is
// translated into a spooler exit code.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use ripwerk_core::FilterConfig;
use ripwerk_core::error::{Result, RipwerkError};
use ripwerk_core::types::{
    ExitCode, Job, RENDERER_EXIT_WHITELIST, classify_renderer_status,
};
use ripwerk_document::ScannedDocument;
use ripwerk_options::Engine;
use ripwerk_pipeline::{
    JclWrapper, MergeOutcome, Orchestrator, RenderRequest, StageAction, StageInput, StageOutput,
    build_commandline, plan_document,
};

use crate::glue;

/// The output sink, shared with the in-process merge stages.
type SharedSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// Render every file of the job into `sink` (or the configured postpipe).
///
/// Files that cannot be paged are skipped and reported at the end; any
/// other failure aborts the whole job after group teardown.
pub fn run_job(
    engine: &mut Engine,
    job: &Job,
    config: &FilterConfig,
    files: &[PathBuf],
    cancel: Arc<AtomicBool>,
    sink: Box<dyn Write + Send>,
) -> Result<()> {
    let mut orch = Orchestrator::new();
    let result = run_job_inner(engine, job, config, files, &cancel, sink, &mut orch);
    if result.is_err() {
        orch.kill_all();
    }
    result
}

fn run_job_inner(
    engine: &mut Engine,
    job: &Job,
    config: &FilterConfig,
    files: &[PathBuf],
    cancel: &Arc<AtomicBool>,
    sink: Box<dyn Write + Send>,
    orch: &mut Orchestrator,
) -> Result<()> {
    let wrapper = JclWrapper::from_config(config);

    // The sink is either our own stdout (the caller's writer) or the
    // postpipe's stdin.
    let mut postpipe_id = None;
    let sink: Box<dyn Write + Send> = match &config.postpipe {
        Some(command) => {
            let stage = orch.spawn(
                "postpipe",
                StageAction::External(command.clone()),
                StageInput::Pipe,
                StageOutput::Inherit,
                false,
            )?;
            postpipe_id = Some(stage.id);
            let fd = stage.input.ok_or_else(|| {
                RipwerkError::Internal("postpipe spawned without stdin pipe".into())
            })?;
            Box::new(File::from(fd))
        }
        None => sink,
    };
    let sink: SharedSink = Arc::new(Mutex::new(sink));

    let mut exec = ExecState {
        config,
        orch: &mut *orch,
        sink: Arc::clone(&sink),
        wrapper: wrapper.clone(),
        merge_outcome: Arc::new(Mutex::new(None)),
        first_stream: true,
        last_epilog: String::new(),
        cancel: Arc::clone(cancel),
    };

    // A file that cannot be paged aborts that file, not the batch; the
    // first such error still decides the job's exit code.
    let mut skipped: Option<RipwerkError> = None;

    for path in files {
        if exec.cancel.load(Ordering::SeqCst) {
            return Err(RipwerkError::Canceled);
        }
        let doc = ScannedDocument::scan(path)?;
        if let Err(err) = doc.page_count() {
            warn!(file = %path.display(), %err, "skipping unprintable file");
            skipped.get_or_insert(err);
            continue;
        }

        let total = doc.page_count()?;
        let overrides = glue::collect_page_overrides(engine, total);
        info!(job = %job.id, file = %path.display(), pages = total, "rendering file");
        plan_document(engine, &doc, &overrides, |engine, request| {
            exec.execute(engine, &doc, request)
        })?;
    }

    // Close the job on the sink: the deferred driver epilog, then the
    // operator append unless a driver header already carries its own
    // trailer.
    {
        let mut out = sink.lock().map_err(poisoned_sink)?;
        if !exec.last_epilog.is_empty() {
            out.write_all(exec.last_epilog.as_bytes())?;
        }
        let outcome = *exec.merge_outcome.lock().map_err(poisoned_sink)?;
        if outcome != Some(MergeOutcome::HeaderMerged) {
            wrapper.write_append(&mut **out)?;
        }
        out.flush()?;
    }

    // Drop our sink handle so a postpipe sees EOF, then reap it.
    drop(exec);
    drop(sink);
    if let Some(id) = postpipe_id {
        let status = orch.wait(id)?;
        if !status.success() {
            return Err(RipwerkError::StageFailed {
                stage: "postpipe".into(),
                status,
            });
        }
    }

    match skipped {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Per-job execution state threaded through the planner callback.
struct ExecState<'a> {
    config: &'a FilterConfig,
    orch: &'a mut Orchestrator,
    sink: SharedSink,
    wrapper: JclWrapper,
    merge_outcome: Arc<Mutex<Option<MergeOutcome>>>,
    first_stream: bool,
    last_epilog: String,
    cancel: Arc<AtomicBool>,
}

impl ExecState<'_> {
    /// Run one scheduled render range through the full stage chain:
    /// feeder → (converter →) renderer → JCL merge → sink.
    fn execute(
        &mut self,
        engine: &mut Engine,
        doc: &ScannedDocument,
        request: &RenderRequest,
    ) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(RipwerkError::Canceled);
        }

        let recipe = build_commandline(engine, &self.config.renderer, request.optionset);
        self.last_epilog = recipe.jcl_epilog.clone();

        // Sub-ranges are materialized into a standalone temp document;
        // the whole-document path streams the spool file directly.  The
        // temp handle lives to the end of this call, so the file is
        // unlinked right after the renderer that consumed it exited.
        let mut range_doc = None;
        let source: PathBuf = match request.range {
            Some(range) => {
                let temp = doc.extract_range(range.first, range.last)?;
                let path = temp.path().to_path_buf();
                range_doc = Some(temp);
                path
            }
            None => doc.path().to_path_buf(),
        };

        // Renderer, optionally behind the opaque input converter.
        let (feed_fd, renderer_out, renderer_id, converter_id) = match &self.config.converter {
            Some(converter) => {
                let conv = self.orch.spawn(
                    "converter",
                    StageAction::External(converter.clone()),
                    StageInput::Pipe,
                    StageOutput::Pipe,
                    false,
                )?;
                let conv_out = conv.output.ok_or_else(missing_pipe)?;
                let renderer = self.orch.spawn(
                    "renderer",
                    StageAction::External(recipe.command_line.clone()),
                    StageInput::Fd(conv_out),
                    StageOutput::Pipe,
                    true,
                )?;
                (
                    conv.input.ok_or_else(missing_pipe)?,
                    renderer.output.ok_or_else(missing_pipe)?,
                    renderer.id,
                    Some(conv.id),
                )
            }
            None => {
                let renderer = self.orch.spawn(
                    "renderer",
                    StageAction::External(recipe.command_line.clone()),
                    StageInput::Pipe,
                    StageOutput::Pipe,
                    true,
                )?;
                (
                    renderer.input.ok_or_else(missing_pipe)?,
                    renderer.output.ok_or_else(missing_pipe)?,
                    renderer.id,
                    None,
                )
            }
        };

        // Feeder: the read-ahead splicer that hands the PostScript setup
        // code plus the document bytes to the first consuming stage.
        let setup = recipe.ps_setup_code.clone();
        let source_path = source.clone();
        let feeder = self.orch.spawn(
            "feeder",
            StageAction::InProcess(Box::new(move |_, stdout| {
                feed_document(&setup, &source_path, stdout)
            })),
            StageInput::Null,
            StageOutput::Fd(feed_fd),
            false,
        )?;

        // Merge stage: full JCL handling on the job's first stream, bare
        // passthrough afterwards — JCL wraps the job, not every range.
        let merge = self.spawn_merge_stage(renderer_out, &recipe.jcl_prolog)?;

        let feeder_status = self.orch.wait(feeder.id)?;
        if !feeder_status.success() {
            // Usually EPIPE from a renderer that died early; the renderer
            // status below is authoritative.
            warn!(%feeder_status, "document feeder did not finish cleanly");
        }
        if let Some(id) = converter_id {
            let status = self.orch.wait(id)?;
            if !status.success() {
                return Err(RipwerkError::StageFailed {
                    stage: "converter".into(),
                    status,
                });
            }
        }
        let renderer_status = self.orch.wait(renderer_id)?;
        let merge_status = self.orch.wait(merge)?;

        match renderer_status {
            ripwerk_core::types::StageStatus::Exited(code)
                if RENDERER_EXIT_WHITELIST.contains(&code) => {}
            status => {
                return Err(RipwerkError::StageFailed {
                    stage: "renderer".into(),
                    status,
                });
            }
        }
        if !merge_status.success() {
            return Err(RipwerkError::StageFailed {
                stage: "output".into(),
                status: merge_status,
            });
        }
        drop(range_doc);
        Ok(())
    }

    fn spawn_merge_stage(
        &mut self,
        renderer_out: std::os::fd::OwnedFd,
        jcl_prolog: &str,
    ) -> Result<ripwerk_pipeline::StageId> {
        let sink = Arc::clone(&self.sink);
        let action: StageAction = if self.first_stream {
            self.first_stream = false;
            let wrapper = self.wrapper.clone();
            let outcome_slot = Arc::clone(&self.merge_outcome);
            // The driver JCL prolog travels ahead of the renderer bytes so
            // the merge stage sees it as the driver-emitted header.
            let prolog = jcl_prolog.as_bytes().to_vec();
            StageAction::InProcess(Box::new(move |stdin, _| {
                let Some(raw) = stdin else { return 1 };
                let mut reader = BufReader::new(Cursor::new(prolog).chain(raw));
                let Ok(mut out) = sink.lock() else { return 1 };
                match wrapper.process(&mut reader, &mut **out) {
                    Ok(outcome) => {
                        if let Ok(mut slot) = outcome_slot.lock() {
                            *slot = Some(outcome);
                        }
                        0
                    }
                    Err(_) => 1,
                }
            }))
        } else {
            StageAction::InProcess(Box::new(move |stdin, _| {
                let Some(mut raw) = stdin else { return 1 };
                let Ok(mut out) = sink.lock() else { return 1 };
                match io::copy(&mut raw, &mut **out) {
                    Ok(_) => 0,
                    Err(_) => 1,
                }
            }))
        };
        let stage = self.orch.spawn(
            "jcl-merge",
            action,
            StageInput::Fd(renderer_out),
            StageOutput::Null,
            false,
        )?;
        Ok(stage.id)
    }
}

/// Feed the PostScript setup code and the document into the pipeline.
fn feed_document(setup: &str, source: &Path, stdout: Option<File>) -> i32 {
    let Some(mut out) = stdout else { return 1 };
    let run = |out: &mut File| -> io::Result<()> {
        if !setup.is_empty() {
            out.write_all(setup.as_bytes())?;
        }
        let mut file = File::open(source)?;
        io::copy(&mut file, out)?;
        out.flush()
    };
    match run(&mut out) {
        Ok(()) => 0,
        Err(_) => 1,
    }
}

fn missing_pipe() -> RipwerkError {
    RipwerkError::Internal("stage spawned without a requested pipe".into())
}

fn poisoned_sink<T>(_: T) -> RipwerkError {
    RipwerkError::Internal("output sink lock poisoned".into())
}

/// Translate a job failure into the spooler exit-code contract.
pub fn exit_code_for(err: &RipwerkError) -> ExitCode {
    match err {
        RipwerkError::Canceled => ExitCode::TerminatedBySignal,
        RipwerkError::StageFailed { stage, status } if stage.as_str() == "renderer" => {
            classify_renderer_status(*status)
        }
        RipwerkError::StageFailed { .. } => ExitCode::PrinterError,
        RipwerkError::PageCount(_) | RipwerkError::RangeOutOfBounds { .. } => {
            ExitCode::DefectiveJob
        }
        RipwerkError::UnknownOption(_)
        | RipwerkError::InvalidValue { .. }
        | RipwerkError::CatalogDefinition(_)
        | RipwerkError::Config(_)
        | RipwerkError::Spawn { .. }
        | RipwerkError::Io(_)
        | RipwerkError::Serialization(_)
        | RipwerkError::Internal(_) => ExitCode::BadSettings,
    }
}
