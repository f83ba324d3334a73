// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ripwerk filter binary.
//
// Invoked by the spooler with the job's files and a flat option string;
// renders the job through the configured renderer and writes printer-ready
// data to stdout or the configured postpipe.  Diagnostics go to stderr,
// never into the job stream.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ripwerk_core::FilterConfig;
use ripwerk_core::error::Result;
use ripwerk_core::types::{ExitCode, Job};
use ripwerk_filter::{driver, glue};
use ripwerk_options::{Catalog, Engine, load_catalog};

#[derive(Parser, Debug)]
#[command(name = "ripwerk", version, about = "Spooler-side print rendering filter")]
struct Cli {
    /// Input PostScript files; standard input when none are given
    files: Vec<PathBuf>,

    /// Flat option string, e.g. "Duplex=On 3-5:PageSize=A4" (repeatable)
    #[arg(short = 'o', long = "options")]
    options: Vec<String>,

    /// Job title
    #[arg(short = 'J', long)]
    title: Option<String>,

    /// Number of copies
    #[arg(short = 'n', long, default_value_t = 1)]
    copies: u32,

    /// Requesting user
    #[arg(short = 'u', long, default_value = "unknown")]
    user: String,

    /// Originating host
    #[arg(short = 'H', long, default_value = "localhost")]
    host: String,

    /// Target printer queue name
    #[arg(short = 'P', long, default_value = "lp")]
    printer: String,

    /// Digested capability catalog (JSON) produced from the queue's PPD
    #[arg(long)]
    ppd: Option<PathBuf>,

    /// Filter configuration file
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(()) => {
            info!("job printed");
            ExitCode::Printed
        }
        Err(err) => {
            error!(%err, "job failed");
            driver::exit_code_for(&err)
        }
    };
    std::process::exit(code.code());
}

fn run(cli: Cli) -> Result<()> {
    let config = FilterConfig::load_or_default(cli.config.as_deref())?;

    let (catalog, defaults) = match &cli.ppd {
        Some(path) => load_catalog(path)?,
        None => {
            warn!("no capability catalog given, all options will be unknown");
            (Catalog::new(), Vec::new())
        }
    };
    let mut engine = Engine::new(catalog);

    // Seed the job baseline from the catalog defaults.
    let default_set = engine.optionset("default");
    for (name, value) in defaults {
        match engine.catalog().find(&name) {
            Some(option) => engine.set_validated_value(option, default_set, &value, true)?,
            None => warn!(option = %name, "default declared for unknown option"),
        }
    }

    let title = cli.title.clone().unwrap_or_else(|| {
        cli.files
            .first()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "(stdin)".to_string())
    });
    let mut job = Job::new(title, cli.user, cli.host);
    job.copies = cli.copies;
    job.printer = cli.printer;
    job.ppd_path = cli.ppd.as_ref().map(|p| p.display().to_string());

    // Fold the spooler's options into the store, then self-heal and merge
    // the user choices into the baseline the planner seeds from.
    for options in &cli.options {
        glue::apply_option_string(&mut engine, &mut job, options);
    }
    let userval = engine.optionset("userval");
    engine.check_consistency(userval)?;
    engine.copy_values(userval, default_set);
    engine.check_consistency(default_set)?;

    // A job arriving on stdin is spooled to disk first: the planner needs
    // to seek back into the document for page extraction.
    let mut files = cli.files;
    let mut stdin_spool = None;
    if files.is_empty() || (files.len() == 1 && files[0] == Path::new("-")) {
        let mut spool = tempfile::NamedTempFile::new()?;
        io::copy(&mut io::stdin().lock(), spool.as_file_mut())?;
        spool.as_file_mut().flush()?;
        files = vec![spool.path().to_path_buf()];
        stdin_spool = Some(spool);
    }

    // Route the spooler's termination signal into a flag the driver
    // observes synchronously between pipeline steps.
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    if let Err(err) = ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)) {
        warn!(%err, "cannot install signal handler");
    }

    info!(job = %job.id, title = %job.title, files = files.len(), "starting job");
    let result = driver::run_job(
        &mut engine,
        &job,
        &config,
        &files,
        cancel,
        Box::new(io::stdout()),
    );
    drop(stdin_spool);
    result
}
