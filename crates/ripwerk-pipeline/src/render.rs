// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Render command builder.
//
// Pure function of the option engine: turns one optionset into the
// renderer command line plus the driver-side JCL and PostScript code the
// bound options contribute.  No I/O, nothing spawned.

use tracing::debug;

use ripwerk_options::{Engine, ExecStyle, OptionsetId};

/// Everything the driver needs to run one renderer invocation.
#[derive(Debug, Clone, Default)]
pub struct RenderRecipe {
    /// Shell command line for the renderer stage.
    pub command_line: String,
    /// Driver JCL emitted ahead of the renderer's byte stream.
    pub jcl_prolog: String,
    /// Driver JCL emitted after the renderer's byte stream.  Options in
    /// this catalog model contribute no trailer commands, so this stays
    /// empty and the operator append block closes the job; the field is
    /// part of the recipe contract and written unconditionally.
    pub jcl_epilog: String,
    /// PostScript option code for the job's setup section, fed to the
    /// renderer ahead of the document.
    pub ps_setup_code: String,
}

/// Build the render recipe for one optionset.
///
/// Options are emitted in ascending order of their ordering hint, ties
/// broken by catalog declaration order.  An option contributes nothing
/// when its value is absent, "None", or resolves to empty driver text.
pub fn build_commandline(engine: &Engine, renderer: &str, optionset: OptionsetId) -> RenderRecipe {
    let catalog = engine.catalog();

    let mut bound = engine.scoped_values(optionset);
    bound.sort_by_key(|(id, _)| catalog.option(*id).order);

    let mut args: Vec<String> = Vec::new();
    let mut jcl_lines: Vec<String> = Vec::new();
    let mut ps_lines: Vec<String> = Vec::new();

    for (id, value) in bound {
        if value.is_empty() || value == "None" {
            continue;
        }
        let opt = catalog.option(id);
        let text = match opt.setting(value) {
            Some(setting) => setting.driverval.clone(),
            None => opt.apply_proto(value),
        };
        if text.is_empty() {
            continue;
        }
        match opt.style {
            ExecStyle::CommandLine => args.push(text),
            ExecStyle::Jcl => jcl_lines.push(text),
            ExecStyle::PostScript => ps_lines.push(text),
            // Composite options expand into their members at load time;
            // the composite itself carries no driver text of its own.
            ExecStyle::Composite => {}
        }
    }

    let mut command_line = renderer.to_string();
    for arg in &args {
        command_line.push(' ');
        command_line.push_str(arg);
    }

    let recipe = RenderRecipe {
        command_line,
        jcl_prolog: join_lines(&jcl_lines),
        jcl_epilog: String::new(),
        ps_setup_code: join_lines(&ps_lines),
    };
    debug!(
        optionset = engine.optionset_name(optionset),
        command = %recipe.command_line,
        jcl_lines = jcl_lines.len(),
        ps_lines = ps_lines.len(),
        "render recipe built"
    );
    recipe
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}
