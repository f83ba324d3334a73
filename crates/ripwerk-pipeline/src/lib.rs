// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ripwerk Pipeline — the moving parts between a scanned document and the
// output sink: the subprocess orchestrator, the render command builder,
// the page-scoped render planner, and the JCL merge stage.

pub mod jcl;
pub mod planner;
pub mod process;
pub mod render;

pub use jcl::{JclWrapper, MergeOutcome};
pub use planner::{RenderRequest, plan_document};
pub use process::{Orchestrator, SpawnedStage, StageAction, StageId, StageInput, StageOutput};
pub use render::{RenderRecipe, build_commandline};
