// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ripwerk Options — printer capability catalog and the scoped optionset
// store built on top of it.  The catalog is populated once from PPD data
// and immutable afterwards; optionsets are named, independent value scopes
// used for per-job and per-page option state.

pub mod catalog;
pub mod loader;
pub mod optionset;

pub use catalog::{Catalog, ExecStyle, Opt, OptionId, OptionType, Section, Setting};
pub use loader::load_catalog;
pub use optionset::{Engine, OptionsetId};
