// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ripwerk Document — structure scanning for PostScript input.
//
// Only DSC comments are read, never page content: the filter needs page
// boundaries and in-document option markers, not an interpreter.

pub mod dsc;

pub use dsc::{PageSpan, ScannedDocument};
