// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Ripwerk Filter — spooler glue and the top-level job driver.  The binary
// in main.rs is a thin shell over these modules.

pub mod driver;
pub mod glue;
