// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Catalog loader.
//
// Ripwerk does not parse PPD files itself; the queue setup tool digests
// the PPD into a JSON capability file once, and this loader replays it
// through the catalog population API.  Defaults are returned separately
// so the caller can seed the "default" optionset.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use ripwerk_core::error::{Result, RipwerkError};

use crate::catalog::{Catalog, ExecStyle, OptionType, Section};

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    options: Vec<OptionEntry>,
}

#[derive(Debug, Deserialize)]
struct OptionEntry {
    name: String,
    #[serde(rename = "type")]
    option_type: String,
    style: String,
    #[serde(default)]
    order: i32,
    #[serde(default)]
    section: Option<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    maxlength: Option<usize>,
    #[serde(default)]
    allowed_chars: Option<String>,
    #[serde(default)]
    allowed_regex: Option<String>,
    #[serde(default)]
    proto: Option<String>,
    #[serde(default)]
    default: Option<String>,
    #[serde(default)]
    settings: Vec<SettingEntry>,
}

#[derive(Debug, Deserialize)]
struct SettingEntry {
    value: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    driverval: Option<String>,
}

/// Load a digested capability file.
///
/// Returns the populated catalog plus the declared default values as
/// `(option name, value)` pairs in declaration order.
pub fn load_catalog(path: impl AsRef<Path>) -> Result<(Catalog, Vec<(String, String)>)> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).map_err(|e| {
        RipwerkError::Config(format!("cannot read capability file {}: {}", path.display(), e))
    })?;
    let file: CatalogFile = serde_json::from_str(&data).map_err(|e| {
        RipwerkError::CatalogDefinition(format!("{}: {}", path.display(), e))
    })?;

    let mut catalog = Catalog::new();
    let mut defaults = Vec::new();

    for entry in file.options {
        let option_type = parse_type(&entry.name, &entry.option_type)?;
        let style = parse_style(&entry.name, &entry.style)?;
        let id = catalog.assure_option(&entry.name, option_type, style);
        catalog.set_order(id, entry.order);

        {
            let opt = catalog.option_mut(id);
            if let Some(section) = entry.section.as_deref() {
                opt.section = parse_section(&entry.name, section)?;
            }
            opt.min = entry.min;
            opt.max = entry.max;
            opt.maxlength = entry.maxlength;
            opt.proto = entry.proto;
            if let Some(class) = entry.allowed_chars.as_deref() {
                opt.set_allowed_chars(class)?;
            }
            if let Some(pattern) = entry.allowed_regex.as_deref() {
                opt.set_allowed_regex(pattern)?;
            }
        }

        for setting in entry.settings {
            let stored = catalog.assure_setting(id, &setting.value);
            stored.comment = setting.comment;
            if let Some(driverval) = setting.driverval {
                stored.driverval = driverval;
            }
        }

        if let Some(default) = entry.default {
            defaults.push((entry.name, default));
        }
    }

    debug!(options = catalog.len(), defaults = defaults.len(), "catalog loaded");
    Ok((catalog, defaults))
}

fn parse_type(option: &str, value: &str) -> Result<OptionType> {
    match value {
        "bool" => Ok(OptionType::Bool),
        "enum" => Ok(OptionType::Enum),
        "pickmany" => Ok(OptionType::PickMany),
        "int" => Ok(OptionType::Int),
        "float" => Ok(OptionType::Float),
        "string" => Ok(OptionType::String),
        other => Err(RipwerkError::CatalogDefinition(format!(
            "option {option}: unknown type {other:?}"
        ))),
    }
}

fn parse_style(option: &str, value: &str) -> Result<ExecStyle> {
    match value {
        "postscript" => Ok(ExecStyle::PostScript),
        "commandline" => Ok(ExecStyle::CommandLine),
        "jcl" => Ok(ExecStyle::Jcl),
        "composite" => Ok(ExecStyle::Composite),
        other => Err(RipwerkError::CatalogDefinition(format!(
            "option {option}: unknown execution style {other:?}"
        ))),
    }
}

fn parse_section(option: &str, value: &str) -> Result<Section> {
    match value {
        "anysetup" => Ok(Section::AnySetup),
        "documentsetup" => Ok(Section::DocumentSetup),
        "pagesetup" => Ok(Section::PageSetup),
        "prolog" => Ok(Section::Prolog),
        "jclsetup" => Ok(Section::JclSetup),
        other => Err(RipwerkError::CatalogDefinition(format!(
            "option {option}: unknown section {other:?}"
        ))),
    }
}
