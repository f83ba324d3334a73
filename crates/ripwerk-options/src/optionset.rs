// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scoped optionset store.
//
// An optionset is a named scope of option value bindings: "default" holds
// the PPD defaults, "userval" the spooler command line, "pages:N-M" the
// per-range overrides, and "currentpage"/"previouspage" are transient
// scopes owned by the page planner.  A value exists in a scope only if it
// was explicitly set; absence is a defined absence, not an empty default.

use std::collections::HashMap;

use tracing::{debug, warn};

use ripwerk_core::error::{Result, RipwerkError};

use crate::catalog::{Catalog, ExecStyle, Opt, OptionId, OptionType};

/// Index of an optionset scope. Stable for the engine's lifetime.
pub type OptionsetId = usize;

/// The option-state engine: one catalog plus all optionset scopes.
///
/// Owned by the single orchestrating process; children never see it.
pub struct Engine {
    catalog: Catalog,
    names: Vec<String>,
    by_name: HashMap<String, OptionsetId>,
    values: Vec<HashMap<OptionId, String>>,
}

impl Engine {
    /// Build an engine over a fully loaded catalog.
    ///
    /// The "default" and "userval" scopes always exist.
    pub fn new(catalog: Catalog) -> Self {
        let mut engine = Self {
            catalog,
            names: Vec::new(),
            by_name: HashMap::new(),
            values: Vec::new(),
        };
        engine.optionset("default");
        engine.optionset("userval");
        engine
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // -- Scope management -----------------------------------------------------

    /// Return the id of the named scope, allocating it on first reference.
    pub fn optionset(&mut self, name: &str) -> OptionsetId {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), id);
        self.values.push(HashMap::new());
        debug!(optionset = name, id, "optionset allocated");
        id
    }

    /// Look up a scope without allocating.
    pub fn optionset_id(&self, name: &str) -> Option<OptionsetId> {
        self.by_name.get(name).copied()
    }

    pub fn optionset_name(&self, id: OptionsetId) -> &str {
        &self.names[id]
    }

    /// All allocated scopes in allocation order.
    pub fn scopes(&self) -> impl Iterator<Item = (OptionsetId, &str)> {
        self.names.iter().enumerate().map(|(id, n)| (id, n.as_str()))
    }

    // -- Value access ---------------------------------------------------------

    /// Current value of an option in a scope, if one was ever set.
    pub fn value(&self, option: OptionId, optionset: OptionsetId) -> Option<&str> {
        self.values[optionset].get(&option).map(String::as_str)
    }

    /// Values bound in a scope, in catalog declaration order.
    pub fn scoped_values(&self, optionset: OptionsetId) -> Vec<(OptionId, &str)> {
        self.catalog
            .iter()
            .filter_map(|(id, _)| self.value(id, optionset).map(|v| (id, v)))
            .collect()
    }

    /// Unconditional overwrite/insert, bypassing validation.
    pub fn set_value(&mut self, option: OptionId, optionset: OptionsetId, value: impl Into<String>) {
        self.values[optionset].insert(option, value.into());
    }

    /// Copy every value bound in `src` into `dst`, overwriting on conflict.
    /// Options absent in `src` are left untouched in `dst`.
    pub fn copy_values(&mut self, src: OptionsetId, dst: OptionsetId) {
        let copied = self.values[src].clone();
        self.values[dst].extend(copied);
    }

    /// Remove every value bound to a scope; the scope itself stays allocated.
    pub fn delete_values(&mut self, optionset: OptionsetId) {
        self.values[optionset].clear();
    }

    /// Compare two scopes over every option that has an entry in at least
    /// one of them; an option present in neither is vacuously equal.
    ///
    /// With `except_postscript_style`, options injected directly into the
    /// PostScript stream are excluded: their differences never force a
    /// renderer restart.
    pub fn equal(&self, a: OptionsetId, b: OptionsetId, except_postscript_style: bool) -> bool {
        for (id, opt) in self.catalog.iter() {
            if except_postscript_style && opt.style == ExecStyle::PostScript {
                continue;
            }
            if self.value(id, a) != self.value(id, b) {
                return false;
            }
        }
        true
    }

    // -- Validated writes -----------------------------------------------------

    /// Type-checked entry point for setting a value.
    ///
    /// Without `force`, an invalid value is rejected and the optionset is
    /// left exactly as it was.  With `force`, the value is clamped,
    /// truncated, or replaced by a declared fallback, and a warning is
    /// logged.  A missing fallback setting in `force` mode is a broken
    /// printer description and fails hard.
    pub fn set_validated_value(
        &mut self,
        option: OptionId,
        optionset: OptionsetId,
        value: &str,
        force: bool,
    ) -> Result<()> {
        let validated = self.validate(option, value, force)?;
        self.set_value(option, optionset, validated);
        self.sync_linked_pair(option, optionset);
        Ok(())
    }

    fn validate(&self, option: OptionId, value: &str, force: bool) -> Result<String> {
        let opt = self.catalog.option(option);
        match opt.option_type {
            OptionType::Bool => validate_bool(opt, value, force),
            OptionType::Enum => validate_enum(opt, value, force),
            OptionType::Int => validate_numeric(opt, value, force, true),
            OptionType::Float => validate_numeric(opt, value, force, false),
            // Multi-choice values behave as free-form strings at this layer.
            OptionType::String | OptionType::PickMany => validate_string(opt, value, force),
        }
    }

    // -- Linked options -------------------------------------------------------

    /// Mirror PageSize into PageRegion and vice versa.
    ///
    /// A value matching a known setting of the partner copies the setting's
    /// canonical value; a custom value propagates unchanged.  No-op for any
    /// other option.
    pub fn sync_linked_pair(&mut self, changed: OptionId, optionset: OptionsetId) {
        let partner_name = match self.catalog.option(changed).name() {
            "PageSize" => "PageRegion",
            "PageRegion" => "PageSize",
            _ => return,
        };
        let Some(partner) = self.catalog.find(partner_name) else {
            return;
        };
        let Some(value) = self.value(changed, optionset).map(str::to_string) else {
            return;
        };
        let resolved = match self.catalog.option(partner).setting(&value) {
            Some(setting) => setting.value.clone(),
            None => value,
        };
        self.set_value(partner, optionset, resolved);
    }

    /// Self-healing pass over a freshly populated scope.
    ///
    /// Re-validates every stored value with `force`, then re-asserts the
    /// PageSize/PageRegion equality invariant, correcting the PageRegion
    /// side.  Divergence is logged and repaired, never treated as an error;
    /// only a broken printer description can make this fail.
    pub fn check_consistency(&mut self, optionset: OptionsetId) -> Result<()> {
        let bound: Vec<OptionId> = self
            .catalog
            .iter()
            .filter(|(id, _)| self.value(*id, optionset).is_some())
            .map(|(id, _)| id)
            .collect();

        for option in bound {
            if let Some(value) = self.value(option, optionset).map(str::to_string) {
                self.set_validated_value(option, optionset, &value, true)?;
            }
        }

        if let (Some(size), Some(region)) =
            (self.catalog.find("PageSize"), self.catalog.find("PageRegion"))
        {
            if let Some(size_value) = self.value(size, optionset).map(str::to_string) {
                if self.value(region, optionset) != Some(size_value.as_str()) {
                    warn!(
                        optionset = self.optionset_name(optionset),
                        pagesize = %size_value,
                        "PageSize and PageRegion diverged, correcting PageRegion"
                    );
                    self.set_value(region, optionset, size_value);
                }
            }
        }
        Ok(())
    }
}

// -- Per-type validation ------------------------------------------------------

fn validate_bool(opt: &Opt, value: &str, force: bool) -> Result<String> {
    let lower = value.trim().to_ascii_lowercase();
    match lower.as_str() {
        "false" | "off" | "no" | "0" => Ok("0".into()),
        "true" | "on" | "yes" | "1" => Ok("1".into()),
        _ if force => {
            warn!(option = opt.name(), value, "unrecognized boolean, assuming false");
            Ok("0".into())
        }
        _ => Err(invalid(opt, value, "not a boolean")),
    }
}

fn validate_enum(opt: &Opt, value: &str, force: bool) -> Result<String> {
    if value.eq_ignore_ascii_case("none") {
        return Ok("None".into());
    }
    if let Some(setting) = opt.setting(value) {
        return Ok(setting.value.clone());
    }
    // Custom page dimensions are legal without a literal "Custom.WxH"
    // setting, as long as the option declares Custom at all.
    if matches!(opt.name(), "PageSize" | "PageRegion")
        && value.strip_prefix("Custom.").is_some_and(|rest| !rest.is_empty())
        && opt.setting("Custom").is_some()
    {
        return Ok(value.to_string());
    }
    if force {
        return fallback_to_first(opt, value);
    }
    Err(invalid(opt, value, "not a valid choice"))
}

fn validate_numeric(opt: &Opt, value: &str, force: bool, integer: bool) -> Result<String> {
    let parsed: Option<f64> = if integer {
        value.trim().parse::<i64>().ok().map(|n| n as f64)
    } else {
        value.trim().parse::<f64>().ok()
    };

    let Some(number) = parsed else {
        if force {
            let clamped = clamp(0.0, opt.min, opt.max);
            warn!(option = opt.name(), value, "not a number, using {clamped}");
            return Ok(render_number(clamped, integer));
        }
        return Err(invalid(opt, value, "not a number"));
    };

    let clamped = clamp(number, opt.min, opt.max);
    if clamped != number {
        if !force {
            return Err(invalid(opt, value, "out of range"));
        }
        warn!(
            option = opt.name(),
            value, clamped, "value out of range, clamping"
        );
        return Ok(render_number(clamped, integer));
    }
    Ok(render_number(number, integer))
}

fn validate_string(opt: &Opt, value: &str, force: bool) -> Result<String> {
    // The empty string is the canonical stored form of "no value" (it is
    // what "None" maps to) and always revalidates to itself.
    if value.is_empty() {
        return Ok(String::new());
    }
    if let Some(setting) = opt.setting(value) {
        return Ok(setting.value.clone());
    }
    if opt.string_valid(value) {
        return Ok(canonicalize_string(opt, value));
    }
    if force {
        if let Some(maxlength) = opt.maxlength {
            let truncated: String = value.chars().take(maxlength).collect();
            if opt.string_valid(&truncated) {
                warn!(
                    option = opt.name(),
                    value,
                    truncated = %truncated,
                    "string too long, truncating"
                );
                return Ok(canonicalize_string(opt, &truncated));
            }
        }
        return fallback_to_first(opt, value);
    }
    Err(invalid(opt, value, "fails string constraints"))
}

/// A free-text value that, substituted into the option's template, hits a
/// declared setting's driver literal is stored under the setting's
/// canonical value instead — drivers alias free text to canonical choices.
fn canonicalize_string(opt: &Opt, value: &str) -> String {
    let applied = opt.apply_proto(value);
    if let Some(setting) = opt.setting_by_driverval(&applied) {
        return setting.value.clone();
    }
    if value.eq_ignore_ascii_case("none") {
        return String::new();
    }
    value.to_string()
}

fn fallback_to_first(opt: &Opt, rejected: &str) -> Result<String> {
    match opt.first_setting() {
        Some(setting) => {
            warn!(
                option = opt.name(),
                value = rejected,
                fallback = %setting.value,
                "invalid value, falling back to first setting"
            );
            Ok(setting.value.clone())
        }
        None => Err(RipwerkError::CatalogDefinition(format!(
            "option {} declares no settings to fall back to",
            opt.name()
        ))),
    }
}

fn invalid(opt: &Opt, value: &str, reason: &str) -> RipwerkError {
    RipwerkError::InvalidValue {
        option: opt.name().to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn clamp(number: f64, min: Option<f64>, max: Option<f64>) -> f64 {
    let mut result = number;
    if let Some(min) = min {
        result = result.max(min);
    }
    if let Some(max) = max {
        result = result.min(max);
    }
    result
}

fn render_number(number: f64, integer: bool) -> String {
    if integer {
        (number as i64).to_string()
    } else {
        number.to_string()
    }
}
