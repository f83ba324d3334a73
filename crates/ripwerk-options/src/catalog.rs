// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer capability catalog.
//
// Holds every option a driver declares, with its type, execution style,
// constraints, and legal settings.  Populated through the loader API
// (`assure_option`, `assure_setting`, raw field writes) by the PPD parser,
// then handed to the engine and never mutated again.

use std::collections::HashMap;

use regex::Regex;

use ripwerk_core::error::{Result, RipwerkError};

/// Index of an option inside the catalog. Stable for the catalog's lifetime.
pub type OptionId = usize;

/// Declared value type of an option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionType {
    Bool,
    Enum,
    PickMany,
    Int,
    Float,
    String,
}

/// How an option's value reaches the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStyle {
    /// Injected into the PostScript stream; never part of the command line.
    PostScript,
    /// Passed as a renderer command-line argument.
    CommandLine,
    /// Emitted as a job-control command around the payload.
    Jcl,
    /// Combination option that expands into other options.
    Composite,
}

/// Document section an option's code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Section {
    #[default]
    AnySetup,
    DocumentSetup,
    PageSetup,
    Prolog,
    JclSetup,
}

/// One legal value of an enum/bool/string option.
#[derive(Debug, Clone)]
pub struct Setting {
    /// User-facing value, e.g. "A4".
    pub value: String,
    /// Optional human-readable comment, e.g. "A4 (210x297 mm)".
    pub comment: Option<String>,
    /// Literal driver-side substitution text for this choice.
    pub driverval: String,
}

/// A single printer capability.
pub struct Opt {
    name: String,
    pub option_type: OptionType,
    pub style: ExecStyle,
    /// Ordering hint for command-line and code assembly.
    pub order: i32,
    pub section: Section,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub maxlength: Option<usize>,
    allowed_chars: Option<Regex>,
    allowed_regex: Option<Regex>,
    /// Substitution template; `%s` is replaced by the current value.
    pub proto: Option<String>,
    settings: Vec<Setting>,
}

impl Opt {
    fn new(name: &str, option_type: OptionType, style: ExecStyle) -> Self {
        Self {
            name: name.to_string(),
            option_type,
            style,
            order: 0,
            section: Section::default(),
            min: None,
            max: None,
            maxlength: None,
            allowed_chars: None,
            allowed_regex: None,
            proto: None,
            settings: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &[Setting] {
        &self.settings
    }

    /// Look up a setting by its user-facing value, case-insensitively.
    pub fn setting(&self, value: &str) -> Option<&Setting> {
        self.settings
            .iter()
            .find(|s| s.value.eq_ignore_ascii_case(value))
    }

    /// Look up a setting by its driver-side substitution text.
    pub fn setting_by_driverval(&self, driverval: &str) -> Option<&Setting> {
        self.settings.iter().find(|s| s.driverval == driverval)
    }

    pub fn first_setting(&self) -> Option<&Setting> {
        self.settings.first()
    }

    /// Restrict valid free-text values to a character class, e.g. "a-zA-Z0-9_".
    pub fn set_allowed_chars(&mut self, class: &str) -> Result<()> {
        let pattern = format!("^[{class}]*$");
        let re = Regex::new(&pattern).map_err(|e| {
            RipwerkError::CatalogDefinition(format!(
                "option {}: bad character class {class:?}: {e}",
                self.name
            ))
        })?;
        self.allowed_chars = Some(re);
        Ok(())
    }

    /// Restrict valid free-text values to a full-match pattern.
    pub fn set_allowed_regex(&mut self, pattern: &str) -> Result<()> {
        let anchored = format!("^(?:{pattern})$");
        let re = Regex::new(&anchored).map_err(|e| {
            RipwerkError::CatalogDefinition(format!(
                "option {}: bad pattern {pattern:?}: {e}",
                self.name
            ))
        })?;
        self.allowed_regex = Some(re);
        Ok(())
    }

    /// Whether a free-text value satisfies this option's string constraints.
    pub fn string_valid(&self, value: &str) -> bool {
        if let Some(maxlength) = self.maxlength {
            if value.chars().count() > maxlength {
                return false;
            }
        }
        if let Some(re) = &self.allowed_chars {
            if !re.is_match(value) {
                return false;
            }
        }
        if let Some(re) = &self.allowed_regex {
            if !re.is_match(value) {
                return false;
            }
        }
        true
    }

    /// Substitute a value into the option's template.
    pub fn apply_proto(&self, value: &str) -> String {
        match &self.proto {
            Some(proto) => proto.replace("%s", value),
            None => value.to_string(),
        }
    }
}

/// The full capability catalog of one printer.
///
/// Options iterate in insertion order (the order the PPD declared them)
/// and are unique by name, case-insensitively.
#[derive(Default)]
pub struct Catalog {
    options: Vec<Opt>,
    by_name: HashMap<String, OptionId>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the existing option of this name or register a new one.
    ///
    /// Idempotent: a second call with the same name returns the original id
    /// and leaves type and style untouched.
    pub fn assure_option(&mut self, name: &str, option_type: OptionType, style: ExecStyle) -> OptionId {
        let key = name.to_ascii_lowercase();
        if let Some(&id) = self.by_name.get(&key) {
            return id;
        }
        let id = self.options.len();
        self.options.push(Opt::new(name, option_type, style));
        self.by_name.insert(key, id);
        id
    }

    /// Return the existing setting with this value or append a new one.
    pub fn assure_setting(&mut self, option: OptionId, value: &str) -> &mut Setting {
        let settings = &mut self.options[option].settings;
        if let Some(pos) = settings
            .iter()
            .position(|s| s.value.eq_ignore_ascii_case(value))
        {
            return &mut settings[pos];
        }
        settings.push(Setting {
            value: value.to_string(),
            comment: None,
            driverval: value.to_string(),
        });
        let last = settings.len() - 1;
        &mut settings[last]
    }

    pub fn set_order(&mut self, option: OptionId, order: i32) {
        self.options[option].order = order;
    }

    pub fn option(&self, id: OptionId) -> &Opt {
        &self.options[id]
    }

    /// Mutable access for the loader's raw field writes.
    pub fn option_mut(&mut self, id: OptionId) -> &mut Opt {
        &mut self.options[id]
    }

    /// Find an option by name, case-insensitively.
    pub fn find(&self, name: &str) -> Option<OptionId> {
        self.by_name.get(&name.to_ascii_lowercase()).copied()
    }

    /// All options in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (OptionId, &Opt)> {
        self.options.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assure_option_is_idempotent() {
        let mut catalog = Catalog::new();
        let a = catalog.assure_option("Duplex", OptionType::Enum, ExecStyle::CommandLine);
        let b = catalog.assure_option("duplex", OptionType::Bool, ExecStyle::Jcl);
        assert_eq!(a, b);
        // First declaration wins.
        assert_eq!(catalog.option(a).option_type, OptionType::Enum);
        assert_eq!(catalog.option(a).style, ExecStyle::CommandLine);
    }

    #[test]
    fn options_iterate_in_declaration_order() {
        let mut catalog = Catalog::new();
        catalog.assure_option("PageSize", OptionType::Enum, ExecStyle::PostScript);
        catalog.assure_option("Duplex", OptionType::Enum, ExecStyle::CommandLine);
        catalog.assure_option("Resolution", OptionType::Enum, ExecStyle::CommandLine);

        let names: Vec<&str> = catalog.iter().map(|(_, o)| o.name()).collect();
        assert_eq!(names, ["PageSize", "Duplex", "Resolution"]);
    }

    #[test]
    fn assure_setting_deduplicates_by_value() {
        let mut catalog = Catalog::new();
        let id = catalog.assure_option("PageSize", OptionType::Enum, ExecStyle::PostScript);
        catalog.assure_setting(id, "A4").driverval = "a4".into();
        catalog.assure_setting(id, "a4").comment = Some("A4 paper".into());

        let opt = catalog.option(id);
        assert_eq!(opt.settings().len(), 1);
        assert_eq!(opt.settings()[0].driverval, "a4");
        assert_eq!(opt.settings()[0].comment.as_deref(), Some("A4 paper"));
    }

    #[test]
    fn string_constraints_reject_and_accept() {
        let mut catalog = Catalog::new();
        let id = catalog.assure_option("JobName", OptionType::String, ExecStyle::Jcl);
        let opt = catalog.option_mut(id);
        opt.maxlength = Some(8);
        opt.set_allowed_chars("a-zA-Z0-9").unwrap();

        let opt = catalog.option(id);
        assert!(opt.string_valid("report1"));
        assert!(!opt.string_valid("too-long-name"));
        assert!(!opt.string_valid("bad name"));
    }

    #[test]
    fn allowed_regex_is_anchored() {
        let mut catalog = Catalog::new();
        let id = catalog.assure_option("Tray", OptionType::String, ExecStyle::CommandLine);
        catalog.option_mut(id).set_allowed_regex("[0-9]+").unwrap();

        let opt = catalog.option(id);
        assert!(opt.string_valid("42"));
        assert!(!opt.string_valid("tray42"));
    }

    #[test]
    fn proto_substitution() {
        let mut catalog = Catalog::new();
        let id = catalog.assure_option("Copies", OptionType::Int, ExecStyle::CommandLine);
        catalog.option_mut(id).proto = Some("-dNumCopies=%s".into());
        assert_eq!(catalog.option(id).apply_proto("3"), "-dNumCopies=3");
    }
}
