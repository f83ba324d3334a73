// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Spooler glue.
//
// Decomposes the flat option string handed over by the spooler into
// (pagerange?, key, value?) triples and folds them into the optionset
// store.  Unknown keys are logged and dropped, never fatal: a spooler
// routinely passes options this queue does not know.

use std::collections::HashMap;

use tracing::{debug, warn};

use ripwerk_core::types::Job;
use ripwerk_options::Engine;

/// Fold one flat option string into the engine.
///
/// Tokens are separated by whitespace or commas; quoting protects
/// embedded separators.  Each token is `key=value`, a bool shorthand
/// (`Duplex` / `noDuplex`), and may carry a leading `N[-M]:` page-range
/// prefix that routes the binding into the `pages:N-M` scope instead of
/// `userval`.
pub fn apply_option_string(engine: &mut Engine, job: &mut Job, options: &str) {
    for token in tokenize(options) {
        apply_token(engine, job, &token);
    }
}

fn apply_token(engine: &mut Engine, job: &mut Job, token: &str) {
    let (scope_name, body) = split_range_prefix(token);

    let (key, value) = match body.split_once('=') {
        Some((key, value)) => (key.to_string(), value.to_string()),
        None => match body.strip_prefix("no") {
            Some(rest) if engine.catalog().find(rest).is_some() => {
                (rest.to_string(), "0".to_string())
            }
            _ => (body.to_string(), "1".to_string()),
        },
    };
    if key.is_empty() {
        return;
    }

    // Job-level keys are written into the job record, not the store.
    match key.as_str() {
        "copies" => {
            match value.parse::<u32>() {
                Ok(n) if n > 0 => job.copies = n,
                _ => warn!(value = %value, "ignoring unusable copies count"),
            }
            return;
        }
        "title" | "job-name" => {
            job.title = value;
            return;
        }
        _ => {}
    }

    let Some(option) = engine.catalog().find(&key) else {
        warn!(option = %key, "unknown option from spooler, dropped");
        return;
    };
    let scope = engine.optionset(&scope_name);
    match engine.set_validated_value(option, scope, &value, false) {
        Ok(()) => debug!(option = %key, value = %value, scope = %scope_name, "option applied"),
        Err(err) => warn!(option = %key, value = %value, %err, "option rejected, dropped"),
    }
}

/// Split an optional leading `N[-M]:` page-range prefix off a token.
fn split_range_prefix(token: &str) -> (String, &str) {
    if let Some((prefix, rest)) = token.split_once(':') {
        let is_range = !prefix.is_empty()
            && prefix.chars().all(|c| c.is_ascii_digit() || c == '-')
            && prefix.chars().next().is_some_and(|c| c.is_ascii_digit());
        if is_range && !rest.is_empty() {
            return (format!("pages:{prefix}"), rest);
        }
    }
    ("userval".to_string(), token)
}

/// Tokenize on whitespace and commas, honoring single and double quotes.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None => match c {
                '"' | '\'' => quote = Some(c),
                c if c.is_whitespace() || c == ',' => {
                    if !current.is_empty() {
                        tokens.push(std::mem::take(&mut current));
                    }
                }
                c => current.push(c),
            },
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Gather per-page overrides from the command line's `pages:N-M` scopes.
///
/// Pages inside a range get the scope's bindings; the page after the
/// range gets the job baseline back, so a range does not leak past its
/// end.  Returned pages beyond `total_pages` are harmless — the planner
/// never visits them.
pub fn collect_page_overrides(
    engine: &Engine,
    total_pages: u32,
) -> HashMap<u32, Vec<(String, String)>> {
    let mut overrides: HashMap<u32, Vec<(String, String)>> = HashMap::new();
    let baseline = engine.optionset_id("default");

    for (scope, name) in engine.scopes() {
        let Some(range_text) = name.strip_prefix("pages:") else {
            continue;
        };
        let Some((first, last)) = parse_page_range(range_text) else {
            warn!(scope = name, "unparsable page range scope");
            continue;
        };

        for (option, value) in engine.scoped_values(scope) {
            let option_name = engine.catalog().option(option).name().to_string();
            for page in first..=last.min(total_pages) {
                overrides
                    .entry(page)
                    .or_default()
                    .push((option_name.clone(), value.to_string()));
            }
            // Restore the baseline after the range ends.
            if last < total_pages {
                if let Some(base) = baseline.and_then(|b| engine.value(option, b)) {
                    overrides
                        .entry(last + 1)
                        .or_default()
                        .push((option_name.clone(), base.to_string()));
                }
            }
        }
    }
    overrides
}

fn parse_page_range(text: &str) -> Option<(u32, u32)> {
    let (first, last) = match text.split_once('-') {
        Some((first, last)) => (first.parse().ok()?, last.parse().ok()?),
        None => {
            let page = text.parse().ok()?;
            (page, page)
        }
    };
    if first == 0 || last < first {
        return None;
    }
    Some((first, last))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripwerk_options::{Catalog, ExecStyle, OptionType};

    fn test_engine() -> Engine {
        let mut catalog = Catalog::new();
        let duplex = catalog.assure_option("Duplex", OptionType::Enum, ExecStyle::CommandLine);
        catalog.assure_setting(duplex, "On").driverval = "-dDuplex".into();
        catalog.assure_setting(duplex, "Off").driverval = "".into();
        let tumble = catalog.assure_option("Tumble", OptionType::Bool, ExecStyle::CommandLine);
        catalog.assure_setting(tumble, "0").driverval = "".into();
        let size = catalog.assure_option("PageSize", OptionType::Enum, ExecStyle::CommandLine);
        catalog.assure_setting(size, "A4").driverval = "-sPAPERSIZE=a4".into();
        catalog.assure_setting(size, "Letter").driverval = "-sPAPERSIZE=letter".into();
        Engine::new(catalog)
    }

    fn test_job() -> Job {
        Job::new("test", "alice", "workstation")
    }

    #[test]
    fn key_value_lands_in_userval() {
        let mut engine = test_engine();
        let mut job = test_job();
        apply_option_string(&mut engine, &mut job, "Duplex=On PageSize=Letter");

        let userval = engine.optionset("userval");
        let duplex = engine.catalog().find("Duplex").unwrap();
        let size = engine.catalog().find("PageSize").unwrap();
        assert_eq!(engine.value(duplex, userval), Some("On"));
        assert_eq!(engine.value(size, userval), Some("Letter"));
    }

    #[test]
    fn bool_shorthand_and_negation() {
        let mut engine = test_engine();
        let mut job = test_job();
        apply_option_string(&mut engine, &mut job, "Tumble");
        let userval = engine.optionset("userval");
        let tumble = engine.catalog().find("Tumble").unwrap();
        assert_eq!(engine.value(tumble, userval), Some("1"));

        apply_option_string(&mut engine, &mut job, "noTumble");
        assert_eq!(engine.value(tumble, userval), Some("0"));
    }

    #[test]
    fn page_range_prefix_routes_to_pages_scope() {
        let mut engine = test_engine();
        let mut job = test_job();
        apply_option_string(&mut engine, &mut job, "3-5:Duplex=On");

        let pages = engine.optionset_id("pages:3-5").unwrap();
        let duplex = engine.catalog().find("Duplex").unwrap();
        assert_eq!(engine.value(duplex, pages), Some("On"));
        let userval = engine.optionset("userval");
        assert_eq!(engine.value(duplex, userval), None);
    }

    #[test]
    fn unknown_and_invalid_options_are_dropped_silently() {
        let mut engine = test_engine();
        let mut job = test_job();
        apply_option_string(
            &mut engine,
            &mut job,
            "Stapler=On Duplex=Diagonal Duplex=On",
        );

        let userval = engine.optionset("userval");
        let duplex = engine.catalog().find("Duplex").unwrap();
        // The bad binding was dropped, the good one applied.
        assert_eq!(engine.value(duplex, userval), Some("On"));
    }

    #[test]
    fn job_level_keys_update_the_job_record() {
        let mut engine = test_engine();
        let mut job = test_job();
        apply_option_string(&mut engine, &mut job, "copies=3 title='monthly report'");
        assert_eq!(job.copies, 3);
        assert_eq!(job.title, "monthly report");
    }

    #[test]
    fn quoted_values_keep_spaces() {
        let tokens = tokenize("a=1 b=\"two words\" c='three more words'");
        assert_eq!(tokens, ["a=1", "b=two words", "c=three more words"]);
    }

    #[test]
    fn page_overrides_revert_after_the_range() {
        let mut engine = test_engine();
        let mut job = test_job();
        let duplex = engine.catalog().find("Duplex").unwrap();
        let default = engine.optionset("default");
        engine.set_validated_value(duplex, default, "Off", false).unwrap();

        apply_option_string(&mut engine, &mut job, "3-5:Duplex=On");
        let overrides = collect_page_overrides(&engine, 10);

        assert_eq!(overrides[&3], [("Duplex".to_string(), "On".to_string())]);
        assert_eq!(overrides[&5], [("Duplex".to_string(), "On".to_string())]);
        assert_eq!(overrides[&6], [("Duplex".to_string(), "Off".to_string())]);
        assert!(!overrides.contains_key(&7));
    }

    #[test]
    fn range_clamped_to_document_length() {
        let mut engine = test_engine();
        let mut job = test_job();
        apply_option_string(&mut engine, &mut job, "2-100:Duplex=On");
        let overrides = collect_page_overrides(&engine, 4);

        assert!(overrides.contains_key(&2));
        assert!(overrides.contains_key(&4));
        assert!(!overrides.contains_key(&5));
    }
}
