// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Operator-level filter configuration.
//
// Loaded from a JSON file named on the command line or through the
// RIPWERK_CONFIG environment variable. Everything here is what a print
// administrator tunes per queue; per-job state comes from the spooler.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RipwerkError};

/// Persistent filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Base command line of the external renderer. Option arguments are
    /// appended by the render command builder; the renderer reads
    /// PostScript on stdin and writes printer-ready data on stdout.
    pub renderer: String,
    /// Optional converter command for non-PostScript input, spliced in
    /// front of the renderer. Treated as an opaque stdin-to-stdout stage.
    pub converter: Option<String>,
    /// Operator JCL block emitted before the job payload, one command
    /// per line including the envelope framing lines.
    pub jcl_prepend: Vec<String>,
    /// Operator JCL block emitted after the job payload.
    pub jcl_append: Vec<String>,
    /// Token that marks driver-emitted JCL header lines. When unset it is
    /// derived from the first word of the second `jcl_prepend` line, which
    /// matches the PJL convention without hard-coding it.
    pub jcl_magic_token: Option<String>,
    /// Downstream command that receives the final output stream on its
    /// stdin instead of this process writing to stdout.
    pub postpipe: Option<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            renderer: "gs -q -dBATCH -dNOPAUSE -dSAFER -sOutputFile=- -".into(),
            converter: None,
            jcl_prepend: Vec::new(),
            jcl_append: Vec::new(),
            jcl_magic_token: None,
            postpipe: None,
        }
    }
}

impl FilterConfig {
    /// Load the configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            RipwerkError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: FilterConfig = serde_json::from_str(&data)
            .map_err(|e| RipwerkError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "filter configuration loaded");
        Ok(config)
    }

    /// Load from an explicit path, the RIPWERK_CONFIG environment variable,
    /// or fall back to defaults when neither names a file.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        if let Ok(env_path) = std::env::var("RIPWERK_CONFIG") {
            return Self::load(env_path);
        }
        debug!("no configuration file, using defaults");
        Ok(Self::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_have_renderer_and_no_jcl() {
        let config = FilterConfig::default();
        assert!(config.renderer.starts_with("gs"));
        assert!(config.jcl_prepend.is_empty());
        assert!(config.postpipe.is_none());
    }

    #[test]
    fn loads_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"renderer": "cat", "jcl_prepend": ["%-12345X@PJL", "@PJL SET COPIES=1"]}}"#
        )
        .unwrap();

        let config = FilterConfig::load(file.path()).unwrap();
        assert_eq!(config.renderer, "cat");
        assert_eq!(config.jcl_prepend.len(), 2);
        // Unspecified fields take their defaults.
        assert!(config.converter.is_none());
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = FilterConfig::load("/nonexistent/ripwerk.json").unwrap_err();
        assert!(matches!(err, RipwerkError::Config(_)));
    }
}
