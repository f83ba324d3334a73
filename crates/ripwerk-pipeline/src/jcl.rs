// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// JCL merge stage.
//
// Final leg of the pipeline: combines the operator's JCL wrapping with
// any JCL the driver or renderer already emitted, then forwards the byte
// stream verbatim.  Driver-emitted header lines are recognized by a
// recurring magic token; operator commands replace conflicting header
// lines and are inserted after the first line otherwise.

use std::io::{self, BufRead, Read, Write};

use tracing::{debug, info};

use ripwerk_core::FilterConfig;

/// Longest line the header peek will consider.  Renderer output turns
/// into raw raster data quickly; anything longer than this is payload.
const PEEK_LINE_MAX: u64 = 1024;

/// What the merge stage did with one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No operator JCL configured; bytes passed through untouched.
    Passthrough,
    /// Operator prepend emitted verbatim; no driver header was found, so
    /// the operator append block must close the job.
    Prepended,
    /// Driver header detected and merged; it brings its own trailer and
    /// the operator append block is suppressed.
    HeaderMerged,
}

/// Operator JCL configuration, ready to merge streams.
#[derive(Debug, Clone)]
pub struct JclWrapper {
    prepend: Vec<String>,
    append: Vec<String>,
    magic: Option<String>,
}

impl JclWrapper {
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            prepend: config.jcl_prepend.clone(),
            append: config.jcl_append.clone(),
            magic: config.jcl_magic_token.clone(),
        }
    }

    /// The token that marks driver JCL header lines: either configured,
    /// or the first word of the second prepend line.
    fn magic_token(&self) -> Option<String> {
        if let Some(token) = &self.magic {
            return Some(token.clone());
        }
        self.prepend
            .get(1)?
            .split_whitespace()
            .next()
            .map(str::to_string)
    }

    /// Whether the operator prepend is more than a bare single line.
    fn prepend_is_meaningful(&self) -> bool {
        self.prepend.len() > 1
    }

    /// Merge one stream into `out` and report what happened.
    ///
    /// The append block is NOT written here: whether it applies depends
    /// on the outcome, and for multi-range jobs only the final stream
    /// position may carry it.  Callers write it via [`write_append`].
    ///
    /// [`write_append`]: JclWrapper::write_append
    pub fn process<R, W>(&self, input: &mut R, out: &mut W) -> io::Result<MergeOutcome>
    where
        R: BufRead + ?Sized,
        W: Write + ?Sized,
    {
        if self.prepend.is_empty() && self.append.is_empty() {
            io::copy(input, out)?;
            return Ok(MergeOutcome::Passthrough);
        }

        let magic = match self.magic_token() {
            Some(magic) if self.prepend_is_meaningful() && !magic.is_empty() => magic,
            _ => {
                // A bare prepend line (or none) has nothing to merge into:
                // emit it verbatim and stream.
                self.write_prepend(out)?;
                io::copy(input, out)?;
                return Ok(MergeOutcome::Prepended);
            }
        };

        // Peek leading lines for a driver-emitted header.
        let mut header: Vec<String> = Vec::new();
        let mut carry: Vec<u8> = Vec::new();
        loop {
            let mut line = Vec::new();
            let read = (&mut *input).take(PEEK_LINE_MAX).read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }
            let complete = line.ends_with(b"\n");
            match str::from_utf8(&line) {
                Ok(text) if complete && text.contains(magic.as_str()) => {
                    header.push(text.trim_end_matches('\n').to_string());
                }
                _ => {
                    carry = line;
                    break;
                }
            }
        }

        let outcome = if header.is_empty() {
            self.write_prepend(out)?;
            MergeOutcome::Prepended
        } else {
            info!(
                header_lines = header.len(),
                "driver JCL header found, merging operator commands"
            );
            for line in self.merge_header(header, &magic) {
                out.write_all(line.as_bytes())?;
                out.write_all(b"\n")?;
            }
            MergeOutcome::HeaderMerged
        };

        out.write_all(&carry)?;
        io::copy(input, out)?;
        Ok(outcome)
    }

    /// Merge the operator's command lines into a detected driver header.
    fn merge_header(&self, mut header: Vec<String>, magic: &str) -> Vec<String> {
        // The first and last prepend lines are envelope framing, not
        // commands.
        let commands = &self.prepend[1..self.prepend.len() - 1];

        if header.len() == 1 {
            // Degenerate single-line header: typically a leading reset
            // sequence with a trailing language-switch command that must
            // stay last, so commands are spliced in front of the magic
            // token rather than added as lines.
            let mut line = header.remove(0);
            let mut insert_at = line.find(magic).unwrap_or(0);
            for command in commands {
                let spliced = format!("{command}\n");
                line.insert_str(insert_at, &spliced);
                insert_at += spliced.len();
            }
            return vec![line];
        }

        let mut insert_pos = 1;
        for command in commands {
            let key = command_prefix(command);
            if let Some(existing) = header
                .iter()
                .position(|line| command_prefix(line) == key)
            {
                debug!(command = %command, "operator command replaces driver line");
                header[existing] = command.clone();
            } else {
                debug!(command = %command, "operator command inserted into header");
                header.insert(insert_pos.min(header.len()), command.clone());
                insert_pos += 1;
            }
        }
        header
    }

    fn write_prepend<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        for line in &self.prepend {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Emit the operator append block.  Callers only do this when the
    /// stream outcome was not [`MergeOutcome::HeaderMerged`].
    pub fn write_append<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        for line in &self.append {
            out.write_all(line.as_bytes())?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Command-name prefix of a JCL line: the text up to `=`, or the whole
/// line when it has no assignment.
fn command_prefix(line: &str) -> &str {
    match line.find('=') {
        Some(position) => &line[..position],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    const UEL: &str = "\x1b%-12345X";

    fn wrapper(prepend: &[&str], append: &[&str]) -> JclWrapper {
        let config = FilterConfig {
            jcl_prepend: prepend.iter().map(|s| s.to_string()).collect(),
            jcl_append: append.iter().map(|s| s.to_string()).collect(),
            ..FilterConfig::default()
        };
        JclWrapper::from_config(&config)
    }

    fn run(wrapper: &JclWrapper, input: &str) -> (String, MergeOutcome) {
        let mut reader = BufReader::new(input.as_bytes());
        let mut out = Vec::new();
        let outcome = wrapper.process(&mut reader, &mut out).unwrap();
        (String::from_utf8(out).unwrap(), outcome)
    }

    #[test]
    fn no_jcl_is_pure_passthrough() {
        let wrapper = wrapper(&[], &[]);
        let (out, outcome) = run(&wrapper, "%!PS\ndata\n");
        assert_eq!(out, "%!PS\ndata\n");
        assert_eq!(outcome, MergeOutcome::Passthrough);
    }

    #[test]
    fn bare_single_prepend_line_is_verbatim() {
        let wrapper = wrapper(&["JOB START"], &["JOB END"]);
        let (out, outcome) = run(&wrapper, "payload\n");
        assert_eq!(out, "JOB START\npayload\n");
        assert_eq!(outcome, MergeOutcome::Prepended);
        // The caller writes the append for a Prepended outcome.
    }

    #[test]
    fn operator_commands_merge_into_driver_header() {
        let prepend = [
            format!("{UEL}@PJL"),
            "@PJL SET RESOLUTION=600".to_string(),
            "@PJL SET DUPLEX=OFF".to_string(),
            UEL.to_string(),
        ];
        let prepend: Vec<&str> = prepend.iter().map(String::as_str).collect();
        let wrapper = wrapper(&prepend, &[]);

        let input = format!(
            "{UEL}@PJL\n@PJL SET RESOLUTION=300\n@PJL SET PAGEPROTECT=AUTO\n@PJL ENTER LANGUAGE=POSTSCRIPT\n%!PS\ndata\n"
        );
        let (out, outcome) = run(&wrapper, &input);

        assert_eq!(outcome, MergeOutcome::HeaderMerged);
        let expected = format!(
            "{UEL}@PJL\n@PJL SET DUPLEX=OFF\n@PJL SET RESOLUTION=600\n@PJL SET PAGEPROTECT=AUTO\n@PJL ENTER LANGUAGE=POSTSCRIPT\n%!PS\ndata\n"
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn single_line_header_gets_spliced_in_place() {
        let prepend = [
            format!("{UEL}@PJL"),
            "@PJL SET RESOLUTION=600".to_string(),
            "@PJL SET DUPLEX=OFF".to_string(),
            UEL.to_string(),
        ];
        let prepend: Vec<&str> = prepend.iter().map(String::as_str).collect();
        let wrapper = wrapper(&prepend, &[]);

        let input = format!("{UEL}@PJL ENTER LANGUAGE=POSTSCRIPT\n%!PS\ndata\n");
        let (out, outcome) = run(&wrapper, &input);

        assert_eq!(outcome, MergeOutcome::HeaderMerged);
        // Operator commands land between the reset sequence and the
        // language switch, which must stay last.
        let expected = format!(
            "{UEL}@PJL SET RESOLUTION=600\n@PJL SET DUPLEX=OFF\n@PJL ENTER LANGUAGE=POSTSCRIPT\n%!PS\ndata\n"
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn renderer_output_without_header_gets_verbatim_prepend() {
        let prepend = [
            format!("{UEL}@PJL"),
            "@PJL SET RESOLUTION=600".to_string(),
            UEL.to_string(),
        ];
        let prepend: Vec<&str> = prepend.iter().map(String::as_str).collect();
        let wrapper = wrapper(&prepend, &[]);

        let (out, outcome) = run(&wrapper, "%!PS\ndata\n");
        assert_eq!(outcome, MergeOutcome::Prepended);
        assert_eq!(
            out,
            format!("{UEL}@PJL\n@PJL SET RESOLUTION=600\n{UEL}\n%!PS\ndata\n")
        );
    }

    #[test]
    fn magic_token_is_derived_from_second_prepend_line() {
        let wrapper = wrapper(&["START", "CMD SET A=1", "END"], &[]);
        assert_eq!(wrapper.magic_token().as_deref(), Some("CMD"));
    }

    #[test]
    fn configured_magic_token_wins_over_derivation() {
        let config = FilterConfig {
            jcl_prepend: vec!["START".into(), "CMD SET A=1".into(), "END".into()],
            jcl_magic_token: Some("@OTHER".into()),
            ..FilterConfig::default()
        };
        let wrapper = JclWrapper::from_config(&config);
        assert_eq!(wrapper.magic_token().as_deref(), Some("@OTHER"));
    }

    #[test]
    fn binary_payload_is_not_mistaken_for_a_header() {
        let prepend = [
            format!("{UEL}@PJL"),
            "@PJL SET RESOLUTION=600".to_string(),
            UEL.to_string(),
        ];
        let prepend: Vec<&str> = prepend.iter().map(String::as_str).collect();
        let wrapper = wrapper(&prepend, &[]);

        let mut input = vec![0u8, 159, 146, 150];
        input.extend_from_slice(b"raster-data");
        let mut reader = BufReader::new(input.as_slice());
        let mut out = Vec::new();
        let outcome = wrapper.process(&mut reader, &mut out).unwrap();

        assert_eq!(outcome, MergeOutcome::Prepended);
        assert!(out.ends_with(b"raster-data"));
    }

    #[test]
    fn append_block_writes_line_per_entry() {
        let wrapper = wrapper(&[], &["@PJL EOJ", "BYE"]);
        let mut out = Vec::new();
        wrapper.write_append(&mut out).unwrap();
        assert_eq!(out, b"@PJL EOJ\nBYE\n");
    }
}
