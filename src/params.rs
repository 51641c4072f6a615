// THEORY:
// Every tunable component keeps its knobs in a plain `*Params` struct with a `Default`
// impl carrying the documented defaults. The `Tunable` trait exposes those knobs as a
// tagged `ParamSet` (key, value, default, one-line description) so that a whole rig can
// be saved to and restored from a single text file.
//
// File format, one parameter per line:
//
//     <tag>.<key> = <value>   # <description>
//
// Key architectural principles:
// 1.  **Forgiving load**: unknown keys are ignored, keys missing from the file keep the
//     value they had before the load.
// 2.  **Surgical save**: saving a bundle removes every existing line carrying its tag
//     and appends a fresh block, so other bundles in the same file are untouched.
// 3.  **Compact numbers**: floats are written with at most 4 significant figures.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// One named knob.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamEntry {
    pub key: &'static str,
    pub value: f64,
    pub default: f64,
    pub desc: &'static str,
    pub integer: bool,
}

/// A tagged bundle of parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    pub tag: String,
    pub entries: Vec<ParamEntry>,
}

impl ParamSet {
    pub fn new(tag: &str) -> Self {
        Self { tag: tag.to_string(), entries: Vec::new() }
    }

    /// Append a real-valued entry.
    pub fn float(mut self, key: &'static str, value: f64, default: f64, desc: &'static str) -> Self {
        self.entries.push(ParamEntry { key, value, default, desc, integer: false });
        self
    }

    /// Append an integer entry.
    pub fn int(mut self, key: &'static str, value: i64, default: i64, desc: &'static str) -> Self {
        self.entries.push(ParamEntry { key, value: value as f64, default: default as f64, desc, integer: true });
        self
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries.iter().find(|e| e.key == key).map(|e| e.value)
    }

    /// Value of `key`, or `cur` when the key is absent.
    pub fn f64_or(&self, key: &str, cur: f64) -> f64 {
        self.get(key).unwrap_or(cur)
    }

    pub fn i64_or(&self, key: &str, cur: i64) -> i64 {
        self.get(key).map(|v| v.round() as i64).unwrap_or(cur)
    }

    pub fn usize_or(&self, key: &str, cur: usize) -> usize {
        self.get(key).map(|v| v.round().max(0.0) as usize).unwrap_or(cur)
    }

    /// Reset every entry to its default.
    pub fn revert(&mut self) {
        for e in &mut self.entries {
            e.value = e.default;
        }
    }

    /// Update entries from parameter-file text. Returns the number of keys applied.
    pub fn parse_into(&mut self, text: &str) -> Result<usize> {
        let prefix = format!("{}.", self.tag);
        let mut applied = 0;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            let Some(rest) = line.strip_prefix(&prefix) else {
                continue;
            };
            let Some((key, val)) = rest.split_once('=') else {
                return Err(Error::Param(format!("line {}: missing '=' in \"{}\"", lineno + 1, raw.trim())));
            };
            let key = key.trim();
            let Some(entry) = self.entries.iter_mut().find(|e| e.key == key) else {
                log::debug!("ignoring unknown parameter {}{}", prefix, key);
                continue;
            };
            let v: f64 = val
                .trim()
                .parse()
                .map_err(|_| Error::Param(format!("line {}: bad number \"{}\"", lineno + 1, val.trim())))?;
            entry.value = if entry.integer { v.round() } else { v };
            applied += 1;
        }
        Ok(applied)
    }

    /// Render the bundle as parameter-file lines.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for e in &self.entries {
            let v = if e.integer { format!("{}", e.value as i64) } else { format_sig4(e.value) };
            let lhs = format!("{}.{} = {}", self.tag, e.key, v);
            out.push_str(&format!("{:<32} # {}\n", lhs, e.desc));
        }
        out
    }

    /// Replace this bundle's lines in an existing file body.
    pub fn splice(&self, existing: &str) -> String {
        let prefix = format!("{}.", self.tag);
        let mut out: String = existing
            .lines()
            .filter(|l| !l.trim_start().starts_with(&prefix))
            .map(|l| format!("{}\n", l))
            .collect();
        out.push_str(&self.render());
        out
    }
}

/// Format with at most 4 significant figures, trimming trailing zeros.
pub fn format_sig4(v: f64) -> String {
    if v == 0.0 || !v.is_finite() {
        return if v.is_finite() { "0".to_string() } else { format!("{}", v) };
    }
    let mag = v.abs().log10().floor() as i32;
    let decimals = 3 - mag;
    if decimals <= 0 {
        let step = 10f64.powi(-decimals);
        return format!("{}", ((v / step).round() * step) as i64);
    }
    let s = format!("{:.*}", decimals.min(12) as usize, v);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    s.to_string()
}

/// A component whose knobs can be exported and re-imported as a tagged bundle.
pub trait Tunable {
    /// Export the current values.
    fn params(&self) -> ParamSet;

    /// Adopt values from a bundle; absent keys leave fields unchanged.
    fn set_params(&mut self, ps: &ParamSet);

    /// Read this component's lines from a parameter file. A missing file is not an
    /// error and leaves everything at its current value.
    fn load_params(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            log::warn!("parameter file {} not found, keeping current values", path.display());
            return Ok(0);
        }
        let text = fs::read_to_string(path)?;
        let mut ps = self.params();
        let n = ps.parse_into(&text)?;
        self.set_params(&ps);
        Ok(n)
    }

    /// Write this component's lines into a parameter file, replacing its old block.
    fn save_params(&self, path: &Path) -> Result<()> {
        let existing = if path.exists() { fs::read_to_string(path)? } else { String::new() };
        fs::write(path, self.params().splice(&existing))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Knobs {
        gain: f64,
        count: usize,
    }

    impl Tunable for Knobs {
        fn params(&self) -> ParamSet {
            ParamSet::new("knob")
                .float("gain", self.gain, 1.5, "Amplifier gain")
                .int("count", self.count as i64, 3, "Repeat count")
        }

        fn set_params(&mut self, ps: &ParamSet) {
            self.gain = ps.f64_or("gain", self.gain);
            self.count = ps.usize_or("count", self.count);
        }
    }

    #[test]
    fn four_significant_figures() {
        assert_eq!(format_sig4(0.123456), "0.1235");
        assert_eq!(format_sig4(1.8), "1.8");
        assert_eq!(format_sig4(12345.0), "12350");
        assert_eq!(format_sig4(-44.6), "-44.6");
        assert_eq!(format_sig4(0.0), "0");
    }

    #[test]
    fn load_ignores_unknown_and_keeps_missing() {
        let mut k = Knobs { gain: 2.0, count: 7 };
        let mut ps = k.params();
        let n = ps.parse_into("knob.gain = 0.25\nknob.bogus = 4\nother.count = 9\n").unwrap();
        assert_eq!(n, 1);
        k.set_params(&ps);
        assert_eq!(k.gain, 0.25);
        assert_eq!(k.count, 7);
    }

    #[test]
    fn splice_replaces_only_own_block() {
        let k = Knobs { gain: 3.0, count: 4 };
        let old = "other.x = 1   # keep me\nknob.gain = 9\n";
        let new = k.params().splice(old);
        assert!(new.contains("other.x = 1"));
        assert!(!new.contains("knob.gain = 9"));
        assert!(new.contains("knob.gain = 3"));
        assert!(new.contains("knob.count = 4"));
    }

    #[test]
    fn bad_number_is_an_error() {
        let mut ps = Knobs::default().params();
        assert!(ps.parse_into("knob.gain = fast\n").is_err());
    }
}
