//! This module provides the `clap`-based `Args` struct and also a translation to `ymake::Options`.
//!
//! The library portion of this software does not want to include `clap` as a dependency. To that
//! end, there is an `Options` struct where various options may be defined and then passed to the
//! engine. We provide a facility `to_options` to translate `Args` to `Options`, plus the
//! `NAME=VALUE`/target-list split that `clap` cannot do on its own.

use clap::Parser;
use const_format::formatcp;

use ymake::Options;

/// Represents the `clap`-based arguments provided by this binary.
#[derive(Clone, Debug, Parser)]
#[clap(
    name = "ymake",
    version,
    about,
    after_help = formatcp!("License:  {}", env!("CARGO_PKG_LICENSE")),
)]
pub struct Args {
    /// Target(s) and `NAME=VALUE` variable assignments, in any order (if no target is given, use
    /// the first regular target declared in the makefile).
    #[arg()]
    pub args: Vec<String>,

    /// Read FILE as the makefile.
    #[arg(short, long, visible_alias("makefile"))]
    pub file: Option<String>,

    /// Maximum number of worker processes to run concurrently.
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Do not stop building after a recipe fails; keep going on independent targets.
    #[arg(short, long)]
    pub keep_going: bool,

    /// Dispatch workers at reduced host priority. Ignored for compatibility (see Options).
    #[arg(short = 'm')]
    pub m: bool,

    /// Dispatch workers at very-reduced host priority. Ignored for compatibility.
    #[arg(long = "mm")]
    pub mm: bool,

    /// Suppress recipe echo.
    #[arg(short, long)]
    pub silent: bool,

    /// Emit phase timing on completion.
    #[arg(long)]
    pub perf: bool,

    /// Enable the persistent preprocessor cache.
    #[arg(long)]
    pub pru: bool,

    /// Consider FILE to be very old and do not remake it.
    #[arg(short, long, value_name = "FILE", visible_alias("assume-old"))]
    pub old_file: Vec<String>,

    /// Consider FILE to be very new (never stale as a dependency).
    #[arg(short = 'W', long, value_name = "FILE", visible_alias("assume-new"))]
    pub new_file: Vec<String>,

    /// Unconditionally make all targets.
    #[arg(short = 'B', long = "always-make")]
    pub always_make: bool,

    /// Only print the commands that would be run; do not execute them.
    #[arg(short = 'n', long = "just-print", visible_aliases = ["dry-run", "recon"])]
    pub just_print: bool,

    /// Print software license.
    #[arg(long, display_order = 9999)]
    pub license: bool,
}

impl Args {
    /// Split `self.args` into (defines, targets): anything matching `[A-Za-z_][A-Za-z0-9_]*=...`
    /// is a command-line variable assignment; everything else is a target name. `clap` cannot
    /// make this distinction itself, so it is done here, keeping makefile-specific parsing out
    /// of the `clap` struct.
    pub fn split_args(&self) -> (Vec<(String, String)>, Vec<String>) {
        let mut defines = vec![];
        let mut targets = vec![];
        for arg in &self.args {
            match parse_define(arg) {
                Some((name, value)) => defines.push((name, value)),
                None => targets.push(arg.clone()),
            }
        }
        (defines, targets)
    }

    /// Helper to construct an `Options` instance from `self`.
    pub fn to_options(&self) -> Options {
        let (defines, _targets) = self.split_args();
        Options {
            always_make: self.always_make,
            old_file: self.old_file.clone(),
            new_file: self.new_file.clone(),
            jobs: self.jobs.unwrap_or_else(Options::default_jobs).max(1),
            keep_going: self.keep_going,
            silent: self.silent,
            low_priority: self.m,
            very_low_priority: self.mm,
            perf: self.perf,
            persistent_cache: self.pru,
            defines,
            just_print: self.just_print,
        }
    }
}

fn parse_define(arg: &str) -> Option<(String, String)> {
    let (name, value) = arg.split_once('=')?;
    let mut chars = name.chars();
    let first_ok = chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if first_ok && rest_ok {
        Some((name.to_string(), value.to_string()))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_value_pairs_are_separated_from_targets() {
        let args = Args {
            args: vec!["CC=gcc".into(), "all".into(), "1=invalid".into()],
            file: None,
            jobs: None,
            keep_going: false,
            m: false,
            mm: false,
            silent: false,
            perf: false,
            pru: false,
            old_file: vec![],
            new_file: vec![],
            always_make: false,
            just_print: false,
            license: false,
        };
        let (defines, targets) = args.split_args();
        assert_eq!(defines, vec![("CC".to_string(), "gcc".to_string())]);
        assert_eq!(targets, vec!["all".to_string(), "1=invalid".to_string()]);
    }
}
