// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! `/proc` parsing for the process and host statistics the agent reports.
//!
//! ```text
//! /proc/
//!   ├── self/status   # memory (Vm*), thread count, context switches
//!   ├── self/stat     # page faults, user/system CPU time in clock ticks
//!   ├── meminfo       # host memory totals
//!   └── loadavg       # 1, 5 and 15 minute load averages
//! ```
//!
//! Readers take a path so tests can point them at fixtures.
//! Memory sizes are reported in bytes, CPU times in seconds.

use std::fs;
use std::io;
use std::path::Path;

pub const PROC_SELF_STATUS_PATH: &str = "/proc/self/status";
pub const PROC_SELF_STAT_PATH: &str = "/proc/self/stat";
pub const PROC_MEMINFO_PATH: &str = "/proc/meminfo";
pub const PROC_LOADAVG_PATH: &str = "/proc/loadavg";

/// Fallback when `sysconf(CLK_TCK)` is unavailable.
const DEFAULT_CLK_TCK: u64 = 100;

/// `(metric name, /proc/self/status field, value is in kB)`
const STATUS_FIELDS: [(&str, &str, bool); 9] = [
    ("VmRSS", "VmRSS", true),
    ("VmSize", "VmSize", true),
    ("VmPeak", "VmPeak", true),
    ("VmData", "VmData", true),
    ("VmStk", "VmStk", true),
    ("VmSwap", "VmSwap", true),
    ("Threads", "Threads", false),
    ("VoluntaryCtxSwitches", "voluntary_ctxt_switches", false),
    ("NonvoluntaryCtxSwitches", "nonvoluntary_ctxt_switches", false),
];

const MEMINFO_FIELDS: [(&str, &str); 3] = [
    ("TotalMemory", "MemTotal"),
    ("FreeMemory", "MemFree"),
    ("AvailableMemory", "MemAvailable"),
];

/// One sampled statistic, value already formatted as a decimal string.
pub type Stat = (&'static str, String);

fn invalid_data(path: &Path, reason: impl AsRef<str>) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("{}: {}", path.display(), reason.as_ref()),
    )
}

/// Splits `Name:   value [kB]` lines.
fn key_value_lines(contents: &str) -> impl Iterator<Item = (&str, &str)> {
    contents.lines().filter_map(|line| {
        let (key, rest) = line.split_once(':')?;
        let value = rest.split_whitespace().next()?;
        Some((key.trim(), value))
    })
}

fn lookup_u64(contents: &str, path: &Path, field: &str) -> Option<Result<u64, io::Error>> {
    key_value_lines(contents)
        .find(|(key, _)| *key == field)
        .map(|(_, value)| {
            value
                .parse::<u64>()
                .map_err(|_| invalid_data(path, format!("non-numerical value for {field}")))
        })
}

/// Fields missing from the file (e.g. `VmSwap` on kernels without swap
/// accounting) are skipped, a malformed value fails the whole read.
pub fn read_status_from_path(path: impl AsRef<Path>) -> Result<Vec<Stat>, io::Error> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let mut stats = Vec::with_capacity(STATUS_FIELDS.len());
    for (name, field, in_kb) in STATUS_FIELDS {
        if let Some(value) = lookup_u64(&contents, path, field) {
            let value = value?;
            let value = if in_kb { value.saturating_mul(1024) } else { value };
            stats.push((name, value.to_string()));
        }
    }
    if stats.is_empty() {
        return Err(invalid_data(path, "no known fields"));
    }
    Ok(stats)
}

/// Parses `pid (comm) state ppid ...`. `comm` may contain spaces and
/// parentheses, so fields are counted from the last `)`.
pub fn read_stat_from_path(path: impl AsRef<Path>, clk_tck: u64) -> Result<Vec<Stat>, io::Error> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let after_comm = contents
        .rfind(')')
        .map(|idx| &contents[idx + 1..])
        .ok_or_else(|| invalid_data(path, "missing command name"))?;
    let fields: Vec<&str> = after_comm.split_whitespace().collect();

    // field N of proc(5) is at index N - 3 once pid and comm are stripped
    let field = |n: usize| -> Result<u64, io::Error> {
        fields
            .get(n - 3)
            .ok_or_else(|| invalid_data(path, format!("missing field {n}")))?
            .parse::<u64>()
            .map_err(|_| invalid_data(path, format!("non-numerical field {n}")))
    };

    let ticks = clk_tck.max(1) as f64;
    Ok(vec![
        ("MinorFaults", field(10)?.to_string()),
        ("MajorFaults", field(12)?.to_string()),
        ("UserTime", (field(14)? as f64 / ticks).to_string()),
        ("SystemTime", (field(15)? as f64 / ticks).to_string()),
    ])
}

pub fn read_meminfo_from_path(path: impl AsRef<Path>) -> Result<Vec<Stat>, io::Error> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let mut stats = Vec::with_capacity(MEMINFO_FIELDS.len());
    for (name, field) in MEMINFO_FIELDS {
        if let Some(value) = lookup_u64(&contents, path, field) {
            stats.push((name, value?.saturating_mul(1024).to_string()));
        }
    }
    if stats.is_empty() {
        return Err(invalid_data(path, "no known fields"));
    }
    Ok(stats)
}

pub fn read_loadavg_from_path(path: impl AsRef<Path>) -> Result<Vec<Stat>, io::Error> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let mut values = contents.split_whitespace();
    let mut stats = Vec::with_capacity(3);
    for name in ["Load1", "Load5", "Load15"] {
        let value = values
            .next()
            .ok_or_else(|| invalid_data(path, format!("missing {name}")))?
            .parse::<f64>()
            .map_err(|_| invalid_data(path, format!("non-numerical {name}")))?;
        stats.push((name, value.to_string()));
    }
    Ok(stats)
}

/// Clock ticks per second used by `/proc/self/stat` times.
#[allow(clippy::cast_sign_loss)]
#[must_use]
pub fn clk_tck() -> u64 {
    use nix::unistd::{sysconf, SysconfVar};
    match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(ticks)) if ticks > 0 => ticks as u64,
        _ => DEFAULT_CLK_TCK,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(file: &str) -> PathBuf {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("tests/proc");
        path.push(file);
        path
    }

    fn lookup<'a>(stats: &'a [Stat], name: &str) -> Option<&'a str> {
        stats
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_read_status() {
        let stats = read_status_from_path(fixture("status")).unwrap();
        assert_eq!(lookup(&stats, "VmRSS"), Some("4210688"));
        assert_eq!(lookup(&stats, "VmPeak"), Some("12468224"));
        assert_eq!(lookup(&stats, "Threads"), Some("3"));
        assert_eq!(lookup(&stats, "VoluntaryCtxSwitches"), Some("42"));
        assert_eq!(lookup(&stats, "NonvoluntaryCtxSwitches"), Some("7"));
        // fixture has no VmSwap line
        assert_eq!(lookup(&stats, "VmSwap"), None);

        assert!(read_status_from_path(fixture("invalid_status")).is_err());
        assert!(read_status_from_path(fixture("missing")).is_err());
    }

    #[test]
    fn test_read_stat() {
        let stats = read_stat_from_path(fixture("stat"), 100).unwrap();
        assert_eq!(lookup(&stats, "MinorFaults"), Some("1530"));
        assert_eq!(lookup(&stats, "MajorFaults"), Some("2"));
        assert_eq!(lookup(&stats, "UserTime"), Some("0.25"));
        assert_eq!(lookup(&stats, "SystemTime"), Some("0.1"));

        assert!(read_stat_from_path(fixture("invalid_stat"), 100).is_err());
    }

    #[test]
    fn test_read_meminfo() {
        let stats = read_meminfo_from_path(fixture("meminfo")).unwrap();
        assert_eq!(lookup(&stats, "TotalMemory"), Some("16777216000"));
        assert_eq!(lookup(&stats, "FreeMemory"), Some("1048576000"));
        assert_eq!(lookup(&stats, "AvailableMemory"), Some("8388608000"));
    }

    #[test]
    fn test_read_loadavg() {
        let stats = read_loadavg_from_path(fixture("loadavg")).unwrap();
        assert_eq!(
            stats,
            vec![
                ("Load1", "0.52".to_string()),
                ("Load5", "0.34".to_string()),
                ("Load15", "0.2".to_string()),
            ]
        );
        assert!(read_loadavg_from_path(fixture("invalid_loadavg")).is_err());
    }

    #[test]
    fn test_clk_tck_is_positive() {
        assert!(clk_tck() > 0);
    }
}
