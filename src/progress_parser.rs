//! Heuristic extraction of stage, download progress and statistics from the
//! free-text lines an import process prints.
//!
//! Every function here is pure: a line that does not match a pattern simply
//! leaves the corresponding field unset.

use std::fmt;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::{DownloadProgress, ImportStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Downloading,
    Extracting,
    Pruning,
    CheckingCollisions,
    Moving,
    CleaningUp,
}

impl Stage {
    /// Import order; also the order stage rules are tried in.
    pub const ALL: [Stage; 6] = [
        Stage::Downloading,
        Stage::Extracting,
        Stage::Pruning,
        Stage::CheckingCollisions,
        Stage::Moving,
        Stage::CleaningUp,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Downloading => "Downloading",
            Self::Extracting => "Extracting",
            Self::Pruning => "Pruning",
            Self::CheckingCollisions => "Checking collisions",
            Self::Moving => "Moving",
            Self::CleaningUp => "Cleaning up",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Self::Downloading => &*DOWNLOAD_STAGE_RE,
            Self::Extracting => &*EXTRACT_STAGE_RE,
            Self::Pruning => &*PRUNE_STAGE_RE,
            Self::CheckingCollisions => &*COLLISION_STAGE_RE,
            Self::Moving => &*MOVE_STAGE_RE,
            Self::CleaningUp => &*CLEAN_STAGE_RE,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLine {
    pub stage: Option<Stage>,
    pub progress: Option<DownloadProgress>,
    pub stats: Option<ImportStats>,
}

static DOWNLOAD_STAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)download").unwrap());
static EXTRACT_STAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)extract").unwrap());
static PRUNE_STAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)prun").unwrap());
static COLLISION_STAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)collision").unwrap());
static MOVE_STAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bmove").unwrap());
static CLEAN_STAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)clean").unwrap());

// A loose numeric run so that "1.2.3%" still counts as a percentage token.
static PERCENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d[\d.]*)%").unwrap());

static SIZE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(kib|kb|mib|mb|gib|gb|b)\b").unwrap());

static SPEED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(kib|kb|mib|mb|gib|gb|b)/s").unwrap());

static ETA_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)eta[:\s]*(\d{1,2}):(\d{2})(?::(\d{2}))?").unwrap());

static DOWNLOADED_BYTES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)download(?:ed)?[^0-9]*([\d,]+)\s*bytes").unwrap());

static EXTRACTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)extracted[^0-9]*([\d,]+)\s*(?:entries|files)").unwrap());

static PRUNED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)pruned[^0-9]*([\d,]+)\s*(?:files?|entries?)").unwrap());

static MOVED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)moved[^0-9]*([\d,]+)\s*(?:files?|entries?)").unwrap());

pub fn parse_line(line: &str) -> ParsedLine {
    ParsedLine {
        stage: parse_stage(line),
        progress: parse_download_progress(line),
        stats: parse_stats(line),
    }
}

pub fn parse_stage(line: &str) -> Option<Stage> {
    Stage::ALL
        .into_iter()
        .find(|stage| stage.pattern().is_match(line))
}

pub fn parse_download_progress(line: &str) -> Option<DownloadProgress> {
    let percent_token = PERCENT_RE.captures(line)?;
    let percent = percent_token[1].parse::<f64>().ok().filter(|p| p.is_finite());

    let mut sizes = SIZE_RE
        .captures_iter(line)
        .map(|caps| bytes_from_captures(&caps));
    let downloaded_bytes = sizes.next().flatten();
    let total_bytes = sizes.next().flatten();

    Some(DownloadProgress {
        percent,
        downloaded_bytes,
        total_bytes,
        speed_bps: SPEED_RE
            .captures(line)
            .and_then(|caps| bytes_from_captures(&caps)),
        eta_seconds: parse_eta(line),
    })
}

pub fn parse_stats(line: &str) -> Option<ImportStats> {
    let stats = ImportStats {
        downloaded_bytes: capture_count(&DOWNLOADED_BYTES_RE, line),
        extracted_entries: capture_count(&EXTRACTED_RE, line),
        pruned_count: capture_count(&PRUNED_RE, line),
        moved_count: capture_count(&MOVED_RE, line),
    };
    (!stats.is_empty()).then_some(stats)
}

fn parse_eta(line: &str) -> Option<u64> {
    let caps = ETA_RE.captures(line)?;
    let first = caps[1].parse::<u64>().ok()?;
    let second = caps[2].parse::<u64>().ok()?;
    match caps.get(3) {
        Some(third) => {
            let third = third.as_str().parse::<u64>().ok()?;
            Some(first * 3600 + second * 60 + third)
        }
        None => Some(first * 60 + second),
    }
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit.to_ascii_lowercase().as_str() {
        "kb" => 1e3,
        "kib" => 1024.0,
        "mb" => 1e6,
        "mib" => 1024.0 * 1024.0,
        "gb" => 1e9,
        "gib" => 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    }
}

fn bytes_from_captures(caps: &Captures<'_>) -> Option<u64> {
    let value = caps[1].parse::<f64>().ok()?;
    Some((value * unit_multiplier(&caps[2])).round() as u64)
}

fn capture_count(re: &Regex, line: &str) -> Option<u64> {
    let caps = re.captures(line)?;
    caps[1].replace(',', "").parse::<u64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_percentage_sizes_speed_and_eta_from_download_line() {
        let progress =
            parse_download_progress("Downloading 25% 10 MiB / 40 MiB 1.2 MiB/s ETA 00:30")
                .expect("progress");
        assert_eq!(progress.percent, Some(25.0));
        assert_eq!(progress.downloaded_bytes, Some(10 * 1024 * 1024));
        assert_eq!(progress.total_bytes, Some(40 * 1024 * 1024));
        assert_eq!(progress.speed_bps, Some(1_258_291));
        assert_eq!(progress.eta_seconds, Some(30));
    }

    #[test]
    fn decimal_and_binary_units_differ() {
        let progress = parse_download_progress("50% 1.5 GB of 2 GiB").expect("progress");
        assert_eq!(progress.downloaded_bytes, Some(1_500_000_000));
        assert_eq!(progress.total_bytes, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(progress.speed_bps, None);
    }

    #[test]
    fn eta_with_three_groups_is_hours_minutes_seconds() {
        let progress = parse_download_progress("3.5% eta: 01:02:03").expect("progress");
        assert_eq!(progress.percent, Some(3.5));
        assert_eq!(progress.eta_seconds, Some(3723));
        assert_eq!(progress.downloaded_bytes, None);
    }

    #[test]
    fn no_percentage_token_means_no_progress() {
        assert_eq!(parse_download_progress("Downloading 10 MiB / 40 MiB"), None);
    }

    #[test]
    fn malformed_percentage_keeps_other_fields() {
        let progress =
            parse_download_progress("Downloading 1.2.3% 5 MB / 10 MB ETA 02:15").expect("progress");
        assert_eq!(progress.percent, None);
        assert_eq!(progress.downloaded_bytes, Some(5_000_000));
        assert_eq!(progress.total_bytes, Some(10_000_000));
        assert_eq!(progress.eta_seconds, Some(135));
    }

    #[test]
    fn detects_stages_from_log_lines() {
        assert_eq!(parse_stage("Extracting archive"), Some(Stage::Extracting));
        assert_eq!(parse_stage("Pruned 3 files"), Some(Stage::Pruning));
        assert_eq!(
            parse_stage("Checking collisions under /music"),
            Some(Stage::CheckingCollisions)
        );
        assert_eq!(parse_stage("moved album into place"), Some(Stage::Moving));
        assert_eq!(parse_stage("CLEANING temp dir"), Some(Stage::CleaningUp));
        assert_eq!(parse_stage("nothing to see"), None);
    }

    #[test]
    fn stage_rules_apply_in_fixed_order() {
        assert_eq!(
            parse_stage("extract finished, download next"),
            Some(Stage::Downloading)
        );
        assert_eq!(parse_stage("remove collisions"), Some(Stage::CheckingCollisions));
    }

    #[test]
    fn move_needs_a_word_boundary() {
        assert_eq!(parse_stage("removed stale symlink"), None);
    }

    #[test]
    fn parses_every_matching_stat_counter() {
        let stats = parse_stats("Extracted 42 entries, pruned 5 files, moved 37 files")
            .expect("stats");
        assert_eq!(stats.extracted_entries, Some(42));
        assert_eq!(stats.pruned_count, Some(5));
        assert_eq!(stats.moved_count, Some(37));
        assert_eq!(stats.downloaded_bytes, None);
        assert_eq!(
            parse_stage("Extracted 42 entries, pruned 5 files, moved 37 files"),
            Some(Stage::Extracting)
        );
    }

    #[test]
    fn stat_counters_strip_grouping_separators() {
        let stats = parse_stats("Downloaded 83,886,080 bytes").expect("stats");
        assert_eq!(stats.downloaded_bytes, Some(83_886_080));
    }

    #[test]
    fn lines_without_counters_have_no_stats() {
        assert_eq!(parse_stats("Checking collisions under /music"), None);
    }

    #[test]
    fn parse_line_surfaces_stage_progress_and_stats_together() {
        let parsed = parse_line("Downloading 50% 20 MiB / 40 MiB 2 MiB/s");
        assert_eq!(parsed.stage, Some(Stage::Downloading));
        let progress = parsed.progress.expect("progress");
        assert_eq!(progress.percent, Some(50.0));
        assert_eq!(progress.speed_bps, Some(2 * 1024 * 1024));
        assert_eq!(parsed.stats, None);
    }

    #[test]
    fn collision_line_has_only_a_stage() {
        let parsed = parse_line("Checking collisions under /music");
        assert_eq!(parsed.stage, Some(Stage::CheckingCollisions));
        assert_eq!(parsed.progress, None);
        assert_eq!(parsed.stats, None);
    }

    #[test]
    fn parsing_is_deterministic() {
        let line = "Downloaded 1,024 bytes 12% 1 KiB / 8 KiB ETA 00:05";
        assert_eq!(parse_line(line), parse_line(line));
    }
}
