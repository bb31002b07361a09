//! Turnaround time (TAT), transactions per minute (TPM) and message volume
//! per hour (MVH) from the interface driver's log.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use litmus_core::model::{Conversation, TestCase};
use litmus_core::strategy_api::{Strategy, StrategyScore};
use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub const DEFAULT_SLA_SECONDS: f64 = 30.0;
pub const DEFAULT_LOG_FILE: &str = "interface.log";

const TS_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S,%3f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMarker {
    PromptSent,
    ResponseReceived,
    DriverReady,
    DriverQuit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub ts: NaiveDateTime,
    pub marker: LogMarker,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TatReport {
    pub transactions: usize,
    pub mean_tat_secs: Option<f64>,
    pub max_tat_secs: Option<f64>,
    pub session_secs: f64,
    pub tpm: f64,
    pub mvh: f64,
}

fn line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\[([^\]]+)\]\s*(.*)$").unwrap())
}

fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    TS_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
}

fn marker_of(msg: &str) -> Option<LogMarker> {
    let m = msg.to_lowercase();
    if m.contains("prompt sent") {
        Some(LogMarker::PromptSent)
    } else if m.contains("response received") {
        Some(LogMarker::ResponseReceived)
    } else if m.contains("driver ready") {
        Some(LogMarker::DriverReady)
    } else if m.contains("driver quit") {
        Some(LogMarker::DriverQuit)
    } else {
        None
    }
}

/// Marker lines of the form `[timestamp] ... prompt sent ...`; other lines
/// are ignored.
pub fn parse_log(text: &str) -> Vec<LogEvent> {
    text.lines()
        .filter_map(|line| {
            let cap = line_re().captures(line)?;
            let ts = parse_ts(&cap[1])?;
            let marker = marker_of(&cap[2])?;
            Some(LogEvent { ts, marker })
        })
        .collect()
}

fn secs_between(a: NaiveDateTime, b: NaiveDateTime) -> f64 {
    (b - a).num_milliseconds() as f64 / 1000.0
}

/// Pairs each prompt with the next response. The session spans driver
/// ready to driver quit, or first to last event when those are missing.
pub fn compute_report(events: &[LogEvent]) -> TatReport {
    let mut tats = Vec::new();
    let mut pending: Option<NaiveDateTime> = None;
    let mut messages = 0usize;
    for e in events {
        match e.marker {
            LogMarker::PromptSent => {
                messages += 1;
                pending = Some(e.ts);
            }
            LogMarker::ResponseReceived => {
                messages += 1;
                if let Some(start) = pending.take() {
                    tats.push(secs_between(start, e.ts));
                }
            }
            _ => {}
        }
    }

    let first = |m: LogMarker| events.iter().find(|e| e.marker == m).map(|e| e.ts);
    let last = |m: LogMarker| events.iter().rev().find(|e| e.marker == m).map(|e| e.ts);
    let start = first(LogMarker::DriverReady).or_else(|| events.first().map(|e| e.ts));
    let end = last(LogMarker::DriverQuit).or_else(|| events.last().map(|e| e.ts));
    let session_secs = match (start, end) {
        (Some(s), Some(e)) => secs_between(s, e).max(0.0),
        _ => 0.0,
    };

    let transactions = tats.len();
    let (tpm, mvh) = if session_secs > 0.0 {
        (
            transactions as f64 / (session_secs / 60.0),
            messages as f64 / (session_secs / 3600.0),
        )
    } else {
        (0.0, 0.0)
    };

    TatReport {
        transactions,
        mean_tat_secs: (!tats.is_empty()).then(|| tats.iter().sum::<f64>() / tats.len() as f64),
        max_tat_secs: tats.iter().copied().reduce(f64::max),
        session_secs,
        tpm,
        mvh,
    }
}

/// 1.0 within the SLA, decaying as `sla / tat` beyond it.
pub fn sla_score(mean_tat: f64, sla: f64) -> f64 {
    if mean_tat <= sla {
        1.0
    } else {
        (sla / mean_tat).clamp(0.0, 1.0)
    }
}

pub struct TatTpmMvh {
    log_dir: Option<PathBuf>,
}

impl TatTpmMvh {
    pub fn new(log_dir: Option<PathBuf>) -> Self {
        Self { log_dir }
    }

    fn log_path(&self, tc: &TestCase) -> PathBuf {
        let file = tc.field_str("log_file").unwrap_or(DEFAULT_LOG_FILE);
        let p = Path::new(file);
        match &self.log_dir {
            Some(dir) if p.is_relative() => dir.join(p),
            _ => p.to_path_buf(),
        }
    }
}

#[async_trait]
impl Strategy for TatTpmMvh {
    fn name(&self) -> &'static str {
        "tat_tpm_mvh"
    }

    async fn evaluate(&self, tc: &TestCase, _conv: &Conversation) -> anyhow::Result<StrategyScore> {
        let path = self.log_path(tc);
        let text = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to read log {}: {}", path.display(), e))?;
        let events = parse_log(&text);
        tracing::debug!(event = "tat.log_parsed", path = %path.display(), markers = events.len());
        let report = compute_report(&events);
        let sla = tc.field_f64("sla_seconds").unwrap_or(DEFAULT_SLA_SECONDS);

        let Some(mean) = report.mean_tat_secs else {
            return Ok(StrategyScore::fail("no prompt/response pairs in log")
                .with_details(serde_json::to_value(&report)?));
        };
        let score = sla_score(mean, sla);
        Ok(StrategyScore::new(
            score,
            format!(
                "mean TAT {:.1}s (SLA {:.0}s), {:.2} TPM, {:.1} MVH",
                mean, sla, report.tpm, report.mvh
            ),
        )
        .with_details(serde_json::to_value(&report)?))
    }
}
