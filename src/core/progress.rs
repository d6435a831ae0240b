use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use tokio::time::Instant;

use tgfetch_core::core::events::{ProgressEvent, ProgressStatus};

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").unwrap());

/// Strips terminal control sequences from a raw progress string.
pub fn normalize(raw: &str) -> String {
    ANSI_RE.replace_all(raw, "").trim().to_string()
}

/// Pulls a percentage out of a yt-dlp progress line, either our
/// `download:` template or a plain line ending in `%`.
pub fn parse_percent(raw: &str) -> Option<f64> {
    let line = normalize(raw);
    let pct_str = if let Some(rest) = line.strip_prefix("download:") {
        rest.trim().trim_end_matches('%')
    } else if line.ends_with('%') {
        line.trim_end_matches('%').split_whitespace().last()?
    } else {
        return None;
    };

    pct_str.trim().parse::<f64>().ok().filter(|p| p.is_finite())
}

/// Rate limiter for one progress stream. `finished` and the first event of a
/// new phase always pass so a phase change is never lost.
pub struct ProgressThrottle {
    last_emit: Option<Instant>,
    last_status: Option<ProgressStatus>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            last_status: None,
            min_interval,
        }
    }

    pub fn should_emit(&mut self, event: &ProgressEvent) -> bool {
        self.should_emit_at(event, Instant::now())
    }

    pub fn should_emit_at(&mut self, event: &ProgressEvent, now: Instant) -> bool {
        let phase_change = self.last_status != Some(event.status);
        let due = match self.last_emit {
            Some(last) => now.saturating_duration_since(last) >= self.min_interval,
            None => true,
        };
        if !(event.is_finished() || phase_change || due) {
            return false;
        }
        self.last_emit = Some(now);
        self.last_status = Some(event.status);
        true
    }
}

pub fn describe(event: &ProgressEvent) -> String {
    match event.status {
        ProgressStatus::Probing => "🔎 Checking the link...".to_string(),
        ProgressStatus::Downloading => match event.percent {
            Some(p) => format!("⏳ Downloading... {:.1}%", p),
            None => "⏳ Downloading...".to_string(),
        },
        ProgressStatus::Finished => "✅ Download finished, preparing the file...".to_string(),
        ProgressStatus::Archiving => "🗜 Archiving...".to_string(),
        ProgressStatus::Compressing => match (event.percent, event.processed) {
            (Some(p), _) => format!("📉 Reducing quality... {:.0}%", p),
            (None, Some(done)) => format!("📉 Reducing quality... {}", format_clock(done)),
            (None, None) => "📉 Reducing quality...".to_string(),
        },
    }
}

fn format_clock(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_color_codes() {
        assert_eq!(normalize("\x1b[0;94m 42.3%\x1b[0m"), "42.3%");
    }

    #[test]
    fn normalize_keeps_plain_text() {
        assert_eq!(normalize("  plain  "), "plain");
    }

    #[test]
    fn parse_percent_template_line() {
        assert_eq!(parse_percent("download: 42.3%"), Some(42.3));
        assert_eq!(parse_percent("download:\x1b[0;94m  7.0%\x1b[0m"), Some(7.0));
    }

    #[test]
    fn parse_percent_plain_line() {
        assert_eq!(parse_percent("[download]  55.1%"), Some(55.1));
    }

    #[test]
    fn parse_percent_ignores_other_lines() {
        assert_eq!(parse_percent("[info] Downloading webpage"), None);
        assert_eq!(parse_percent("download: N/A%"), None);
    }

    #[test]
    fn throttle_allows_one_per_window() {
        let mut t = ProgressThrottle::new(Duration::from_secs(2));
        let start = Instant::now();
        let ev = ProgressEvent::downloading(Some(1.0));

        let mut emitted = 0;
        for i in 0..20 {
            let at = start + Duration::from_millis(100 * i);
            if t.should_emit_at(&ev, at) {
                emitted += 1;
            }
        }
        // 0ms and 2000ms would both pass, but the loop stops at 1900ms
        assert_eq!(emitted, 1);
        assert!(t.should_emit_at(&ev, start + Duration::from_millis(2000)));
    }

    #[test]
    fn throttle_never_drops_finished() {
        let mut t = ProgressThrottle::new(Duration::from_secs(2));
        let start = Instant::now();
        assert!(t.should_emit_at(&ProgressEvent::downloading(Some(99.0)), start));
        assert!(t.should_emit_at(&ProgressEvent::finished(), start + Duration::from_millis(10)));
        assert!(t.should_emit_at(&ProgressEvent::finished(), start + Duration::from_millis(20)));
    }

    #[test]
    fn new_phase_passes_then_window_applies() {
        let mut t = ProgressThrottle::new(Duration::from_secs(5));
        let start = Instant::now();
        assert!(t.should_emit_at(&ProgressEvent::archiving(), start));
        assert!(t.should_emit_at(
            &ProgressEvent::compressing(Some(0.0), None),
            start + Duration::from_millis(10)
        ));
        assert!(!t.should_emit_at(
            &ProgressEvent::compressing(Some(3.0), None),
            start + Duration::from_secs(1)
        ));
        assert!(t.should_emit_at(
            &ProgressEvent::compressing(Some(40.0), None),
            start + Duration::from_secs(6)
        ));
    }

    #[test]
    fn separate_throttles_do_not_interfere() {
        let start = Instant::now();
        let mut a = ProgressThrottle::new(Duration::from_secs(2));
        let mut b = ProgressThrottle::new(Duration::from_secs(2));
        let ev = ProgressEvent::downloading(None);
        assert!(a.should_emit_at(&ev, start));
        assert!(b.should_emit_at(&ev, start));
    }

    #[test]
    fn describe_messages() {
        assert_eq!(
            describe(&ProgressEvent::downloading(Some(42.3))),
            "⏳ Downloading... 42.3%"
        );
        assert_eq!(
            describe(&ProgressEvent::compressing(None, Some(Duration::from_secs(3725)))),
            "📉 Reducing quality... 01:02:05"
        );
    }
}
