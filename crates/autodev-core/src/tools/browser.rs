//! Headless browser console checking.
//!
//! Loads a URL in a headless browser and collects console errors, warnings,
//! and failed network requests. The probe is a trait so the loop can be
//! tested without a browser; the shipped implementation drives a headless
//! Chromium through the command runner and parses the console log Chromium
//! writes to stderr when `--enable-logging=stderr` is set.

use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

use crate::errors::AgentError;
use crate::exec::CommandRunner;

/// Outcome of one console check.
#[derive(Debug, Clone, Default)]
pub struct ConsoleReport {
    pub url: String,
    pub title: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub failed_requests: Vec<String>,
}

impl ConsoleReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty() || !self.failed_requests.is_empty()
    }

    /// Render the structured pass/fail summary fed back to the model.
    pub fn format(&self) -> String {
        let mut out = format!("Browser Test Results for {}:\n", self.url);
        if let Some(title) = &self.title {
            out.push_str(&format!("Title: {}\n", title));
        }
        out.push('\n');

        if self.has_errors() {
            out.push_str("ERRORS FOUND:\n");
            for error in &self.errors {
                out.push_str(&format!("  - {}\n", error));
            }
            if !self.warnings.is_empty() {
                out.push_str("\nWARNINGS:\n");
                for warning in &self.warnings {
                    out.push_str(&format!("  - {}\n", warning));
                }
            }
            if !self.failed_requests.is_empty() {
                out.push_str("\nNETWORK ERRORS:\n");
                for req in &self.failed_requests {
                    out.push_str(&format!("  - {}\n", req));
                }
            }
            out.push_str("\nFix these errors and test again!");
        } else {
            out.push_str("NO ERRORS. The web app is working.\n");
            if !self.warnings.is_empty() {
                out.push_str(&format!(
                    "{} warnings (non-critical)\n",
                    self.warnings.len()
                ));
            }
        }
        out
    }
}

#[async_trait]
pub trait BrowserProbe: Send + Sync {
    /// Load `url`, wait up to `wait_time` seconds for it to settle, and
    /// report collected console output.
    async fn check(&self, url: &str, wait_time: u64) -> Result<ConsoleReport, AgentError>;
}

/// Ceiling on the model-supplied page-load wait.
const MAX_WAIT_SECS: u64 = 300;

/// Clamp the wait and derive the virtual-time budget in milliseconds plus
/// the overall command timeout (budget plus slack for browser startup).
/// Clamping keeps the arithmetic below from overflowing on a pathological
/// wait value.
fn load_budget(wait_time: u64) -> (u64, Duration) {
    let wait = wait_time.min(MAX_WAIT_SECS);
    (wait * 1000, Duration::from_secs(wait + 30))
}

/// Probe backed by a headless Chromium binary.
pub struct HeadlessChromeProbe {
    binary: String,
    runner: CommandRunner,
}

impl HeadlessChromeProbe {
    pub fn new(binary: impl Into<String>, runner: CommandRunner) -> Self {
        Self {
            binary: binary.into(),
            runner,
        }
    }
}

#[async_trait]
impl BrowserProbe for HeadlessChromeProbe {
    async fn check(&self, url: &str, wait_time: u64) -> Result<ConsoleReport, AgentError> {
        log::info!("Checking browser console at: {}", url);

        let (budget_ms, timeout) = load_budget(wait_time);
        let command = format!(
            "{} --headless=new --disable-gpu --no-sandbox --enable-logging=stderr --v=0 \
             --virtual-time-budget={} --dump-dom '{}'",
            self.binary, budget_ms, url
        );
        let result = self
            .runner
            .execute(&command, false, None, timeout)
            .await
            .map_err(|e| AgentError::BrowserError(e.to_string()))?;

        if !result.success() && result.stdout.is_empty() {
            return Err(AgentError::BrowserError(format!(
                "Failed to load page (exit code {:?}): {}",
                result.exit_code,
                result.stderr.lines().last().unwrap_or("no output")
            )));
        }

        let mut report = parse_console_log(&result.stderr);
        report.url = url.to_string();
        report.title = extract_title(&result.stdout);

        if report.has_errors() {
            log::warn!(
                "Found {} console errors at {}",
                report.errors.len(),
                report.url
            );
        } else {
            log::info!("No console errors found at {}", report.url);
        }

        Ok(report)
    }
}

/// Parse Chromium's stderr console log into errors, warnings, and failed
/// network requests. Lines look like
/// `[1234:1:0101/000000.000:ERROR:CONSOLE(5)] "message", source: url (5)`.
fn parse_console_log(stderr: &str) -> ConsoleReport {
    let console_re =
        Regex::new(r#"(?m)^\[[^\]]*:(INFO|WARNING|ERROR):CONSOLE\(\d+\)\]\s*"(.*)""#)
            .expect("static regex");
    let network_re = Regex::new(r"net::(ERR_[A-Z_]+)\s*(\S*)").expect("static regex");

    let mut report = ConsoleReport::default();

    for caps in console_re.captures_iter(stderr) {
        let message = caps[2].to_string();
        match &caps[1] {
            "ERROR" => report.errors.push(message),
            "WARNING" => report.warnings.push(message),
            _ => {}
        }
    }

    for caps in network_re.captures_iter(stderr) {
        let target = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let entry = if target.is_empty() {
            caps[1].to_string()
        } else {
            format!("{}: {}", target, &caps[1])
        };
        if !report.failed_requests.contains(&entry) {
            report.failed_requests.push(entry);
        }
    }

    report
}

fn extract_title(dom: &str) -> Option<String> {
    let title_re = Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static regex");
    title_re
        .captures(dom)
        .map(|caps| caps[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_LOG: &str = concat!(
        "[9001:9001:0101/120000.000000:ERROR:CONSOLE(12)] \"Uncaught TypeError: x is undefined\", source: http://localhost:3000/app.js (12)\n",
        "[9001:9001:0101/120000.100000:WARNING:CONSOLE(3)] \"React key warning\", source: http://localhost:3000/app.js (3)\n",
        "[9001:9001:0101/120000.200000:INFO:CONSOLE(1)] \"booted\", source: http://localhost:3000/app.js (1)\n",
        "[9001:9001:0101/120000.300000:ERROR:network] net::ERR_CONNECTION_REFUSED http://localhost:3000/api/data\n",
    );

    #[test]
    fn test_parse_console_log_severities() {
        let report = parse_console_log(SAMPLE_LOG);

        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("Uncaught TypeError"));
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.failed_requests.len(), 1);
        assert!(report.failed_requests[0].contains("ERR_CONNECTION_REFUSED"));
        assert!(report.has_errors());
    }

    #[test]
    fn test_parse_console_log_clean_page() {
        let report = parse_console_log(
            "[9001:9001:0101/120000.000000:INFO:CONSOLE(1)] \"ready\", source: http://x (1)\n",
        );
        assert!(!report.has_errors());
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_extract_title() {
        let dom = "<html><head><title> My App </title></head><body></body></html>";
        assert_eq!(extract_title(dom).as_deref(), Some("My App"));
        assert_eq!(extract_title("<html></html>"), None);
    }

    #[test]
    fn test_load_budget_clamps_extreme_waits() {
        assert_eq!(load_budget(5), (5_000, Duration::from_secs(35)));
        assert_eq!(
            load_budget(u64::MAX),
            (MAX_WAIT_SECS * 1000, Duration::from_secs(MAX_WAIT_SECS + 30))
        );
    }

    #[test]
    fn test_format_reports_pass_and_fail() {
        let mut report = parse_console_log(SAMPLE_LOG);
        report.url = "http://localhost:3000".to_string();
        report.title = Some("My App".to_string());

        let rendered = report.format();
        assert!(rendered.contains("ERRORS FOUND"));
        assert!(rendered.contains("NETWORK ERRORS"));
        assert!(rendered.contains("Fix these errors"));

        let clean = ConsoleReport {
            url: "http://localhost:3000".to_string(),
            ..Default::default()
        };
        assert!(clean.format().contains("NO ERRORS"));
    }
}
