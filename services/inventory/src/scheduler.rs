//! Discovery trigger loop
//!
//! The cron expression is re-read from a `ScheduleSource` before every wait,
//! so the schedule can change without a restart. Runs never overlap: the
//! loop awaits each session before computing the next fire time.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule;
use thiserror::Error;
use tracing::{info, warn};

use crate::registry::DiscoveryRegistry;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("Cron expression '{0}' has no upcoming fire time")]
    Exhausted(String),
}

/// Next fire time of `expression` strictly after `after`.
///
/// Expressions use the six-field form with seconds, e.g. `0 0 */6 * * *`.
pub fn next_fire(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, ScheduleError> {
    let schedule = Schedule::from_str(expression).map_err(|e| ScheduleError::InvalidExpression {
        expression: expression.to_string(),
        reason: e.to_string(),
    })?;

    schedule
        .after(&after)
        .next()
        .ok_or_else(|| ScheduleError::Exhausted(expression.to_string()))
}

/// Supplies the current cron expression
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn cron_expression(&self) -> Result<String>;
}

/// Fixed expression from configuration
pub struct StaticSchedule(pub String);

#[async_trait]
impl ScheduleSource for StaticSchedule {
    async fn cron_expression(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Expression stored in a file, re-read on every poll
pub struct FileSchedule {
    path: PathBuf,
}

impl FileSchedule {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ScheduleSource for FileSchedule {
    async fn cron_expression(&self) -> Result<String> {
        let contents = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read schedule from {:?}", self.path))?;

        let expression = contents
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .with_context(|| format!("Schedule file {:?} has no expression", self.path))?;

        Ok(expression.to_string())
    }
}

pub struct Scheduler {
    registry: Arc<DiscoveryRegistry>,
    source: Arc<dyn ScheduleSource>,
    run_on_start: bool,
    retry_interval: Duration,
    current: Option<String>,
}

impl Scheduler {
    pub fn new(registry: Arc<DiscoveryRegistry>, source: Arc<dyn ScheduleSource>) -> Self {
        Self {
            registry,
            source,
            run_on_start: false,
            retry_interval: Duration::from_secs(60),
            current: None,
        }
    }

    pub fn run_on_start(mut self, enabled: bool) -> Self {
        self.run_on_start = enabled;
        self
    }

    /// Wait used while no valid schedule is known
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Poll the source and return how long to wait before the next run.
    ///
    /// A failed poll or an invalid expression keeps the last good schedule;
    /// `None` means there is none yet.
    pub async fn refresh(&mut self, now: DateTime<Utc>) -> Option<Duration> {
        match self.source.cron_expression().await {
            Ok(expression) => match next_fire(&expression, now) {
                Ok(_) => {
                    if self.current.as_deref() != Some(expression.as_str()) {
                        info!(cron = %expression, "Discovery schedule updated");
                    }
                    self.current = Some(expression);
                }
                Err(e) => warn!(error = %e, "Ignoring invalid schedule"),
            },
            Err(e) => warn!(error = ?e, "Failed to read discovery schedule"),
        }

        let expression = self.current.as_deref()?;
        let at = next_fire(expression, now).ok()?;
        Some((at - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// The expression currently in effect
    pub fn current(&self) -> Option<&str> {
        self.current.as_deref()
    }

    /// Run until the task is dropped.
    pub async fn run(mut self) {
        if self.run_on_start {
            info!("Running discovery on start");
            self.trigger().await;
        }

        loop {
            match self.refresh(Utc::now()).await {
                Some(delay) => {
                    info!(delay_secs = delay.as_secs(), "Next discovery scheduled");
                    tokio::time::sleep(delay).await;
                    self.trigger().await;
                }
                None => {
                    warn!(retry = ?self.retry_interval, "No valid discovery schedule");
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    async fn trigger(&self) {
        let output = self.registry.discover(None).await;
        info!(bytes = output.len(), "Scheduled discovery finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{DeadLetterChannel, Publisher};
    use crate::testing::{RecordingAnalytics, RecordingBus, RecordingErrorSink};
    use chrono::TimeZone;
    use std::io::Write;

    fn registry() -> Arc<DiscoveryRegistry> {
        let errors = Arc::new(RecordingErrorSink::default());
        let dead_letter = DeadLetterChannel::new(Arc::new(RecordingBus::new("dlq")), errors.clone());
        let publisher = Arc::new(Publisher::new(Arc::new(RecordingBus::new("assets")), dead_letter));
        Arc::new(DiscoveryRegistry::new(
            publisher,
            Arc::new(RecordingAnalytics::default()),
            errors,
        ))
    }

    #[test]
    fn test_next_fire() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        let next = next_fire("0 0 */6 * * *", now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_invalid_expression() {
        let err = next_fire("every tuesday", Utc::now()).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidExpression { .. }));
    }

    #[tokio::test]
    async fn test_file_schedule_reread_and_last_good_kept() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# discovery cadence\n0 30 * * * *").unwrap();

        let source = Arc::new(FileSchedule::new(file.path()));
        let mut scheduler = Scheduler::new(registry(), source);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();

        assert_eq!(scheduler.refresh(now).await, Some(Duration::from_secs(15 * 60)));

        std::fs::write(file.path(), "0 20 * * * *\n").unwrap();
        assert_eq!(scheduler.refresh(now).await, Some(Duration::from_secs(5 * 60)));

        std::fs::write(file.path(), "not a schedule\n").unwrap();
        assert_eq!(scheduler.refresh(now).await, Some(Duration::from_secs(5 * 60)));
        assert_eq!(scheduler.current(), Some("0 20 * * * *"));
    }

    #[tokio::test]
    async fn test_no_schedule_yet() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FileSchedule::new(dir.path().join("missing.cron")));
        let mut scheduler = Scheduler::new(registry(), source);

        assert_eq!(scheduler.refresh(Utc::now()).await, None);
        assert_eq!(scheduler.current(), None);
    }

    #[tokio::test]
    async fn test_static_schedule() {
        let mut scheduler = Scheduler::new(registry(), Arc::new(StaticSchedule("0 0 0 * * *".into())));
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();

        assert_eq!(scheduler.refresh(now).await, Some(Duration::from_secs(3600)));
    }
}
