//! Capture fakes shared by the unit tests

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::messaging::{BusError, Delivery, MessageBus};
use crate::telemetry::{AnalyticsSink, ErrorSink};

#[derive(Clone, Copy)]
enum BusBehavior {
    Accept,
    Fail,
    Hang,
}

/// Bus that records what it accepts
pub struct RecordingBus {
    name: String,
    behavior: BusBehavior,
    messages: Mutex<Vec<String>>,
    flushes: AtomicUsize,
}

impl RecordingBus {
    fn with_behavior(name: &str, behavior: BusBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            messages: Mutex::new(Vec::new()),
            flushes: AtomicUsize::new(0),
        }
    }

    pub fn new(name: &str) -> Self {
        Self::with_behavior(name, BusBehavior::Accept)
    }

    /// Rejects every send
    pub fn failing(name: &str) -> Self {
        Self::with_behavior(name, BusBehavior::Fail)
    }

    /// Never acknowledges a send
    pub fn hanging(name: &str) -> Self {
        Self::with_behavior(name, BusBehavior::Hang)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, payload: &str) -> Result<Delivery, BusError> {
        match self.behavior {
            BusBehavior::Accept => {
                let mut messages = self.messages.lock().unwrap();
                messages.push(payload.to_string());
                Ok(Delivery {
                    partition: Some(0),
                    offset: Some(messages.len() as i64 - 1),
                })
            }
            BusBehavior::Fail => Err(BusError::Rejected(format!("{} is down", self.name))),
            BusBehavior::Hang => std::future::pending().await,
        }
    }

    async fn flush(&self) -> Result<(), BusError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingErrorSink {
    reports: Mutex<Vec<(String, String)>>,
}

impl RecordingErrorSink {
    pub fn count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    /// (context, error message) pairs in report order
    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().unwrap().clone()
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, error: &anyhow::Error, context: &str) {
        self.reports
            .lock()
            .unwrap()
            .push((context.to_string(), format!("{error:#}")));
    }
}

#[derive(Default)]
pub struct RecordingAnalytics {
    events: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl RecordingAnalytics {
    pub fn events(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events().into_iter().map(|(name, _)| name).collect()
    }
}

impl AnalyticsSink for RecordingAnalytics {
    fn track(&self, event: &str, properties: &BTreeMap<String, String>) {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), properties.clone()));
    }
}
