use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use extractor_contracts::runs::summary::PassSummary;
use extractor_contracts::{ImageSize, ObjectDescriptor, Quality, ResultCollection};
use image::DynamicImage;
use serde_json::json;
use uuid::Uuid;

use crate::report::{payload, Reporter};
use crate::synthesizer::ObjectSynthesizer;

pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassReport {
    pub pass_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub requested: usize,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub cancelled: bool,
}

impl PassReport {
    pub fn to_summary(&self, quality: Quality, size: ImageSize) -> PassSummary {
        PassSummary {
            pass_id: self.pass_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: self.finished_at.clone(),
            quality: quality.as_str().to_string(),
            size: size.as_str().to_string(),
            requested: self.requested as u64,
            succeeded: self.succeeded.clone(),
            failed: self.failed.clone(),
            cancelled: self.cancelled,
        }
    }
}

/// Runs synthesis over a selection, one descriptor at a time.
///
/// Each item either fully succeeds or fully fails; a failure is reported and
/// the pass moves on. After every item the orchestrator sleeps for `delay`.
pub struct GenerationOrchestrator<'a> {
    synthesizer: ObjectSynthesizer<'a>,
    delay: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> GenerationOrchestrator<'a> {
    pub fn new(synthesizer: ObjectSynthesizer<'a>) -> Self {
        Self {
            synthesizer,
            delay: DEFAULT_ITEM_DELAY,
            cancel: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Checked between items only; an in-flight request always completes.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Runs a pass into a brand-new collection.
    pub fn run(
        &self,
        source: &DynamicImage,
        selected: &[ObjectDescriptor],
        quality: Quality,
        size: ImageSize,
        reporter: &dyn Reporter,
    ) -> ResultCollection {
        let mut results = ResultCollection::new();
        self.run_into(&mut results, source, selected, quality, size, reporter);
        results
    }

    /// Runs a pass, inserting successes into `results` under each
    /// descriptor's composite key. Existing entries are kept unless a later
    /// item overwrites their key.
    pub fn run_into(
        &self,
        results: &mut ResultCollection,
        source: &DynamicImage,
        selected: &[ObjectDescriptor],
        quality: Quality,
        size: ImageSize,
        reporter: &dyn Reporter,
    ) -> PassReport {
        let total = selected.len();
        let mut report = PassReport {
            pass_id: format!("pass-{}", Uuid::new_v4().simple()),
            started_at: now_utc_iso(),
            finished_at: String::new(),
            requested: total,
            succeeded: Vec::new(),
            failed: Vec::new(),
            cancelled: false,
        };
        reporter.record(
            "pass_started",
            payload(json!({
                "pass_id": report.pass_id,
                "requested": total,
                "quality": quality.as_str(),
                "size": size.as_str(),
                "model": self.synthesizer.model(),
            })),
        );

        for (index, descriptor) in selected.iter().enumerate() {
            if self.is_cancelled() {
                report.cancelled = true;
                reporter.record(
                    "pass_cancelled",
                    payload(json!({
                        "pass_id": report.pass_id,
                        "completed": index,
                        "remaining": total - index,
                    })),
                );
                break;
            }

            let key = descriptor.composite_key();
            match self
                .synthesizer
                .synthesize(source, descriptor, quality, size, reporter)
            {
                Some(reference) => {
                    if results.insert(key.clone(), reference).is_some() {
                        reporter.record(
                            "result_replaced",
                            payload(json!({ "pass_id": report.pass_id, "key": key })),
                        );
                    }
                    report.succeeded.push(key);
                }
                None => {
                    reporter.record(
                        "item_failed",
                        payload(json!({
                            "pass_id": report.pass_id,
                            "key": key,
                            "label": descriptor.label_local,
                        })),
                    );
                    report.failed.push(key);
                }
            }

            reporter.progress(index + 1, total, &descriptor.label_local);
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
        }

        report.finished_at = now_utc_iso();
        reporter.record(
            "pass_finished",
            payload(json!({
                "pass_id": report.pass_id,
                "requested": total,
                "succeeded": report.succeeded.len(),
                "failed": report.failed.len(),
                "cancelled": report.cancelled,
            })),
        );
        report
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}
