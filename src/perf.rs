//! Run-wide timing and counter aggregation.
//!
//! Spans and counters are recorded into one process-wide table and summarized at
//! the end of a synthesis or training run (`--verbose`). This is coarse
//! accounting, not a profiler.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

const METRIC_COUNT: usize = 15;

/// Named metrics tracked by the perf collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    RuntimeLoad,
    TtsSynthesize,
    EncoderSynthesize,
    VocoderGenerate,
    ParallelGenerate,
    CorpusExample,
    TrainStep,
    TrainEpoch,
    DevEvaluation,
    CheckpointSave,
    TtsTokens,
    EncoderFrames,
    VocoderSamples,
    TrainFiles,
    CorpusSkipped,
}

impl Metric {
    const ALL: [Metric; METRIC_COUNT] = [
        Metric::RuntimeLoad,
        Metric::TtsSynthesize,
        Metric::EncoderSynthesize,
        Metric::VocoderGenerate,
        Metric::ParallelGenerate,
        Metric::CorpusExample,
        Metric::TrainStep,
        Metric::TrainEpoch,
        Metric::DevEvaluation,
        Metric::CheckpointSave,
        Metric::TtsTokens,
        Metric::EncoderFrames,
        Metric::VocoderSamples,
        Metric::TrainFiles,
        Metric::CorpusSkipped,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::RuntimeLoad => "runtime.load",
            Metric::TtsSynthesize => "tts.synthesize",
            Metric::EncoderSynthesize => "encoder.synthesize",
            Metric::VocoderGenerate => "vocoder.generate",
            Metric::ParallelGenerate => "parallel_vocoder.generate",
            Metric::CorpusExample => "corpus.example",
            Metric::TrainStep => "train.step",
            Metric::TrainEpoch => "train.epoch",
            Metric::DevEvaluation => "train.dev_eval",
            Metric::CheckpointSave => "checkpoint.save",
            Metric::TtsTokens => "tts.tokens",
            Metric::EncoderFrames => "encoder.frames",
            Metric::VocoderSamples => "vocoder.samples",
            Metric::TrainFiles => "train.files",
            Metric::CorpusSkipped => "corpus.skipped",
        }
    }

    /// Counters accumulate deltas; everything else is a timed span.
    fn is_counter(self) -> bool {
        matches!(
            self,
            Metric::TtsTokens
                | Metric::EncoderFrames
                | Metric::VocoderSamples
                | Metric::TrainFiles
                | Metric::CorpusSkipped
        )
    }

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Default)]
struct Slot {
    micros: AtomicU64,
    hits: AtomicU64,
}

struct Collector {
    started: Instant,
    slots: [Slot; METRIC_COUNT],
}

static COLLECTOR: OnceLock<Collector> = OnceLock::new();

fn collector() -> &'static Collector {
    COLLECTOR.get_or_init(|| Collector {
        started: Instant::now(),
        slots: std::array::from_fn(|_| Slot::default()),
    })
}

/// Records the elapsed time of its metric when dropped.
#[must_use = "the span records when it is dropped"]
pub struct PerfSpan {
    metric: Metric,
    start: Instant,
}

impl Drop for PerfSpan {
    fn drop(&mut self) {
        let micros = u64::try_from(self.start.elapsed().as_micros()).unwrap_or(u64::MAX);
        let slot = &collector().slots[self.metric.slot()];
        slot.micros.fetch_add(micros, Ordering::Relaxed);
        slot.hits.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn span(metric: Metric) -> PerfSpan {
    PerfSpan {
        metric,
        start: Instant::now(),
    }
}

pub fn add_count(metric: Metric, delta: u64) {
    collector().slots[metric.slot()]
        .hits
        .fetch_add(delta, Ordering::Relaxed);
}

/// Spans sorted by total time, then counters with their rate over the run.
pub fn report() -> String {
    let collector = collector();
    let uptime = collector.started.elapsed();
    let mut spans = Vec::new();
    let mut counters = Vec::new();
    for metric in Metric::ALL {
        let slot = &collector.slots[metric.slot()];
        let hits = slot.hits.load(Ordering::Relaxed);
        if hits == 0 {
            continue;
        }
        if metric.is_counter() {
            counters.push((metric, hits));
        } else {
            let total = Duration::from_micros(slot.micros.load(Ordering::Relaxed));
            spans.push((metric, total, hits));
        }
    }
    spans.sort_by(|a, b| b.1.cmp(&a.1));

    let mut out = String::new();
    let _ = writeln!(out, "perf summary over {:.3}s", uptime.as_secs_f64());
    if spans.is_empty() && counters.is_empty() {
        let _ = writeln!(out, "  nothing recorded");
        return out;
    }
    for (metric, total, hits) in spans {
        let mean_ms = total.as_secs_f64() * 1000.0 / hits as f64;
        let _ = writeln!(
            out,
            "  {:<28} {:>10.3}s  x{:<8} {:>10.3}ms avg",
            metric.name(),
            total.as_secs_f64(),
            hits,
            mean_ms
        );
    }
    let seconds = uptime.as_secs_f64().max(f64::EPSILON);
    for (metric, value) in counters {
        let _ = writeln!(
            out,
            "  {:<28} {:>10}  {:>10.1}/s",
            metric.name(),
            value,
            value as f64 / seconds
        );
    }
    out
}
