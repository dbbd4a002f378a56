use std::{io::Write, sync::Arc};

use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::mode::Mode;

/// Something worth reporting while a run progresses.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MetricEvent {
    /// The loss and metric of one participant's step.
    Step {
        epoch: usize,
        participant: String,
        mode: Mode,
        loss: f32,
        f1: f32,
    },
    /// One participant's averages over a finished epoch.
    Participant {
        epoch: usize,
        participant: String,
        mode: Mode,
        f1: f32,
        loss: f32,
        balanced_accuracy: f32,
        macro_f1: f32,
    },
    /// Averages over every participant for a finished epoch.
    Epoch {
        epoch: usize,
        mode: Mode,
        f1: f32,
        loss: f32,
        balanced_accuracy: f32,
        macro_f1: f32,
    },
    Personalization {
        epoch: usize,
    },
    Evaluation {
        participant: String,
        accuracy: f32,
    },
}

/// Where metric events end up.
///
/// Emitting never fails from the caller's point of view, sinks deal with their own errors.
pub trait MetricsSink {
    fn emit(&mut self, event: MetricEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn emit(&mut self, event: MetricEvent) {
        match event {
            MetricEvent::Step {
                epoch,
                participant,
                mode,
                loss,
                f1,
            } => {
                log::debug!(participant = participant.as_str(), epoch = epoch; "{mode} step loss={loss} f1={f1}");
            }
            MetricEvent::Participant {
                epoch,
                participant,
                mode,
                f1,
                loss,
                balanced_accuracy,
                macro_f1,
            } => info!(
                participant = participant.as_str(), epoch = epoch;
                "{mode} f1={f1} loss={loss} balanced_acc={balanced_accuracy} f1_macro={macro_f1}"
            ),
            MetricEvent::Epoch {
                epoch,
                mode,
                f1,
                loss,
                balanced_accuracy,
                macro_f1,
            } => info!(
                epoch = epoch;
                "avg {mode} f1={f1} loss={loss} balanced_acc={balanced_accuracy} f1_macro={macro_f1}"
            ),
            MetricEvent::Personalization { epoch } => {
                info!(epoch = epoch; "personalization enabled, center_back frozen")
            }
            MetricEvent::Evaluation {
                participant,
                accuracy,
            } => info!(participant = participant.as_str(); "evaluation accuracy={accuracy}"),
        }
    }
}

/// Writes every event as one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> MetricsSink for JsonLinesSink<W> {
    fn emit(&mut self, event: MetricEvent) {
        let written = serde_json::to_writer(&mut self.writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));

        if let Err(e) = written {
            warn!("failed to write metric event: {e}");
        }
    }
}

/// Keeps every event in a shared buffer, handy to inspect a run after it finishes.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<MetricEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every event emitted so far.
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().clone()
    }
}

impl MetricsSink for MemorySink {
    fn emit(&mut self, event: MetricEvent) {
        self.events.lock().push(event);
    }
}

/// Fans every event out to several sinks.
#[derive(Default)]
pub struct Sinks {
    sinks: Vec<Box<dyn MetricsSink>>,
}

impl Sinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl MetricsSink for Sinks {
    fn emit(&mut self, event: MetricEvent) {
        if let Some((last, rest)) = self.sinks.split_last_mut() {
            for sink in rest {
                sink.emit(event.clone());
            }

            last.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_are_tagged() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(MetricEvent::Personalization { epoch: 3 });
        sink.emit(MetricEvent::Evaluation {
            participant: "ab12".into(),
            accuracy: 0.5,
        });

        let out = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = out.lines().collect();

        assert_eq!(lines[0], r#"{"event":"personalization","epoch":3}"#);
        assert_eq!(
            lines[1],
            r#"{"event":"evaluation","participant":"ab12","accuracy":0.5}"#
        );
    }

    #[test]
    fn memory_sink_clones_share_the_buffer() {
        let sink = MemorySink::new();
        let mut sinks = Sinks::new().with(sink.clone()).with(LogSink);

        sinks.emit(MetricEvent::Personalization { epoch: 1 });

        assert_eq!(sink.events(), [MetricEvent::Personalization { epoch: 1 }]);
    }
}
