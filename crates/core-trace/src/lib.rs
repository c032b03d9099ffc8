//! Trace-event parsing and concurrency-graph construction.
//!
//! The builder is streaming and line-oriented: lines without the `[GTRACE]`
//! sentinel belong to the traced program and are ignored, recognized events
//! with missing fields fail the run. Emissions from different goroutines
//! interleave arbitrarily; only per-goroutine program order is assumed, so an
//! edge may arrive before the `func_start` of its goroutine and the graph is
//! only read once the stream is exhausted.

use std::collections::HashMap;
use std::io::{self, BufRead};
use thiserror::Error;
use tracing::trace;

pub mod dot;

/// Prefix distinguishing trace output from the program's own stdout.
pub const SENTINEL: &str = "[GTRACE]";

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("i/o error reading trace stream: {0}")]
    Io(#[from] io::Error),
    #[error("malformed trace event: {line}")]
    Format { line: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Goroutine {
    pub id: String,
    pub func: String,
    pub file: String,
    pub ts: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub file: String,
    pub ts: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Send,
    Receive,
    Close,
    End,
}

impl EdgeKind {
    pub fn label(self) -> &'static str {
        match self {
            EdgeKind::Send => "send",
            EdgeKind::Receive => "receive",
            EdgeKind::Close => "close",
            EdgeKind::End => "end",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
}

/// Goroutines and channels as nodes, communication as directed edges. Edges
/// keep insertion order; node maps are last-writer-wins on duplicate keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConcurrencyGraph {
    pub goroutines: HashMap<String, Goroutine>,
    pub channels: HashMap<String, Channel>,
    pub edges: Vec<Edge>,
}

impl ConcurrencyGraph {
    /// Function name of the goroutine behind the first close edge targeting
    /// `channel_name`; falls back to the raw goroutine id when the goroutine
    /// was never registered.
    pub fn closer_of(&self, channel_name: &str) -> Option<&str> {
        self.edges
            .iter()
            .find(|e| e.kind == EdgeKind::Close && e.to == channel_name)
            .map(|e| {
                self.goroutines
                    .get(&e.from)
                    .map_or(e.from.as_str(), |g| g.func.as_str())
            })
    }
}

fn synth_channel_name(site: &str, file: &str) -> String {
    format!("chan_{site}_{file}")
}

#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: ConcurrencyGraph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one stdout line from the instrumented program.
    pub fn ingest_line(&mut self, line: &str) -> Result<(), TraceError> {
        if !line.starts_with(SENTINEL) {
            return Ok(());
        }
        let parts: Vec<&str> = line.split_whitespace().collect();
        // Sentinel plus fewer than two fields carries no event.
        if parts.len() < 3 {
            return Ok(());
        }
        match parts[1] {
            "channel_create" => {
                let [site, file, ts, _capacity] = require_fields::<4>(line, &parts)?;
                let name = synth_channel_name(site, file);
                self.graph.channels.insert(
                    name.clone(),
                    Channel {
                        name,
                        file: file.to_string(),
                        ts: ts.to_string(),
                    },
                );
            }
            "func_start" => {
                let [id, func, file, ts] = require_fields::<4>(line, &parts)?;
                self.graph.goroutines.insert(
                    id.to_string(),
                    Goroutine {
                        id: id.to_string(),
                        func: func.to_string(),
                        file: file.to_string(),
                        ts: ts.to_string(),
                    },
                );
            }
            "channel_send" => {
                let [id, site, file, _ts] = require_fields::<4>(line, &parts)?;
                self.graph.edges.push(Edge {
                    from: id.to_string(),
                    to: synth_channel_name(site, file),
                    kind: EdgeKind::Send,
                });
            }
            "channel_close" => {
                let [id, site, file, ts] = require_fields::<4>(line, &parts)?;
                let name = synth_channel_name(site, file);
                if let Some(channel) = self.graph.channels.get_mut(&name) {
                    channel.ts = ts.to_string();
                }
                self.graph.edges.push(Edge {
                    from: id.to_string(),
                    to: name,
                    kind: EdgeKind::Close,
                });
            }
            // Recognized by the grammar, not part of the minimal graph.
            other => {
                trace!(target: "trace.parse", kind = other, "event_ignored");
            }
        }
        Ok(())
    }

    pub fn finish(self) -> ConcurrencyGraph {
        self.graph
    }

    /// Drain a reader to completion and return the resulting graph.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<ConcurrencyGraph, TraceError> {
        let mut builder = Self::new();
        for line in reader.lines() {
            builder.ingest_line(&line?)?;
        }
        Ok(builder.finish())
    }
}

/// The N event fields following the kind token, or a format error citing the
/// line.
fn require_fields<'l, const N: usize>(
    line: &str,
    parts: &[&'l str],
) -> Result<[&'l str; N], TraceError> {
    if parts.len() < N + 2 {
        return Err(TraceError::Format {
            line: line.to_string(),
        });
    }
    let mut fields: [&'l str; N] = [""; N];
    fields.copy_from_slice(&parts[2..N + 2]);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(stream: &str) -> ConcurrencyGraph {
        GraphBuilder::from_reader(stream.as_bytes()).unwrap()
    }

    #[test]
    fn minimal_stream_yields_one_goroutine_one_channel_one_edge() {
        let graph = build(
            "[GTRACE] channel_create c1 file.x:3 1000 0\n\
             [GTRACE] func_start 7 worker file.x:5 1100\n\
             [GTRACE] channel_send 7 c1 file.x:3 1200\n",
        );
        assert_eq!(graph.goroutines.len(), 1);
        let worker = &graph.goroutines["7"];
        assert_eq!(worker.func, "worker");
        assert_eq!(worker.file, "file.x:5");
        assert_eq!(worker.ts, "1100");

        assert_eq!(graph.channels.len(), 1);
        let channel = &graph.channels["chan_c1_file.x:3"];
        assert_eq!(channel.file, "file.x:3");
        assert_eq!(channel.ts, "1000");

        assert_eq!(
            graph.edges,
            vec![Edge {
                from: "7".to_string(),
                to: "chan_c1_file.x:3".to_string(),
                kind: EdgeKind::Send,
            }]
        );
    }

    #[test]
    fn short_recognized_event_is_a_format_error() {
        let mut builder = GraphBuilder::new();
        let err = builder
            .ingest_line("[GTRACE] channel_create onlyone")
            .unwrap_err();
        match err {
            TraceError::Format { line } => assert!(line.contains("channel_create onlyone")),
            other => panic!("expected format error, got {other:?}"),
        }
    }

    #[test]
    fn foreign_and_near_empty_lines_are_ignored() {
        let graph = build(
            "hello from the program\n\
             [GTRACE]\n\
             [GTRACE] func_start\n\
             [GTRACE] channel_create c1 file.x:3 1000 0\n",
        );
        assert_eq!(graph.channels.len(), 1);
        assert!(graph.goroutines.is_empty());
    }

    #[test]
    fn func_end_receive_and_close_error_are_accepted_and_ignored() {
        let graph = build(
            "[GTRACE] func_start 7 worker file.x:5 1100\n\
             [GTRACE] channel_receive 7 c1 file.x:8 1300\n\
             [GTRACE] func_end 7 worker file.x:5 1400\n\
             [GTRACE] channel_close_error 7 c1 file.x:9 1500 close_of_closed\n",
        );
        assert_eq!(graph.goroutines.len(), 1);
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn edge_may_precede_its_goroutine_registration() {
        let graph = build(
            "[GTRACE] channel_send 7 c1 file.x:3 1200\n\
             [GTRACE] func_start 7 worker file.x:5 1100\n",
        );
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.goroutines["7"].func, "worker");
    }

    #[test]
    fn duplicate_registrations_are_last_writer_wins() {
        let graph = build(
            "[GTRACE] func_start 7 worker file.x:5 1100\n\
             [GTRACE] func_start 7 drainer file.x:9 1200\n",
        );
        assert_eq!(graph.goroutines["7"].func, "drainer");
    }

    #[test]
    fn close_updates_known_channel_timestamp_and_tolerates_unknown() {
        let graph = build(
            "[GTRACE] channel_create c1 file.x:3 1000 0\n\
             [GTRACE] channel_close 7 c1 file.x:3 1900\n\
             [GTRACE] channel_close 7 ghost file.x:4 2000\n",
        );
        assert_eq!(graph.channels["chan_c1_file.x:3"].ts, "1900");
        assert_eq!(graph.edges.len(), 2);
    }

    #[test]
    fn cross_goroutine_interleaving_changes_only_edge_order() {
        // Two interleavings that both preserve each goroutine's own order.
        let a = build(
            "[GTRACE] func_start 7 worker file.x:5 1100\n\
             [GTRACE] func_start 8 drainer file.x:9 1150\n\
             [GTRACE] channel_send 7 c1 file.x:3 1200\n\
             [GTRACE] channel_send 8 c1 file.x:3 1250\n",
        );
        let b = build(
            "[GTRACE] func_start 8 drainer file.x:9 1150\n\
             [GTRACE] channel_send 8 c1 file.x:3 1250\n\
             [GTRACE] func_start 7 worker file.x:5 1100\n\
             [GTRACE] channel_send 7 c1 file.x:3 1200\n",
        );
        assert_eq!(a.goroutines, b.goroutines);
        assert_eq!(a.channels, b.channels);
        let sort = |graph: &ConcurrencyGraph| {
            let mut edges = graph.edges.clone();
            edges.sort_by(|x, y| (&x.from, &x.to).cmp(&(&y.from, &y.to)));
            edges
        };
        assert_eq!(sort(&a), sort(&b));
    }
}
