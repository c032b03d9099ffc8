//! DOT serialization of the concurrency graph.
//!
//! Edge endpoints are stored as raw goroutine ids / channel names and
//! resolved to the owning node's label here, so DOT connects edges to the
//! declared nodes. Dangling references are emitted verbatim.

use crate::{Channel, ConcurrencyGraph, Goroutine};

/// Render the graph as `strict digraph goroutine_channels { ... }`. Nodes are
/// emitted sorted by key within each category; edges keep insertion order.
pub fn render_dot(graph: &ConcurrencyGraph) -> String {
    let mut out = String::new();
    out.push_str("strict digraph goroutine_channels {\n");
    out.push_str("  // Nodes\n");

    let mut ids: Vec<&String> = graph.goroutines.keys().collect();
    ids.sort();
    for id in ids {
        out.push_str(&format!("  \"{}\";\n", goroutine_label(&graph.goroutines[id])));
    }

    let mut names: Vec<&String> = graph.channels.keys().collect();
    names.sort();
    for name in names {
        out.push_str(&format!(
            "  \"{}\";\n",
            channel_label(graph, &graph.channels[name])
        ));
    }

    out.push_str("  // Edges\n");
    for edge in &graph.edges {
        out.push_str(&format!(
            "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
            resolve(graph, &edge.from),
            resolve(graph, &edge.to),
            edge.kind.label()
        ));
    }
    out.push_str("}\n");
    out
}

fn goroutine_label(g: &Goroutine) -> String {
    format!("{} (ID: {})\\n{}\\n{}", g.func, g.id, g.file, g.ts)
}

fn channel_label(graph: &ConcurrencyGraph, channel: &Channel) -> String {
    let mut label = format!("channel {}", channel.name);
    if let Some(closer) = graph.closer_of(&channel.name) {
        label.push_str(&format!(" (closed by {closer})"));
    }
    label.push_str(&format!("\\n{}\\n{}", channel.file, channel.ts));
    label
}

fn resolve(graph: &ConcurrencyGraph, endpoint: &str) -> String {
    if let Some(goroutine) = graph.goroutines.get(endpoint) {
        goroutine_label(goroutine)
    } else if let Some(channel) = graph.channels.get(endpoint) {
        channel_label(graph, channel)
    } else {
        endpoint.to_string()
    }
}
