//! DOT and HTML emission.
//!
//! The DOT render shows actors as boxes annotated with their default
//! execution time, channels as labelled edges, and initial tokens as small
//! diamond nodes spliced into their channel. Every node carries a URL
//! anchor so the HTML report can link its tables into the render.

use std::fmt::Write;

use crate::graph::{Graph, PortKind};
use crate::rational::Fraction;

/// Graphviz DOT description of the graph.
pub fn dot(g: &Graph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph {} {{", sanitise(&g.name));
    let _ = writeln!(out, "    rankdir = LR;");

    for a in g.actors() {
        let _ = writeln!(
            out,
            "    {} [label=\"{}\\n{}\", shape=box, URL=\"#actor_{}\"];",
            sanitise(&a.name),
            a.name,
            a.exec_time(0),
            sanitise(&a.name)
        );
    }

    for c in g.channels() {
        let src = &g.actor(g.src_actor(c.id)).name;
        let dst = &g.actor(g.dst_actor(c.id)).name;
        let label = format!(
            "{}({},{})",
            c.name,
            rate_label(g, c.id, PortKind::Out),
            rate_label(g, c.id, PortKind::In)
        );
        if c.initial_tokens > 0 {
            // Initial tokens appear as a diamond spliced into the channel.
            let token_node = format!("{}_tokens", sanitise(&c.name));
            let _ = writeln!(
                out,
                "    {} [label=\"{}\", shape=diamond, URL=\"#channel_{}\"];",
                token_node,
                c.initial_tokens,
                sanitise(&c.name)
            );
            let _ = writeln!(
                out,
                "    {} -> {} [label=\"{}\"];",
                sanitise(src),
                token_node,
                label
            );
            let _ = writeln!(out, "    {} -> {};", token_node, sanitise(dst));
        } else {
            let _ = writeln!(
                out,
                "    {} -> {} [label=\"{}\", URL=\"#channel_{}\"];",
                sanitise(src),
                sanitise(dst),
                label,
                sanitise(&c.name)
            );
        }
    }

    out.push_str("}\n");
    out
}

fn rate_label(g: &Graph, ch: crate::graph::ChannelId, side: PortKind) -> String {
    let rate = match side {
        PortKind::Out => g.src_rate(ch),
        PortKind::In => g.dst_rate(ch),
    };
    if rate.len() == 1 {
        rate.at(0).to_string()
    } else {
        format!(
            "[{}]",
            rate.seq()
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(",")
        )
    }
}

fn sanitise(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

/// Self-contained HTML report: actor and channel tables plus the DOT text
/// of the graph. `throughput` is included when an analysis produced one.
pub fn html_report(g: &Graph, throughput: Option<Fraction>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<!DOCTYPE html>");
    let _ = writeln!(out, "<html><head><title>{}</title></head><body>", g.name);
    let _ = writeln!(out, "<h1>Graph {}</h1>", g.name);

    if let Some(thr) = throughput {
        let _ = writeln!(
            out,
            "<p>Throughput: {} iterations per time unit ({:.6})</p>",
            thr,
            thr.as_f64()
        );
    }

    let _ = writeln!(out, "<h2>Actors</h2>");
    let _ = writeln!(
        out,
        "<table border=\"1\"><tr><th>Name</th><th>Processor</th>\
         <th>Execution time</th><th>State size</th></tr>"
    );
    for a in g.actors() {
        let p = &a.profiles[a.default_profile];
        let _ = writeln!(
            out,
            "<tr id=\"actor_{}\"><td>{}</td><td>{}</td><td>{:?}</td><td>{}</td></tr>",
            sanitise(&a.name),
            a.name,
            p.processor,
            p.exec_time,
            p.state_size.map_or("-".into(), |s| s.to_string()),
        );
    }
    let _ = writeln!(out, "</table>");

    let _ = writeln!(out, "<h2>Channels</h2>");
    let _ = writeln!(
        out,
        "<table border=\"1\"><tr><th>Name</th><th>From</th><th>To</th>\
         <th>Rates</th><th>Initial tokens</th><th>Capacity</th></tr>"
    );
    for c in g.channels() {
        let _ = writeln!(
            out,
            "<tr id=\"channel_{}\"><td>{}</td><td>{}</td><td>{}</td>\
             <td>{} / {}</td><td>{}</td><td>{}</td></tr>",
            sanitise(&c.name),
            c.name,
            g.actor(g.src_actor(c.id)).name,
            g.actor(g.dst_actor(c.id)).name,
            rate_label(g, c.id, PortKind::Out),
            rate_label(g, c.id, PortKind::In),
            c.initial_tokens,
            c.capacity.map_or("unbounded".into(), |s| s.to_string()),
        );
    }
    let _ = writeln!(out, "</table>");

    let _ = writeln!(out, "<h2>Graph render</h2>");
    let _ = writeln!(out, "<pre>\n{}</pre>", dot(g));
    let _ = writeln!(out, "</body></html>");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn pair() -> Graph {
        let mut g = Graph::new("pair");
        let a = g.add_actor("a", vec![2]);
        let b = g.add_actor("b", vec![3]);
        g.connect(a, 1u64, b, 1u64, 0);
        g.connect(b, 1u64, a, 1u64, 1);
        g
    }

    #[test]
    fn test_dot_contains_actors_and_token_diamond() {
        let g = pair();
        let text = dot(&g);
        assert!(text.contains("digraph pair"));
        assert!(text.contains("a [label=\"a\\n2\""));
        assert!(text.contains("shape=diamond"));
        assert!(text.contains("URL=\"#actor_a\""));
    }

    #[test]
    fn test_html_report_tables() {
        let g = pair();
        let html = html_report(&g, Some(Fraction::new(1, 5)));
        assert!(html.contains("<h2>Actors</h2>"));
        assert!(html.contains("id=\"channel_ch0\""));
        assert!(html.contains("Throughput: 1/5"));
        assert!(html.contains("unbounded"));
    }
}
