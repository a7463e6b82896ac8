//! Graphviz export of automata and control-flow graphs.
//!
//! Output is plain DOT text; render it with `dot -Tsvg`.

use std::fmt::Write;

use crate::automaton::{Automaton, Role};
use crate::cfg::Cfg;

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\l"),
            c => out.push(c),
        }
    }
    out
}

/// States reachable from the start as nodes (finish states double-circled),
/// transitions as labelled edges.
pub fn automaton_dot(automaton: &Automaton) -> String {
    let mut out = String::from("digraph automaton {\n    rankdir=LR;\n");
    let reachable = automaton.reachable();

    for &id in &reachable {
        let state = &automaton[id];
        let shape = match state.role {
            Role::Finish => "doublecircle",
            _ => "circle",
        };
        let _ = writeln!(
            out,
            "    {} [label=\"{}\\n{}\" shape={}];",
            id,
            id,
            escape(&state.label),
            shape
        );
    }
    if let Some(&start) = reachable.first() {
        let _ = writeln!(out, "    start [shape=point];\n    start -> {};", start);
    }

    for &id in &reachable {
        for transition in &automaton[id].transitions {
            let text = transition.to_string();
            let label = text.rsplit_once(" -> ").map_or(text.as_str(), |(l, _)| l);
            let _ = writeln!(
                out,
                "    {} -> {} [label=\"{}\"];",
                id,
                transition.target(),
                escape(label)
            );
        }
    }

    out.push_str("}\n");
    out
}

/// One record node per block listing its instructions, one edge per exit
/// labelled with the exit's label.
pub fn cfg_dot(cfg: &Cfg) -> String {
    let mut out = String::from("digraph cfg {\n    node [shape=box fontname=monospace];\n");

    for block in cfg.blocks() {
        let mut text = format!("{} [{}]\n", block.name, block.id);
        for i in &block.instructions {
            let _ = writeln!(text, "{}", i.instruction);
        }
        let style = if block.id == cfg.entry() { " style=bold" } else { "" };
        let _ = writeln!(
            out,
            "    {} [label=\"{}\"{}];",
            block.id,
            escape(&text),
            style
        );
    }

    for block in cfg.blocks() {
        for label in block.exit_labels() {
            if let Some(target) = cfg.block_for(label) {
                let _ = writeln!(out, "    {} -> {} [label=\"{}\"];", block.id, target, label);
            }
        }
    }

    out.push_str("}\n");
    out
}
