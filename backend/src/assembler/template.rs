//! Minimal mustache renderer for LaTeX templates.
//!
//! Supported tags:
//! - `{{NAME}}`: scalar substitution, inserted verbatim (no escaping, the
//!   output is LaTeX, not HTML);
//! - `{{#NAME}}...{{/NAME}}`: repeated once per record of a list; inside, the
//!   record's keys shadow the top-level names;
//! - `{{^NAME}}...{{/NAME}}`: rendered only when `NAME` is empty or missing.
//!
//! Unknown names render as nothing. Unbalanced sections are an error.

use crate::error::FormError;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([#^/]?)\s*([A-Za-z0-9_.\-]+)\s*\}\}").expect("valid tag pattern")
});

pub type Record = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Substitution {
    Scalar(String),
    Records(Vec<Record>),
}

pub type Substitutions = BTreeMap<String, Substitution>;

#[derive(Debug)]
enum Node {
    Text(String),
    Var(String),
    Section {
        name: String,
        inverted: bool,
        children: Vec<Node>,
    },
}

struct Frame {
    open: Option<(String, bool)>,
    nodes: Vec<Node>,
}

fn parse(template: &str) -> Result<Vec<Node>, FormError> {
    let mut stack = vec![Frame {
        open: None,
        nodes: Vec::new(),
    }];
    let mut last = 0;

    for caps in TAG.captures_iter(template) {
        let (Some(whole), Some(sigil), Some(name)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let top = stack.last_mut().ok_or_else(|| FormError::Template("empty stack".into()))?;
        if whole.start() > last {
            top.nodes
                .push(Node::Text(template[last..whole.start()].to_string()));
        }
        last = whole.end();

        let name = name.as_str().to_string();
        match sigil.as_str() {
            "" => top.nodes.push(Node::Var(name)),
            "#" | "^" => stack.push(Frame {
                open: Some((name, sigil.as_str() == "^")),
                nodes: Vec::new(),
            }),
            _ => {
                let frame = stack.pop().filter(|f| f.open.is_some()).ok_or_else(|| {
                    FormError::Template(format!("closing {{{{/{}}}}} without opening tag", name))
                })?;
                let (open_name, inverted) = frame.open.unwrap_or_default();
                if open_name != name {
                    return Err(FormError::Template(format!(
                        "section {} closed by {}",
                        open_name, name
                    )));
                }
                let parent = stack
                    .last_mut()
                    .ok_or_else(|| FormError::Template("empty stack".into()))?;
                parent.nodes.push(Node::Section {
                    name,
                    inverted,
                    children: frame.nodes,
                });
            }
        }
    }

    if stack.len() != 1 {
        let unclosed: Vec<String> = stack
            .iter()
            .filter_map(|f| f.open.as_ref().map(|(n, _)| n.clone()))
            .collect();
        return Err(FormError::Template(format!(
            "unclosed sections: {}",
            unclosed.join(", ")
        )));
    }
    let mut root = stack.pop().map(|f| f.nodes).unwrap_or_default();
    if last < template.len() {
        root.push(Node::Text(template[last..].to_string()));
    }
    Ok(root)
}

fn render_nodes(nodes: &[Node], subs: &Substitutions, record: Option<&Record>, out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var(name) => {
                if let Some(v) = record.and_then(|r| r.get(name)) {
                    out.push_str(v);
                } else if let Some(Substitution::Scalar(v)) = subs.get(name) {
                    out.push_str(v);
                }
            }
            Node::Section {
                name,
                inverted,
                children,
            } => match (subs.get(name), inverted) {
                (Some(Substitution::Records(records)), false) => {
                    for r in records {
                        render_nodes(children, subs, Some(r), out);
                    }
                }
                (Some(Substitution::Scalar(s)), false) if !s.is_empty() => {
                    render_nodes(children, subs, record, out)
                }
                (Some(Substitution::Records(records)), true) if records.is_empty() => {
                    render_nodes(children, subs, record, out)
                }
                (Some(Substitution::Scalar(s)), true) if s.is_empty() => {
                    render_nodes(children, subs, record, out)
                }
                (None, true) => render_nodes(children, subs, record, out),
                _ => {}
            },
        }
    }
}

pub fn render(template: &str, subs: &Substitutions) -> Result<String, FormError> {
    let nodes = parse(template)?;
    let mut out = String::with_capacity(template.len());
    render_nodes(&nodes, subs, None, &mut out);
    Ok(out)
}
