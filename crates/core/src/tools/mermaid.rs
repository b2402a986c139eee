//! # Mermaid Toolkit
//!
//! Deterministic helpers around Mermaid flowcharts. Model output is never
//! trusted to be clean, so this module:
//!
//! - pulls the flowchart out of fenced/chatty model output
//! - parses nodes, decision points and labelled transitions
//! - runs a cheap plausibility check (header, brackets, dangling branches)
//! - reports which node labels have no section in a document
//!
//! The parser covers the flowchart subset the generators are asked to use;
//! it is not a full Mermaid grammar.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

static FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*([A-Za-z]*)[^\n]*\n(.*?)```").expect("valid regex")
});

/// `A -- text --> B` becomes `A -->|text| B`
static TEXT_ON_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[^-=])(?:--|==)\s+([^\s>|-][^>|]*?)\s+(?:-->|==>)").expect("valid regex")
});

static ARROW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*(?:<?-{2,}>|<?={2,}>|<?-\.+->|-{3,}|={3,}|-\.+-|~~~)\s*(?:\|([^|]*)\|)?\s*")
        .expect("valid regex")
});

/// Statements that carry no nodes or edges
const SKIPPED_KEYWORDS: &[&str] = &[
    "flowchart",
    "graph",
    "classDef",
    "class",
    "style",
    "linkStyle",
    "click",
    "subgraph",
    "end",
    "direction",
];

/// Node shape, from its bracket style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeShape {
    /// `A` with no brackets
    Plain,
    /// `A[text]`
    Box,
    /// `A(text)`
    Round,
    /// `A([text])`
    Stadium,
    /// `A[[text]]`
    Subroutine,
    /// `A[(text)]`
    Database,
    /// `A((text))`
    Circle,
    /// `A{text}`
    Decision,
    /// `A{{text}}`
    Hexagon,
    /// `A>text]`
    Flag,
}

/// Openers are matched longest-first
const SHAPES: &[(&str, &str, NodeShape)] = &[
    ("((", "))", NodeShape::Circle),
    ("([", "])", NodeShape::Stadium),
    ("[[", "]]", NodeShape::Subroutine),
    ("[(", ")]", NodeShape::Database),
    ("{{", "}}", NodeShape::Hexagon),
    ("[", "]", NodeShape::Box),
    ("(", ")", NodeShape::Round),
    ("{", "}", NodeShape::Decision),
    (">", "]", NodeShape::Flag),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub label: Option<String>,
    pub shape: NodeShape,
}

impl Node {
    /// Text Mermaid would render for the node
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }

    pub fn is_decision(&self) -> bool {
        self.shape == NodeShape::Decision
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub label: Option<String>,
}

/// Parsed flowchart: nodes in order of first appearance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Flowchart {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Flowchart {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Distinct display labels, in node order
    pub fn labels(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.nodes
            .iter()
            .map(|n| n.display_label().trim().to_string())
            .filter(|label| !label.is_empty() && seen.insert(normalize(label)))
            .collect()
    }

    pub fn decision_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.is_decision()).collect()
    }

    pub fn outgoing(&self, id: &str) -> usize {
        self.edges.iter().filter(|e| e.from == id).count()
    }

    fn is_connected(&self, id: &str) -> bool {
        self.edges.iter().any(|e| e.from == id || e.to == id)
    }
}

/// Pull the flowchart source out of model output
///
/// Prefers a ```` ```mermaid ```` fence, then any fence, then everything from
/// the first `flowchart`/`graph` line.
pub fn extract_flowchart(text: &str) -> String {
    let fences: Vec<(String, String)> = FENCE
        .captures_iter(text)
        .map(|c| {
            (
                c.get(1).map_or("", |m| m.as_str()).to_ascii_lowercase(),
                c.get(2).map_or("", |m| m.as_str()).to_string(),
            )
        })
        .collect();

    if let Some((_, body)) = fences.iter().find(|(lang, _)| lang == "mermaid") {
        return body.trim().to_string();
    }
    if let Some((_, body)) = fences.iter().find(|(_, body)| has_header(body)) {
        return body.trim().to_string();
    }

    let lines: Vec<&str> = text.lines().collect();
    if let Some(start) = lines.iter().position(|line| is_header(line)) {
        return lines[start..].join("\n").trim().to_string();
    }

    text.trim().to_string()
}

fn is_header(line: &str) -> bool {
    let line = line.trim_start();
    line.starts_with("flowchart") || line.starts_with("graph")
}

fn has_header(source: &str) -> bool {
    source
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with("%%"))
        .is_some_and(is_header)
}

/// Parse a flowchart into nodes and edges
pub fn parse(source: &str) -> Flowchart {
    let mut builder = ChartBuilder::default();

    for line in source.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("%%") {
            continue;
        }
        for statement in line.split(';') {
            let statement = statement.trim();
            if statement.is_empty() || is_skipped(statement) {
                continue;
            }
            builder.statement(statement);
        }
    }

    builder.chart
}

fn is_skipped(statement: &str) -> bool {
    let first = statement.split_whitespace().next().unwrap_or("");
    SKIPPED_KEYWORDS.contains(&first)
}

#[derive(Default)]
struct ChartBuilder {
    chart: Flowchart,
    index: HashMap<String, usize>,
}

impl ChartBuilder {
    fn statement(&mut self, statement: &str) {
        let statement = TEXT_ON_LINK.replace_all(statement, "$1-->|$2|");

        let mut groups: Vec<Vec<String>> = Vec::new();
        let mut labels: Vec<Option<String>> = Vec::new();
        let mut last = 0;
        for arrow in ARROW.captures_iter(&statement) {
            let Some(whole) = arrow.get(0) else { continue };
            groups.push(self.segment(&statement[last..whole.start()]));
            labels.push(
                arrow
                    .get(1)
                    .map(|m| clean_label(m.as_str()))
                    .filter(|l| !l.is_empty()),
            );
            last = whole.end();
        }
        groups.push(self.segment(&statement[last..]));

        for (i, label) in labels.into_iter().enumerate() {
            for from in &groups[i] {
                for to in &groups[i + 1] {
                    self.chart.edges.push(Edge {
                        from: from.clone(),
                        to: to.clone(),
                        label: label.clone(),
                    });
                }
            }
        }
    }

    /// Register every node in an `A & B[x]` segment, returning their ids
    fn segment(&mut self, segment: &str) -> Vec<String> {
        segment
            .split('&')
            .filter_map(|part| self.node(part.trim()))
            .collect()
    }

    fn node(&mut self, text: &str) -> Option<String> {
        let text = text.split(":::").next().unwrap_or(text).trim();
        let id_len = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(text.len());
        if id_len == 0 {
            return None;
        }
        let id = text[..id_len].to_string();
        let rest = text[id_len..].trim();

        let (shape, label) = if rest.is_empty() {
            (NodeShape::Plain, None)
        } else {
            let (open, close, shape) = SHAPES
                .iter()
                .find(|(open, _, _)| rest.starts_with(open))
                .copied()
                .unwrap_or(("", "", NodeShape::Plain));
            let inner = rest[open.len()..].trim_end();
            let inner = inner.strip_suffix(close).unwrap_or(inner);
            (shape, Some(clean_label(inner)).filter(|l| !l.is_empty()))
        };

        match self.index.get(&id) {
            Some(&i) => {
                let existing = &mut self.chart.nodes[i];
                if existing.label.is_none() && label.is_some() {
                    existing.label = label;
                }
                if existing.shape == NodeShape::Plain {
                    existing.shape = shape;
                }
            }
            None => {
                self.index.insert(id.clone(), self.chart.nodes.len());
                self.chart.nodes.push(Node {
                    id: id.clone(),
                    label,
                    shape,
                });
            }
        }
        Some(id)
    }
}

fn clean_label(raw: &str) -> String {
    raw.trim()
        .trim_matches('"')
        .replace("<br>", " ")
        .replace("<br/>", " ")
        .trim()
        .to_string()
}

/// Plausibility findings for a flowchart; empty means nothing obvious is wrong
pub fn check_syntax(source: &str) -> Vec<String> {
    let mut findings = Vec::new();

    if !has_header(source) {
        findings.push("diagram does not start with a `flowchart` or `graph` header".to_string());
    }

    let code: String = source
        .lines()
        .filter(|line| !line.trim_start().starts_with("%%"))
        .collect::<Vec<_>>()
        .join("\n");
    for (open, close) in [('[', ']'), ('(', ')'), ('{', '}')] {
        let opened = code.matches(open).count();
        let closed = code.matches(close).count();
        if opened != closed {
            findings.push(format!(
                "unbalanced brackets: {} '{}' vs {} '{}'",
                opened, open, closed, close
            ));
        }
    }

    let chart = parse(source);
    if chart.nodes.is_empty() {
        findings.push("no nodes found".to_string());
        return findings;
    }
    if chart.edges.is_empty() {
        findings.push("no transitions between nodes".to_string());
        return findings;
    }

    for node in chart.decision_nodes() {
        let branches = chart.outgoing(&node.id);
        if branches < 2 {
            findings.push(format!(
                "decision '{}' has {} outgoing branch(es); expected at least 2",
                node.display_label(),
                branches
            ));
        }
    }

    for node in &chart.nodes {
        if !chart.is_connected(&node.id) {
            findings.push(format!("node '{}' is not connected", node.display_label()));
        }
    }

    findings
}

/// Markdown headings, without the leading `#`s
pub fn headings(document: &str) -> Vec<String> {
    document
        .lines()
        .map(str::trim_start)
        .filter(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|heading| !heading.is_empty())
        .collect()
}

/// Node labels with no matching section heading in `document`
pub fn uncovered_labels(document: &str, chart: &Flowchart) -> Vec<String> {
    // Padded so a label only matches whole words of a heading
    let headings: Vec<String> = headings(document)
        .iter()
        .map(|h| format!(" {} ", normalize(h)))
        .collect();
    chart
        .labels()
        .into_iter()
        .filter(|label| {
            let wanted = format!(" {} ", normalize(label));
            !headings.iter().any(|heading| heading.contains(&wanted))
        })
        .collect()
}

/// Lowercase words only, so `**1. Assign Mentor**` matches `Assign mentor`
fn normalize(text: &str) -> String {
    text.chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONBOARDING: &str = "flowchart TD
    A[Offer Accepted] --> B[Provision Accounts]
    B --> C[Assign Mentor]
    C --> D{Manager Approval}
    D -->|Approved| E[First Week Plan]
    D -->|Changes Requested| C
    E --> F[Onboarding Complete]";

    #[test]
    fn test_extract_prefers_mermaid_fence() {
        let text = "Sure!\n```text\nnot this\n```\n```mermaid\nflowchart LR\n  A --> B\n```\nDone.";
        assert_eq!(extract_flowchart(text), "flowchart LR\n  A --> B");
    }

    #[test]
    fn test_extract_unlabelled_fence_and_bare_text() {
        let fenced = "```\ngraph TD\n  A --> B\n```";
        assert_eq!(extract_flowchart(fenced), "graph TD\n  A --> B");

        let bare = "Here you go:\nflowchart TD\n  A --> B\n";
        assert_eq!(extract_flowchart(bare), "flowchart TD\n  A --> B");
    }

    #[test]
    fn test_parse_onboarding() {
        let chart = parse(ONBOARDING);
        assert_eq!(chart.nodes.len(), 6);
        assert_eq!(chart.edges.len(), 6);

        let decisions = chart.decision_nodes();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].display_label(), "Manager Approval");
        assert_eq!(chart.outgoing("D"), 2);

        let approved = chart.edges.iter().find(|e| e.to == "E").unwrap();
        assert_eq!(approved.label.as_deref(), Some("Approved"));

        assert_eq!(
            chart.labels(),
            vec![
                "Offer Accepted",
                "Provision Accounts",
                "Assign Mentor",
                "Manager Approval",
                "First Week Plan",
                "Onboarding Complete"
            ]
        );
    }

    #[test]
    fn test_parse_single_line_with_semicolons() {
        let chart = parse("flowchart TD; A[Start] --> B{Ok?}; B -->|yes| C[End]; B -->|no| A");
        assert_eq!(chart.nodes.len(), 3);
        assert_eq!(chart.edges.len(), 3);
        assert!(chart.node("B").unwrap().is_decision());
    }

    #[test]
    fn test_parse_chains_ampersands_and_text_links() {
        let chart = parse(
            "graph LR\n  A[Draft] --> B[Review] --> C[Publish]\n  A & B --> D[(Archive)]\n  C -- notify --> E([Readers])",
        );
        assert_eq!(chart.edges.len(), 5);
        assert_eq!(chart.node("D").unwrap().shape, NodeShape::Database);
        assert_eq!(chart.node("E").unwrap().shape, NodeShape::Stadium);

        let notify = chart.edges.iter().find(|e| e.to == "E").unwrap();
        assert_eq!(notify.from, "C");
        assert_eq!(notify.label.as_deref(), Some("notify"));
    }

    #[test]
    fn test_parse_skips_styling_and_subgraphs() {
        let chart = parse(
            "flowchart TD\n  %% comment\n  subgraph Intake\n    A[Form] --> B[Triage]\n  end\n  classDef hot fill:#f00\n  class A hot\n  style B fill:#0f0",
        );
        assert_eq!(chart.nodes.len(), 2);
        assert_eq!(chart.edges.len(), 1);
    }

    #[test]
    fn test_check_syntax_clean_chart() {
        assert!(check_syntax(ONBOARDING).is_empty());
    }

    #[test]
    fn test_check_syntax_findings() {
        let findings = check_syntax("A[Start --> B{Decide}\n B --> C[Done]\n X[Orphan]");
        assert!(findings.iter().any(|f| f.contains("header")));
        assert!(findings.iter().any(|f| f.contains("unbalanced")));
        assert!(findings.iter().any(|f| f.contains("expected at least 2")));
        assert!(findings.iter().any(|f| f.contains("'Orphan' is not connected")));

        let empty = check_syntax("flowchart TD");
        assert_eq!(empty, vec!["no nodes found".to_string()]);
    }

    #[test]
    fn test_headings_and_coverage() {
        let document = "# Onboarding\n\n## 1. Offer Accepted\ntext\n### **Assign mentor**\nmore";
        assert_eq!(
            headings(document),
            vec!["Onboarding", "1. Offer Accepted", "**Assign mentor**"]
        );

        let chart = parse(ONBOARDING);
        let missing = uncovered_labels(document, &chart);
        assert!(!missing.contains(&"Offer Accepted".to_string()));
        assert!(!missing.contains(&"Assign Mentor".to_string()));
        assert!(missing.contains(&"Manager Approval".to_string()));
        assert_eq!(missing.len(), 4);
    }

    #[test]
    fn test_coverage_matches_whole_words() {
        let chart = parse("flowchart TD\n    A[Attend Orientation] --> B([End])");

        let missing = uncovered_labels("## Attend Orientation\n", &chart);
        assert_eq!(missing, vec!["End".to_string()]);

        let missing = uncovered_labels("## Attend Orientation\n## The End\n", &chart);
        assert!(missing.is_empty());
    }
}
