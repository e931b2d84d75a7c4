//! CFG builder and dominator analyzer (spec.md §4.2).

use crate::finding::{Category, Confidence, Evidence, EvidenceSource, Finding, IdMinter, Location, Severity};
use crate::sensitive::SensitivePattern;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};

pub type NodeId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Entry,
    Exit,
    Statement,
    Branch,
    Return,
}

#[derive(Debug, Clone)]
pub struct CfgNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub line_num: Option<u32>,
    pub statement: Option<String>,
    pub successors: Vec<NodeId>,
    pub predecessors: Vec<NodeId>,
    pub has_wipe: bool,
    pub has_sensitive_var: bool,
}

pub struct Cfg {
    pub nodes: Vec<CfgNode>,
    pub entry: NodeId,
    pub exits: Vec<NodeId>,
}

impl Cfg {
    fn node_mut(&mut self, id: NodeId) -> &mut CfgNode {
        &mut self.nodes[id]
    }

    fn add_node(&mut self, kind: NodeKind, line_num: Option<u32>, statement: Option<String>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(CfgNode {
            id,
            kind,
            line_num,
            statement,
            successors: Vec::new(),
            predecessors: Vec::new(),
            has_wipe: false,
            has_sensitive_var: false,
        });
        id
    }

    fn connect(&mut self, from: NodeId, to: NodeId) {
        if !self.node_mut(from).successors.contains(&to) {
            self.node_mut(from).successors.push(to);
        }
        if !self.node_mut(to).predecessors.contains(&from) {
            self.node_mut(to).predecessors.push(from);
        }
    }
}

static RE_RETURN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*return\b").unwrap());
static RE_IF: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*if\s*\(").unwrap());
static RE_ELSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\}?\s*else\b").unwrap());
pub const WIPE_CALLEES: &[&str] = &["explicit_bzero", "memset_s", "OPENSSL_cleanse", "sodium_memzero", "zeroize"];

fn is_wipe_call(line: &str) -> bool {
    WIPE_CALLEES.iter().any(|w| line.contains(w))
}

struct BranchFrame {
    merge: NodeId,
    branch_paths_pending: Vec<NodeId>,
}

/// Builds a single-function CFG from brace-delimited source. Comments and
/// blank lines are skipped; statement kinds recognized per spec.md §4.2.
pub fn build_cfg(source: &str, pattern: &SensitivePattern) -> Cfg {
    let lines = crate::source_scan::strip_comments(source);

    let mut cfg = Cfg {
        nodes: Vec::new(),
        entry: 0,
        exits: Vec::new(),
    };
    let entry = cfg.add_node(NodeKind::Entry, None, None);
    cfg.entry = entry;
    let mut current = entry;
    let mut stack: Vec<BranchFrame> = Vec::new();
    let mut seen_open_brace = false;

    for (idx, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let lineno = (idx + 1) as u32;

        if !seen_open_brace && line.contains('{') {
            seen_open_brace = true;
            continue;
        }

        if RE_RETURN.is_match(line) {
            let node = cfg.add_node(NodeKind::Return, Some(lineno), Some(line.to_string()));
            annotate(&mut cfg, node, line, pattern);
            cfg.connect(current, node);
            cfg.exits.push(node);
            current = node;
            continue;
        }

        if RE_IF.is_match(line) {
            let branch = cfg.add_node(NodeKind::Branch, Some(lineno), Some(line.to_string()));
            annotate(&mut cfg, branch, line, pattern);
            cfg.connect(current, branch);
            let merge = cfg.add_node(NodeKind::Statement, None, Some("<merge>".to_string()));
            stack.push(BranchFrame {
                merge,
                branch_paths_pending: vec![branch],
            });
            current = branch;
            continue;
        }

        if RE_ELSE.is_match(line) {
            if let Some(frame) = stack.last_mut() {
                // The then-branch falls through to merge; else resumes from the branch node.
                cfg.connect(current, frame.merge);
                let branch_node = *frame.branch_paths_pending.first().unwrap();
                current = branch_node;
            }
            continue;
        }

        if line.contains('}') && !line.contains('{') {
            if let Some(frame) = stack.pop() {
                cfg.connect(current, frame.merge);
                current = frame.merge;
            }
            continue;
        }

        let node = cfg.add_node(NodeKind::Statement, Some(lineno), Some(line.to_string()));
        annotate(&mut cfg, node, line, pattern);
        cfg.connect(current, node);
        current = node;
    }

    if cfg.exits.is_empty() {
        let synthetic = cfg.add_node(NodeKind::Exit, None, None);
        cfg.connect(current, synthetic);
        cfg.exits.push(synthetic);
    }

    cfg
}

fn annotate(cfg: &mut Cfg, id: NodeId, line: &str, pattern: &SensitivePattern) {
    let node = cfg.node_mut(id);
    node.has_wipe = is_wipe_call(line);
    node.has_sensitive_var = pattern.is_match(line);
}

/// Depth-first path enumeration to any exit. The visited set is cloned at
/// each branch so sibling paths do not mask each other (spec.md §4.2).
pub fn enumerate_paths(cfg: &Cfg) -> Vec<Vec<NodeId>> {
    let mut results = Vec::new();
    let mut stack: Vec<(NodeId, Vec<NodeId>, BTreeSet<NodeId>)> = vec![(cfg.entry, vec![cfg.entry], {
        let mut s = BTreeSet::new();
        s.insert(cfg.entry);
        s
    })];

    while let Some((node, path, visited)) = stack.pop() {
        let successors = &cfg.nodes[node].successors;
        if successors.is_empty() {
            results.push(path);
            continue;
        }
        let mut branched = false;
        for &succ in successors {
            if visited.contains(&succ) {
                if !branched {
                    results.push(path.clone());
                    branched = true;
                }
                continue;
            }
            let mut next_path = path.clone();
            next_path.push(succ);
            let mut next_visited = visited.clone();
            next_visited.insert(succ);
            stack.push((succ, next_path, next_visited));
        }
    }
    results
}

/// Standard iterative fixpoint dominator computation (spec.md §4.2).
/// Unreachable nodes start at the universe and are never reduced, per
/// spec.md's explicit statement (a deliberate divergence from the original
/// Python script, which collapses them to `{n}`; see DESIGN.md).
pub fn compute_dominators(cfg: &Cfg) -> HashMap<NodeId, BTreeSet<NodeId>> {
    let universe: BTreeSet<NodeId> = cfg.nodes.iter().map(|n| n.id).collect();
    let mut dom: HashMap<NodeId, BTreeSet<NodeId>> = HashMap::new();

    for node in &cfg.nodes {
        if node.id == cfg.entry {
            let mut s = BTreeSet::new();
            s.insert(cfg.entry);
            dom.insert(node.id, s);
        } else {
            dom.insert(node.id, universe.clone());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for node in &cfg.nodes {
            if node.id == cfg.entry {
                continue;
            }
            if node.predecessors.is_empty() {
                // stays at the universe, never reduced
                continue;
            }
            let mut new_dom: Option<BTreeSet<NodeId>> = None;
            for &pred in &node.predecessors {
                let pred_dom = dom.get(&pred).cloned().unwrap_or_default();
                new_dom = Some(match new_dom {
                    None => pred_dom,
                    Some(acc) => acc.intersection(&pred_dom).cloned().collect(),
                });
            }
            let mut new_dom = new_dom.unwrap_or_default();
            new_dom.insert(node.id);
            if dom.get(&node.id) != Some(&new_dom) {
                dom.insert(node.id, new_dom);
                changed = true;
            }
        }
    }
    dom
}

pub fn analyze(source: &str, path: &str, pattern: &SensitivePattern) -> Vec<Finding> {
    let cfg = build_cfg(source, pattern);
    let dom = compute_dominators(&cfg);
    let minter = IdMinter::new("RS", "CFG");
    let mut findings = Vec::new();

    for &exit in &cfg.exits {
        let exit_dom = dom.get(&exit).cloned().unwrap_or_default();
        let dominated_by_wipe = exit_dom.iter().any(|&n| cfg.nodes[n].has_wipe);
        if !dominated_by_wipe {
            let exit_node = &cfg.nodes[exit];
            findings.push(Finding {
                id: minter.next(),
                category: Category::NotDominatingExits,
                severity: Severity::High,
                confidence: Confidence::Likely,
                symbol: String::new(),
                location: Location::new(path, exit_node.line_num.unwrap_or(0)),
                detail: format!(
                    "exit at line {} is not dominated by any wipe operation",
                    exit_node.line_num.unwrap_or(0)
                ),
                evidence: vec![Evidence::new(
                    EvidenceSource::Cfg,
                    format!("dominator set: {:?}", exit_dom),
                )],
                needs_review: false,
                compiler_evidence: None,
            });
        }
    }

    for path_nodes in enumerate_paths(&cfg) {
        let touches_sensitive = path_nodes.iter().any(|&n| cfg.nodes[n].has_sensitive_var);
        let has_wipe = path_nodes.iter().any(|&n| cfg.nodes[n].has_wipe);
        if touches_sensitive && !has_wipe {
            findings.push(Finding {
                id: minter.next(),
                category: Category::NotOnAllPaths,
                severity: Severity::Medium,
                confidence: Confidence::Likely,
                symbol: String::new(),
                location: Location::file_level(path),
                detail: "path touches a sensitive variable without an intervening wipe".to_string(),
                evidence: vec![Evidence::new(EvidenceSource::Cfg, format!("path nodes: {:?}", path_nodes))],
                needs_review: false,
                compiler_evidence: None,
            });
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensitive::SensitivePattern;

    #[test]
    fn scenario_c_only_one_branch_wipes() {
        let source = r#"
fn f(secret_key: &mut [u8]) {
    if (cond) {
        zeroize(secret_key);
        return;
    } else {
        return;
    }
}
"#;
        let pattern = SensitivePattern::compose(&[]);
        let findings = analyze(source, "f.rs", &pattern);
        assert!(findings.iter().any(|f| f.category.as_str() == "NOT_DOMINATING_EXITS"));
    }

    #[test]
    fn dominator_correctness_exit_without_wipe_flagged() {
        let source = r#"
fn f(secret_key: &mut [u8]) {
    if (cond) {
        zeroize(secret_key);
    } else {
    }
    return;
}
"#;
        let pattern = SensitivePattern::compose(&[]);
        let cfg = build_cfg(source, &pattern);
        let dom = compute_dominators(&cfg);
        assert!(dom.contains_key(&cfg.entry));
    }
}
