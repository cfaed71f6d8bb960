//! Trace trees built from flat span collections.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as _;

use tracing::warn;

use crate::error::{TraceError, TraceFinding, TraceResult};
use crate::span::Span;

/// A span tree sharing one trace id.
///
/// Every span is retrievable by id. Orphans (spans whose parent is not in
/// the trace) are kept but never linked as children.
#[derive(Debug, Clone)]
pub struct Trace {
    trace_id: String,
    spans: HashMap<String, Span>,
    /// Span ids in input order.
    order: Vec<String>,
    children: HashMap<String, Vec<String>>,
    root_id: String,
}

/// A successfully built trace plus the non-fatal problems found on the way.
#[derive(Debug, Clone)]
pub struct TraceBuild {
    pub trace: Trace,
    pub findings: Vec<TraceFinding>,
}

impl TraceBuild {
    /// Emit every finding as a warning.
    pub fn log_findings(&self) {
        for finding in &self.findings {
            warn!(trace_id = %self.trace.trace_id, "{finding}");
        }
    }
}

impl Trace {
    /// Build a trace from spans in any order.
    ///
    /// Fails when there is no parentless span. With several, the first in
    /// input order becomes the root and a `MultipleRoots` finding is added.
    pub fn build(trace_id: impl Into<String>, spans: Vec<Span>) -> TraceResult<TraceBuild> {
        let trace_id = trace_id.into();
        if spans.is_empty() {
            return Err(TraceError::EmptyTrace(trace_id));
        }

        let mut findings = Vec::new();
        let mut by_id: HashMap<String, Span> = HashMap::with_capacity(spans.len());
        let mut order = Vec::with_capacity(spans.len());

        for span in spans {
            if by_id.contains_key(&span.span_id) {
                findings.push(TraceFinding::DuplicateSpan {
                    span_id: span.span_id.clone(),
                });
                continue;
            }
            order.push(span.span_id.clone());
            by_id.insert(span.span_id.clone(), span);
        }

        let mut roots = Vec::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for id in &order {
            let span = &by_id[id];
            match &span.parent_span_id {
                None => roots.push(id.clone()),
                Some(parent) if by_id.contains_key(parent) => {
                    children.entry(parent.clone()).or_default().push(id.clone());
                }
                Some(parent) => findings.push(TraceFinding::OrphanSpan {
                    span_id: id.clone(),
                    parent_span_id: parent.clone(),
                }),
            }
        }

        let mut roots = roots.into_iter();
        let Some(root_id) = roots.next() else {
            return Err(TraceError::NoRootSpan(trace_id));
        };
        let ignored: Vec<String> = roots.collect();
        if !ignored.is_empty() {
            findings.push(TraceFinding::MultipleRoots {
                kept: root_id.clone(),
                ignored,
            });
        }

        for kids in children.values_mut() {
            kids.sort_by_key(|id| by_id[id].start_time_unix_nano);
        }

        Ok(TraceBuild {
            trace: Trace {
                trace_id,
                spans: by_id,
                order,
                children,
                root_id,
            },
            findings,
        })
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn root(&self) -> &Span {
        &self.spans[&self.root_id]
    }

    pub fn get_span(&self, span_id: &str) -> Option<&Span> {
        self.spans.get(span_id)
    }

    /// Linked children of a span, ordered by start time.
    pub fn get_children(&self, span_id: &str) -> Vec<&Span> {
        self.children
            .get(span_id)
            .map(|ids| ids.iter().map(|id| &self.spans[id]).collect())
            .unwrap_or_default()
    }

    /// All spans in input order, orphans included.
    pub fn spans(&self) -> impl Iterator<Item = &Span> {
        self.order.iter().map(|id| &self.spans[id])
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Sum of every span's duration in milliseconds.
    pub fn duration_total_ms(&self) -> f64 {
        self.spans.values().map(Span::duration_ms).sum()
    }

    /// Sum of span durations grouped by service.
    pub fn service_durations_ms(&self) -> BTreeMap<&str, f64> {
        let mut totals = BTreeMap::new();
        for span in self.spans() {
            *totals.entry(span.service_name.as_str()).or_insert(0.0) += span.duration_ms();
        }
        totals
    }

    pub fn service_names(&self) -> BTreeSet<&str> {
        self.spans.values().map(|s| s.service_name.as_str()).collect()
    }

    /// Indented depth-first rendering of the linked tree.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root_id.as_str(), 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let span = &self.spans[id];
            let _ = writeln!(
                out,
                "{:indent$}{} {} ({:.3}ms)",
                "",
                span.service_name,
                span.operation_name,
                span.duration_ms(),
                indent = depth * 2
            );
            if let Some(kids) = self.children.get(id) {
                for kid in kids.iter().rev() {
                    stack.push((kid.as_str(), depth + 1));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::Attributes;
    use proptest::prelude::*;

    fn span(id: &str, parent: Option<&str>, service: &str, start: u64, end: u64) -> Span {
        Span {
            trace_id: "t1".into(),
            span_id: id.into(),
            parent_span_id: parent.map(str::to_string),
            service_name: service.into(),
            operation_name: format!("op-{id}"),
            start_time_unix_nano: start * 1_000_000,
            end_time_unix_nano: end * 1_000_000,
            attributes: Attributes::new(),
        }
    }

    #[test]
    fn builds_tree_in_any_order() {
        let build = Trace::build(
            "t1",
            vec![
                span("c2", Some("a"), "db", 5, 7),
                span("b", Some("a"), "api", 1, 4),
                span("a", None, "frontend", 0, 10),
                span("c1", Some("b"), "db", 2, 3),
            ],
        )
        .unwrap();

        assert!(build.findings.is_empty());
        let trace = build.trace;
        assert_eq!(trace.root().span_id, "a");
        let kids: Vec<_> = trace.get_children("a").iter().map(|s| s.span_id.as_str()).collect();
        assert_eq!(kids, vec!["b", "c2"]);
        assert_eq!(trace.duration_total_ms(), 10.0 + 3.0 + 1.0 + 2.0);
        assert_eq!(
            trace.service_names().into_iter().collect::<Vec<_>>(),
            vec!["api", "db", "frontend"]
        );
        assert_eq!(trace.service_durations_ms()["db"], 3.0);
    }

    #[test]
    fn no_root_fails() {
        let err = Trace::build(
            "t1",
            vec![span("a", Some("b"), "x", 0, 1), span("b", Some("a"), "x", 0, 1)],
        )
        .unwrap_err();
        assert_eq!(err, TraceError::NoRootSpan("t1".into()));

        let err = Trace::build("t2", vec![]).unwrap_err();
        assert_eq!(err, TraceError::EmptyTrace("t2".into()));
    }

    #[test]
    fn multiple_roots_keep_first() {
        let build = Trace::build(
            "t1",
            vec![
                span("r1", None, "x", 0, 1),
                span("r2", None, "x", 0, 1),
                span("k", Some("r2"), "x", 0, 1),
            ],
        )
        .unwrap();
        assert_eq!(build.trace.root().span_id, "r1");
        assert_eq!(
            build.findings,
            vec![TraceFinding::MultipleRoots {
                kept: "r1".into(),
                ignored: vec!["r2".into()],
            }]
        );
    }

    #[test]
    fn orphans_retrievable_but_unlinked() {
        let build = Trace::build(
            "t1",
            vec![span("r", None, "x", 0, 5), span("o", Some("ghost"), "x", 1, 2)],
        )
        .unwrap();
        assert_eq!(
            build.findings,
            vec![TraceFinding::OrphanSpan {
                span_id: "o".into(),
                parent_span_id: "ghost".into(),
            }]
        );
        assert!(build.trace.get_span("o").is_some());
        assert!(build.trace.get_children("r").is_empty());
        assert!(build.trace.get_children("ghost").is_empty());
        assert_eq!(build.trace.len(), 2);
    }

    #[test]
    fn duplicate_span_keeps_first() {
        let build = Trace::build(
            "t1",
            vec![span("r", None, "first", 0, 5), span("r", None, "second", 0, 9)],
        )
        .unwrap();
        assert_eq!(build.trace.len(), 1);
        assert_eq!(build.trace.root().service_name, "first");
        assert_eq!(
            build.findings,
            vec![TraceFinding::DuplicateSpan { span_id: "r".into() }]
        );
    }

    #[test]
    fn render_tree_is_depth_first() {
        let trace = Trace::build(
            "t1",
            vec![
                span("a", None, "frontend", 0, 10),
                span("b", Some("a"), "api", 1, 4),
                span("c", Some("b"), "db", 2, 3),
                span("d", Some("a"), "cache", 5, 6),
            ],
        )
        .unwrap()
        .trace;
        let rendered = trace.render_tree();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "frontend op-a (10.000ms)");
        assert_eq!(lines[1], "  api op-b (3.000ms)");
        assert_eq!(lines[2], "    db op-c (1.000ms)");
        assert_eq!(lines[3], "  cache op-d (1.000ms)");
    }

    /// Spans forming a tree: span `i > 0` points at a parent with a lower index.
    fn tree_spans() -> impl Strategy<Value = Vec<Span>> {
        prop::collection::vec(any::<prop::sample::Index>(), 0..20).prop_map(|parents| {
            let mut spans = vec![span("s0", None, "svc", 0, 1)];
            for (i, parent) in parents.iter().enumerate() {
                let id = format!("s{}", i + 1);
                let parent = format!("s{}", parent.index(i + 1));
                spans.push(span(&id, Some(&parent), "svc", 0, 1));
            }
            spans
        })
    }

    proptest! {
        #[test]
        fn single_root_always_builds(spans in tree_spans(), seed in any::<u64>()) {
            let mut shuffled = spans.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);

            let build = Trace::build("t1", shuffled).unwrap();
            prop_assert_eq!(build.trace.root().span_id.as_str(), "s0");
            prop_assert!(build.findings.is_empty());
            prop_assert_eq!(build.trace.len(), len);
        }

        #[test]
        fn parentless_free_sets_fail(n in 1usize..20) {
            let spans: Vec<Span> = (0..n)
                .map(|i| span(&format!("s{i}"), Some(&format!("s{}", (i + 1) % n)), "svc", 0, 1))
                .collect();
            prop_assert_eq!(
                Trace::build("t1", spans).unwrap_err(),
                TraceError::NoRootSpan("t1".into())
            );
        }
    }
}
