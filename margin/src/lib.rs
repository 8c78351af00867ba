//! Margin outline library.
//! Parses the plain-text Margin format into a tree of items, tasks and annotations,
//! and projects that tree to JSON or back to Margin text.

pub mod core {
    use serde::{Deserialize, Serialize, Serializer};
    use std::{fmt, path::PathBuf};

    /* ------------------------------ Scalars ------------------------------ */

    /// Annotation payload after numeric coercion.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(untagged)]
    pub enum Scalar {
        Integer(i64),
        Float(f64),
        Text(String),
    }

    impl From<i64> for Scalar {
        fn from(i: i64) -> Self {
            Self::Integer(i)
        }
    }

    impl From<i32> for Scalar {
        fn from(i: i32) -> Self {
            Self::Integer(i64::from(i))
        }
    }

    impl From<f64> for Scalar {
        fn from(f: f64) -> Self {
            Self::Float(f)
        }
    }

    impl From<&str> for Scalar {
        fn from(s: &str) -> Self {
            Self::Text(s.to_string())
        }
    }

    impl From<String> for Scalar {
        fn from(s: String) -> Self {
            Self::Text(s)
        }
    }

    impl fmt::Display for Scalar {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                Scalar::Integer(i) => write!(f, "{i}"),
                // Debug keeps the fractional part (`74.0`), so the text reads back as a float.
                Scalar::Float(x) => write!(f, "{x:?}"),
                Scalar::Text(s) => f.write_str(s),
            }
        }
    }

    /* ----------------------------- Annotations ----------------------------- */

    /// A bracketed fragment: `[value]` or `[key: value]`.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Annotation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        value: Scalar,
    }

    impl Annotation {
        pub fn anonymous(value: impl Into<Scalar>) -> Self {
            Self {
                key: None,
                value: value.into(),
            }
        }

        pub fn keyed(key: impl Into<String>, value: impl Into<Scalar>) -> Self {
            Self {
                key: Some(key.into()),
                value: value.into(),
            }
        }

        pub fn key(&self) -> Option<&str> {
            self.key.as_deref()
        }

        pub fn value(&self) -> &Scalar {
            &self.value
        }
    }

    impl fmt::Display for Annotation {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match &self.key {
                Some(key) => write!(f, "[{}: {}]", key, self.value),
                None => write!(f, "[{}]", self.value),
            }
        }
    }

    /* -------------------------------- Nodes -------------------------------- */

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum NodeKind {
        Item,
        Task,
        Root,
    }

    /// A tree element: an item, a task, or the synthetic root of a document.
    #[derive(Debug, Clone, PartialEq, Deserialize)]
    #[serde(from = "NodeRecord")]
    pub struct Node {
        /// Source line this node was built from (`"root"` for the root).
        pub raw_data: String,
        pub kind: NodeKind,
        /// Text left over once decorations and annotations are removed.
        pub value: Option<String>,
        /// Only ever true for tasks.
        pub done: bool,
        pub annotations: Vec<Annotation>,
        pub children: Vec<Node>,
    }

    impl Node {
        pub const ROOT: &'static str = "root";

        pub fn root() -> Self {
            Self {
                raw_data: Self::ROOT.to_string(),
                kind: NodeKind::Root,
                value: Some(Self::ROOT.to_string()),
                done: false,
                annotations: vec![],
                children: vec![],
            }
        }

        pub fn item(value: impl Into<String>) -> Self {
            let value = value.into();
            Self {
                raw_data: value.clone(),
                kind: NodeKind::Item,
                value: Some(value),
                done: false,
                annotations: vec![],
                children: vec![],
            }
        }

        pub fn task(value: impl Into<String>, done: bool) -> Self {
            Self {
                kind: NodeKind::Task,
                done,
                ..Self::item(value)
            }
        }

        pub fn is_root(&self) -> bool {
            self.kind == NodeKind::Root
        }

        pub fn is_task(&self) -> bool {
            self.kind == NodeKind::Task
        }

        pub fn is_done(&self) -> bool {
            self.is_task() && self.done
        }

        pub fn value(&self) -> Option<&str> {
            self.value.as_deref()
        }

        /// Number of nodes below this one, at any depth.
        pub fn descendant_count(&self) -> usize {
            self.children
                .iter()
                .map(|child| 1 + child.descendant_count())
                .sum()
        }
    }

    /* ------------------------------ JSON shape ------------------------------ */

    // Root and item share the "item" tag; `done` is only written for tasks.
    #[derive(Serialize)]
    struct NodeJson<'a> {
        raw_data: &'a str,
        #[serde(rename = "type")]
        kind: &'static str,
        value: Option<&'a str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        done: Option<bool>,
        annotations: &'a [Annotation],
        children: &'a [Node],
    }

    impl Serialize for Node {
        fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            NodeJson {
                raw_data: &self.raw_data,
                kind: if self.is_task() { "task" } else { "item" },
                value: self.value.as_deref(),
                done: self.is_task().then_some(self.done),
                annotations: &self.annotations,
                children: &self.children,
            }
            .serialize(serializer)
        }
    }

    #[derive(Deserialize)]
    struct NodeRecord {
        #[serde(default)]
        raw_data: String,
        #[serde(rename = "type", default)]
        kind: RecordKind,
        #[serde(default)]
        value: Option<String>,
        #[serde(default)]
        done: Option<bool>,
        #[serde(default)]
        annotations: Vec<Annotation>,
        #[serde(default)]
        children: Vec<Node>,
    }

    #[derive(Deserialize, Default)]
    #[serde(rename_all = "lowercase")]
    enum RecordKind {
        #[default]
        #[serde(alias = "root")]
        Item,
        Task,
    }

    impl From<NodeRecord> for Node {
        fn from(record: NodeRecord) -> Self {
            let kind = match record.kind {
                RecordKind::Item => NodeKind::Item,
                RecordKind::Task => NodeKind::Task,
            };
            Self {
                raw_data: record.raw_data,
                kind,
                value: record.value,
                done: kind == NodeKind::Task && record.done.unwrap_or(false),
                annotations: record.annotations,
                children: record.children,
            }
        }
    }

    /* ------------------------------- Errors ------------------------------- */

    #[derive(Debug, thiserror::Error)]
    pub enum MarginError {
        #[error("unknown format `{0}` (allowed formats: margin, json)")]
        UnknownFormat(String),
        #[error("invalid JSON document: {0}")]
        Json(#[from] serde_json::Error),
        #[error("reading {path:?}: {source}")]
        Io {
            path: PathBuf,
            #[source]
            source: std::io::Error,
        },
    }

}

pub mod parser {
    //! Margin parser.
    //!
    //! Parsing strategy:
    //! - The input is split into newline-terminated records and blank records are dropped.
    //! - Each record is classified on its own (see [`line`]): offset, kind, value, annotations.
    //! - The classified lines are folded into a tree by comparing the offsets of
    //!   consecutive lines. Deeper lines descend into the last node, shallower lines
    //!   return to the caller, equal lines stay siblings.

    use crate::core::{Node, NodeKind};
    use log::{debug, trace};
    use std::{cmp::Ordering, collections::VecDeque};

    pub use line::{Line, LineKind};

    /* ------------------------------- Options ------------------------------- */

    /// What the builder does once a descent into a child level returns.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum Lookahead {
        /// Compare the next remaining line against the current one again. Runs of
        /// annotation-only lines stay on their item and multi-level dedents land on
        /// the ancestor with the matching offset.
        #[default]
        Rescan,
        /// Keep the single comparison made before descending and continue with the
        /// next line. Matches the historical Margin behavior: a second annotation-only
        /// line under an item moves up to the grandparent and ends that level.
        Single,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct ParseOptions {
        pub lookahead: Lookahead,
        /// Parse a final line that has no trailing newline instead of dropping it.
        pub keep_unterminated_line: bool,
    }

    /* ------------------------ Public entry points ------------------------ */

    /// Parse Margin text into a fresh root node.
    pub fn parse(text: &str) -> Node {
        parse_with_options(text, ParseOptions::default())
    }

    pub fn parse_with_options(text: &str, opts: ParseOptions) -> Node {
        let mut lines = tokenize(text, opts);
        debug!("classified {} lines", lines.len());

        let mut root = Node::root();
        build(&mut root, &mut lines, opts.lookahead);
        match opts.lookahead {
            Lookahead::Rescan => {
                while !lines.is_empty() {
                    build(&mut root, &mut lines, opts.lookahead);
                }
            }
            Lookahead::Single => {
                if !lines.is_empty() {
                    debug!("{} lines left unconsumed", lines.len());
                }
            }
        }
        root
    }

    /// Split `text` into classified lines, skipping blank ones.
    pub fn tokenize(text: &str, opts: ParseOptions) -> VecDeque<Line> {
        let mut lines = VecDeque::new();
        for record in text.split_inclusive('\n') {
            match record.strip_suffix('\n') {
                Some(raw) => push_line(&mut lines, raw),
                None if opts.keep_unterminated_line => push_line(&mut lines, record),
                None => debug!("dropping unterminated final line {record:?}"),
            }
        }
        lines
    }

    fn push_line(lines: &mut VecDeque<Line>, raw: &str) {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if line::is_blank(raw) {
            trace!("skipping blank line {raw:?}");
            return;
        }
        lines.push_back(Line::new(raw));
    }

    /* ----------------------------- Tree builder ----------------------------- */

    fn build(parent: &mut Node, lines: &mut VecDeque<Line>, lookahead: Lookahead) {
        while let Some(line) = lines.pop_front() {
            let offset = line.offset;
            let kind = match line.kind {
                LineKind::Item => NodeKind::Item,
                LineKind::Task => NodeKind::Task,
                LineKind::Annotation => {
                    // Annotation-only lines never open a node and end this level.
                    parent.annotations.extend(line.annotations);
                    return;
                }
            };
            let index = parent.children.len();
            parent.children.push(Node {
                raw_data: line.raw_data,
                kind,
                value: line.value,
                done: line.done,
                annotations: line.annotations,
                children: vec![],
            });
            let current = &mut parent.children[index];

            loop {
                let Some(next) = lines.front() else {
                    return;
                };
                match next.offset.cmp(&offset) {
                    Ordering::Greater => {
                        build(current, lines, lookahead);
                        if lookahead == Lookahead::Single {
                            break;
                        }
                    }
                    Ordering::Less => return,
                    Ordering::Equal => break,
                }
            }
        }
    }

    pub mod line {
        //! Classification of a single Margin line.

        use crate::core::{Annotation, Scalar};
        use log::debug;
        use nom::{
            IResult,
            bytes::complete::tag,
            character::complete::{anychar, char, digit1, one_of},
            combinator::{all_consuming, opt, recognize},
            sequence::{delimited, pair, tuple},
        };

        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum LineKind {
            Item,
            Task,
            /// The line holds nothing but bracketed annotations.
            Annotation,
        }

        /// One classified source line, consumed by the tree builder.
        #[derive(Debug, Clone, PartialEq)]
        pub struct Line {
            pub raw_data: String,
            /// Leading whitespace characters, tabs counted as one.
            pub offset: usize,
            pub kind: LineKind,
            pub done: bool,
            pub value: Option<String>,
            pub annotations: Vec<Annotation>,
        }

        impl Line {
            pub fn new(raw: &str) -> Self {
                let inner = strip_line(raw);
                let (kind, done, body) = if is_annotation_only(inner) {
                    (LineKind::Annotation, false, inner)
                } else if let Some((done, rest)) = detect_task(inner) {
                    (LineKind::Task, done, rest)
                } else {
                    (LineKind::Item, false, inner)
                };
                let (value, annotations) = extract_annotations(body);
                Self {
                    raw_data: raw.to_string(),
                    offset: detect_offset(raw),
                    kind,
                    done,
                    value,
                    annotations,
                }
            }
        }

        /// Bullet punctuation and spaces, ignored at both ends of a line. Tabs are not
        /// decoration: they stay in the inner text and only count towards the offset.
        pub fn is_decoration(c: char) -> bool {
            matches!(c, ' ' | '-' | '*' | ':' | '>' | '<' | '_')
        }

        /// Nothing but decoration and whitespace.
        pub fn is_blank(raw: &str) -> bool {
            raw.chars().all(|c| c.is_whitespace() || is_decoration(c))
        }

        pub fn strip_line(raw: &str) -> &str {
            raw.trim_matches(is_decoration)
        }

        pub fn detect_offset(raw: &str) -> usize {
            raw.chars().take_while(|c| c.is_ascii_whitespace()).count()
        }

        fn task_marker(i: &str) -> IResult<&str, char> {
            delimited(char('['), anychar, tag("] "))(i)
        }

        /// `[ ] rest` / `[x] rest`: returns the done flag and the rest of the line.
        pub fn detect_task(inner: &str) -> Option<(bool, &str)> {
            task_marker(inner)
                .ok()
                .map(|(rest, marker)| (marker != ' ', rest))
        }

        pub fn is_annotation_only(inner: &str) -> bool {
            inner.starts_with('[') && inner.ends_with(']')
        }

        /// Single-level bracket scan. Text outside brackets is the value; every `]`
        /// closes an annotation, even with nothing captured.
        pub fn extract_annotations(text: &str) -> (Option<String>, Vec<Annotation>) {
            let mut value = String::new();
            let mut pending: Option<String> = None;
            let mut annotations = Vec::new();

            for c in text.chars() {
                match c {
                    // No nesting: a second `[` only keeps capture mode open.
                    '[' => {
                        pending.get_or_insert_with(String::new);
                    }
                    ']' => {
                        let token = pending.take().unwrap_or_default();
                        annotations.push(structure_annotation(&token));
                    }
                    _ => match pending.as_mut() {
                        Some(token) => token.push(c),
                        None => value.push(c),
                    },
                }
            }
            if let Some(token) = pending {
                debug!("discarding unterminated annotation {token:?}");
            }

            let value = value.trim();
            let value = (!value.is_empty()).then(|| value.to_string());
            (value, annotations)
        }

        pub fn structure_annotation(token: &str) -> Annotation {
            match token.split_once(':') {
                Some((key, value)) => Annotation::keyed(key.trim(), coerce_scalar(value)),
                None => Annotation::anonymous(coerce_scalar(token)),
            }
        }

        /// Integer, then float, then the trimmed text itself.
        pub fn coerce_scalar(raw: &str) -> Scalar {
            let s = raw.trim();
            if let Ok((_, lit)) = all_consuming(integer_literal)(s) {
                if let Ok(i) = lit.parse::<i64>() {
                    return Scalar::Integer(i);
                }
            }
            if let Ok((_, lit)) = all_consuming(float_literal)(s) {
                if let Some(f) = lit.parse::<f64>().ok().filter(|f| f.is_finite()) {
                    return Scalar::Float(f);
                }
            }
            Scalar::Text(s.to_string())
        }

        fn integer_literal(i: &str) -> IResult<&str, &str> {
            recognize(pair(opt(char('-')), digit1))(i)
        }

        fn float_literal(i: &str) -> IResult<&str, &str> {
            recognize(tuple((
                opt(one_of("+-")),
                digit1,
                opt(pair(char('.'), digit1)),
                opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
            )))(i)
        }

    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::{Annotation, Scalar};
        use proptest::prelude::*;

        fn values(node: &Node) -> Vec<Option<&str>> {
            node.children.iter().map(Node::value).collect()
        }

        fn single() -> ParseOptions {
            ParseOptions {
                lookahead: Lookahead::Single,
                ..ParseOptions::default()
            }
        }

        #[test]
        fn empty_input_is_an_empty_root() {
            let r = parse("");
            assert!(r.is_root());
            assert!(r.children.is_empty());
            assert!(r.annotations.is_empty());
        }

        #[test]
        fn flat_list() {
            let r = parse("Shirt\nPants\nShoes\n");
            assert_eq!(r.children.len(), 3);
            assert_eq!(values(&r), [Some("Shirt"), Some("Pants"), Some("Shoes")]);
            assert!(r.children.iter().all(|c| c.children.is_empty()));
            assert!(r.children.iter().all(|c| c.annotations.is_empty()));
        }

        #[test]
        fn items_with_annotation_lines() {
            let text = "Shirt\n  [price: 29.95]\nPants\n  [price: 54.99]\nShoes\n  [price: 74.00]\n";
            for opts in [ParseOptions::default(), single()] {
                let r = parse_with_options(text, opts);
                assert_eq!(values(&r), [Some("Shirt"), Some("Pants"), Some("Shoes")]);
                let prices: Vec<_> = r
                    .children
                    .iter()
                    .map(|c| c.annotations.clone())
                    .collect();
                assert_eq!(
                    prices,
                    [
                        vec![Annotation::keyed("price", 29.95)],
                        vec![Annotation::keyed("price", 54.99)],
                        vec![Annotation::keyed("price", 74.0)],
                    ]
                );
                assert!(r.annotations.is_empty());
            }
        }

        #[test]
        fn list_of_tasks() {
            let r = parse("[*] Write a parser\n[*] Write tests\n[ ] Share with the world\n");
            assert_eq!(r.children.len(), 3);
            assert_eq!(r.children.iter().filter(|c| c.is_task()).count(), 3);
            assert_eq!(r.children.iter().filter(|c| c.is_done()).count(), 2);
            assert_eq!(r.children.iter().filter(|c| !c.is_done()).count(), 1);
        }

        #[test]
        fn blank_lines_are_ignored() {
            let r = parse("- a\n\n   \n-----\n* b\n");
            assert_eq!(values(&r), [Some("a"), Some("b")]);
        }

        #[test]
        fn deeper_lines_nest_under_previous_sibling() {
            let r = parse("Clothes\n  - Shirt\n  - Pants\n    * Belt\nFood\n");
            assert_eq!(values(&r), [Some("Clothes"), Some("Food")]);
            let clothes = &r.children[0];
            assert_eq!(values(clothes), [Some("Shirt"), Some("Pants")]);
            assert_eq!(values(&clothes.children[1]), [Some("Belt")]);
            assert!(r.children[1].children.is_empty());
        }

        #[test]
        fn multi_level_dedent_returns_to_matching_ancestor() {
            let r = parse("A\n  B\n    C\nD\n");
            assert_eq!(values(&r), [Some("A"), Some("D")]);
            assert_eq!(values(&r.children[0]), [Some("B")]);
            assert_eq!(values(&r.children[0].children[0]), [Some("C")]);
        }

        #[test]
        fn single_lookahead_keeps_pre_descent_comparison() {
            // After C's level returns, B's loop continues with D regardless of its offset.
            let r = parse_with_options("A\n  B\n    C\nD\n", single());
            assert_eq!(values(&r), [Some("A")]);
            assert_eq!(values(&r.children[0]), [Some("B"), Some("D")]);
        }

        #[test]
        fn jagged_dedent_stays_under_parent() {
            let r = parse("A\n    B\n  C\nD\n");
            assert_eq!(values(&r), [Some("A"), Some("D")]);
            assert_eq!(values(&r.children[0]), [Some("B"), Some("C")]);
        }

        #[test]
        fn consecutive_annotation_lines_attach_to_their_item() {
            let text = "Shirt\n  [size: M]\n  [color: blue]\nPants\n";
            let r = parse(text);
            assert_eq!(values(&r), [Some("Shirt"), Some("Pants")]);
            assert_eq!(
                r.children[0].annotations,
                vec![
                    Annotation::keyed("size", "M"),
                    Annotation::keyed("color", "blue")
                ]
            );
            assert!(r.annotations.is_empty());
        }

        #[test]
        fn consecutive_annotation_lines_cascade_with_single_lookahead() {
            // Historical behavior, asserted on purpose: the second annotation line lands on
            // the grandparent and ends the top level, so `Pants` is never read.
            let text = "Shirt\n  [size: M]\n  [color: blue]\nPants\n";
            let r = parse_with_options(text, single());
            assert_eq!(values(&r), [Some("Shirt")]);
            assert_eq!(
                r.children[0].annotations,
                vec![Annotation::keyed("size", "M")]
            );
            assert_eq!(r.annotations, vec![Annotation::keyed("color", "blue")]);
        }

        #[test]
        fn annotation_line_between_children_keeps_following_children() {
            let r = parse("A\n  B\n  [note]\n  C\n");
            assert_eq!(values(&r), [Some("A")]);
            let a = &r.children[0];
            assert_eq!(values(a), [Some("B"), Some("C")]);
            assert_eq!(a.annotations, vec![Annotation::anonymous("note")]);
        }

        #[test]
        fn leading_annotation_line_goes_to_root() {
            let r = parse("[title: Groceries]\nMilk\nEggs\n");
            assert_eq!(r.annotations, vec![Annotation::keyed("title", "Groceries")]);
            assert_eq!(values(&r), [Some("Milk"), Some("Eggs")]);

            let r = parse_with_options("[title: Groceries]\nMilk\nEggs\n", single());
            assert_eq!(r.annotations, vec![Annotation::keyed("title", "Groceries")]);
            assert!(r.children.is_empty());
        }

        #[test]
        fn inline_annotations_stay_on_node() {
            let r = parse("- [ ] [qty: 2] [store: corner] Buy milk\n");
            let milk = &r.children[0];
            assert!(milk.is_task());
            assert!(!milk.done);
            assert_eq!(milk.value(), Some("Buy milk"));
            assert_eq!(milk.annotations[0].value(), &Scalar::Integer(2));
            assert_eq!(milk.annotations[1].key(), Some("store"));
        }

        #[test]
        fn trailing_bracket_turns_task_into_annotation_line() {
            // Starts with `[` and ends with `]`: the whole line is annotation-only and its
            // text outside brackets is discarded.
            let r = parse("- [ ] Buy milk [qty: 2]\n");
            assert!(r.children.is_empty());
            assert_eq!(
                r.annotations,
                vec![Annotation::anonymous(""), Annotation::keyed("qty", 2)]
            );
        }

        #[test]
        fn unterminated_final_line_is_dropped() {
            let r = parse("Shirt\nPants");
            assert_eq!(values(&r), [Some("Shirt")]);

            let keep = ParseOptions {
                keep_unterminated_line: true,
                ..ParseOptions::default()
            };
            let r = parse_with_options("Shirt\nPants", keep);
            assert_eq!(values(&r), [Some("Shirt"), Some("Pants")]);
        }

        #[test]
        fn crlf_line_endings() {
            let r = parse("Shirt\r\n  Collar\r\nPants\r\n");
            assert_eq!(values(&r), [Some("Shirt"), Some("Pants")]);
            assert_eq!(r.children[0].raw_data, "Shirt");
            assert_eq!(values(&r.children[0]), [Some("Collar")]);
        }

        #[test]
        fn tabs_count_as_single_offset_characters() {
            // One tab is shallower than two spaces.
            let r = parse("A\n  B\n\tC\n");
            assert_eq!(values(&r.children[0]), [Some("B"), Some("C")]);
            assert_eq!(r.children[0].children[1].raw_data, "\tC");
        }

        #[test]
        fn tab_indented_annotation_becomes_a_child_item() {
            let r = parse("Shirt\n\t[price: 1]\n");
            assert_eq!(values(&r), [Some("Shirt")]);
            let shirt = &r.children[0];
            assert!(shirt.annotations.is_empty());
            assert_eq!(shirt.children.len(), 1);
            assert_eq!(shirt.children[0].value(), None);
            assert_eq!(
                shirt.children[0].annotations,
                vec![Annotation::keyed("price", 1)]
            );
        }

        #[test]
        fn tokenizer_skips_blank_records() {
            let lines = tokenize("a\n - \n\n  b\n", ParseOptions::default());
            let offsets: Vec<_> = lines.iter().map(|l| l.offset).collect();
            assert_eq!(offsets, [0, 2]);
        }

        fn outline() -> impl Strategy<Value = String> {
            prop::collection::vec("[ \t]{0,4}[-*]?[ ]?(\\[[ x]\\] )?[a-z0-9:\\[\\] ]{0,10}", 0..16)
                .prop_map(|lines| lines.into_iter().map(|l| l + "\n").collect())
        }

        proptest! {
            #[test]
            fn reparsing_is_deterministic(text in outline()) {
                prop_assert_eq!(parse(&text), parse(&text));
            }

            #[test]
            fn rescan_consumes_every_line(text in outline()) {
                let lines = tokenize(&text, ParseOptions::default());
                let nodes = lines.iter().filter(|l| l.kind != LineKind::Annotation).count();
                prop_assert_eq!(parse(&text).descendant_count(), nodes);
            }

            #[test]
            fn decoration_only_lines_never_contribute(
                lines in prop::collection::vec("[ \t\\-*:<>_]{0,8}", 0..12)
            ) {
                let text: String = lines.into_iter().map(|l| l + "\n").collect();
                let r = parse(&text);
                prop_assert!(r.children.is_empty());
                prop_assert!(r.annotations.is_empty());
            }
        }
    }
}

pub mod format {
    //! Margin text rendering.

    use super::core::*;

    const INDENT: &str = "  ";

    /// Render the children (and annotations) of `root` as Margin text.
    pub fn format_margin(root: &Node) -> String {
        let mut out = String::new();
        if !root.annotations.is_empty() {
            let header: Vec<String> = root.annotations.iter().map(|a| a.to_string()).collect();
            out.push_str(&header.join(" "));
            out.push('\n');
        }
        for child in &root.children {
            format_node(&mut out, child, 0);
        }
        out
    }

    fn format_node(out: &mut String, node: &Node, depth: usize) {
        out.push_str(&INDENT.repeat(depth));
        out.push_str(&render_line(node));
        out.push('\n');
        for child in &node.children {
            format_node(out, child, depth + 1);
        }
    }

    // A line that starts with `[` and ends with `]` reads back as annotation-only, so
    // task annotations go between the marker and the value.
    fn render_line(node: &Node) -> String {
        let mut parts = Vec::new();
        let annotations = node.annotations.iter().map(|a| a.to_string());
        if node.is_task() {
            parts.push(if node.done { "[x]" } else { "[ ]" }.to_string());
            parts.extend(annotations);
            parts.extend(node.value().map(str::to_string));
        } else {
            parts.extend(node.value().map(str::to_string));
            parts.extend(annotations);
        }
        parts.join(" ")
    }

}

pub mod document {
    //! Document façade: picks an input format and projects the tree to JSON or Margin.

    use crate::core::{MarginError, Node, NodeKind};
    use crate::format::format_margin;
    use crate::parser::{ParseOptions, parse_with_options};
    use log::debug;
    use std::{fmt, fs, path::Path, str::FromStr};

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub enum Format {
        #[default]
        Margin,
        Json,
    }

    impl Format {
        /// `.json` files are JSON, anything else is read as Margin.
        pub fn from_path(path: &Path) -> Self {
            match path.extension() {
                Some(ext) if ext.eq_ignore_ascii_case("json") => Format::Json,
                _ => Format::Margin,
            }
        }
    }

    impl FromStr for Format {
        type Err = MarginError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            match s {
                "margin" => Ok(Format::Margin),
                "json" => Ok(Format::Json),
                other => Err(MarginError::UnknownFormat(other.to_string())),
            }
        }
    }

    impl fmt::Display for Format {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(match self {
                Format::Margin => "margin",
                Format::Json => "json",
            })
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct Document {
        root: Node,
    }

    impl Default for Document {
        fn default() -> Self {
            Self { root: Node::root() }
        }
    }

    impl Document {
        pub fn new(input: &str, format: Format) -> Result<Self, MarginError> {
            Self::with_options(input, format, ParseOptions::default())
        }

        /// `opts` only affects Margin input.
        pub fn with_options(
            input: &str,
            format: Format,
            opts: ParseOptions,
        ) -> Result<Self, MarginError> {
            match format {
                Format::Margin => Ok(Self::from_margin_with_options(input, opts)),
                Format::Json => Self::from_json(input),
            }
        }

        pub fn from_margin(input: &str) -> Self {
            Self::from_margin_with_options(input, ParseOptions::default())
        }

        pub fn from_margin_with_options(input: &str, opts: ParseOptions) -> Self {
            Self {
                root: parse_with_options(input, opts),
            }
        }

        /// The top-level JSON object always becomes the root.
        pub fn from_json(input: &str) -> Result<Self, MarginError> {
            let mut root: Node = serde_json::from_str(input)?;
            root.kind = NodeKind::Root;
            root.done = false;
            Ok(Self { root })
        }

        /// Read a file, choosing the format from its extension.
        pub fn open(path: &Path) -> Result<Self, MarginError> {
            Self::open_with_options(path, None, ParseOptions::default())
        }

        pub fn open_with_options(
            path: &Path,
            format: Option<Format>,
            opts: ParseOptions,
        ) -> Result<Self, MarginError> {
            let text = fs::read_to_string(path).map_err(|source| MarginError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let format = format.unwrap_or_else(|| Format::from_path(path));
            debug!("reading {:?} as {}", path, format);
            Self::with_options(&text, format, opts)
        }

        pub fn root(&self) -> &Node {
            &self.root
        }

        pub fn into_root(self) -> Node {
            self.root
        }

        pub fn to_json(&self, pretty: bool) -> Result<String, MarginError> {
            let json = if pretty {
                serde_json::to_string_pretty(&self.root)?
            } else {
                serde_json::to_string(&self.root)?
            };
            Ok(json)
        }

        pub fn to_margin(&self) -> String {
            format_margin(&self.root)
        }
    }

}

pub use crate::core::{Annotation, MarginError, Node, NodeKind, Scalar};
pub use document::{Document, Format};
pub use format::format_margin;
pub use parser::{Lookahead, ParseOptions, parse, parse_with_options};
