//! Statement-level rewriting of one parsed Go source file.
//!
//! The walk mirrors the shape of a Go block: control-flow statements are
//! recursed into and re-emitted untouched, while the five traced constructs
//! (channel make via `var` or assignment, `go`, send, `close`, range over a
//! channel) produce splice edits. Exactly one case applies per statement.
//!
//! Channel identity is purely syntactic: a name is "a channel" inside a
//! function when it was a channel-typed parameter or the target of an
//! observed `make(chan ...)`. Aliasing and cross-function identity are out of
//! scope; unsupported shapes are left untouched.

use crate::edits::Edit;
use std::collections::HashSet;
use tree_sitter::Node;

const WRAP_FN: &str = "gtrace.Wrap";
const MAKE_FN: &str = "gtrace.WrappedMakeChan";
const SEND_FN: &str = "gtrace.WrappedSend";
const RECV_FN: &str = "gtrace.WrappedReceive";
const CLOSE_FN: &str = "gtrace.WrappedClose";

pub(crate) struct Rewriter<'s> {
    source: &'s str,
    rel: String,
    pub edits: Vec<Edit>,
    pub modified: bool,
}

impl<'s> Rewriter<'s> {
    pub fn new(source: &'s str, rel: String) -> Self {
        Self {
            source,
            rel,
            edits: Vec::new(),
            modified: false,
        }
    }

    fn text(&self, node: Node) -> &'s str {
        &self.source[node.byte_range()]
    }

    fn line(&self, node: Node) -> usize {
        node.start_position().row + 1
    }

    fn site(&self, node: Node) -> String {
        format!("{}:{}", self.rel, self.line(node))
    }

    /// Leading whitespace of the line the node starts on.
    fn line_indent(&self, node: Node) -> &'s str {
        let bytes = self.source.as_bytes();
        let mut line_start = node.start_byte();
        while line_start > 0 && bytes[line_start - 1] != b'\n' {
            line_start -= 1;
        }
        let line = &self.source[line_start..node.start_byte()];
        let indent_len = line
            .char_indices()
            .find(|&(_, c)| c != ' ' && c != '\t')
            .map_or(line.len(), |(i, _)| i);
        &line[..indent_len]
    }

    /// Entry point: rewrite one function body.
    pub fn process_function(&mut self, decl: Node) {
        let Some(body) = decl.child_by_field_name("body") else {
            return;
        };
        let mut channels = self.parameter_channels(decl);
        self.process_block(body, &mut channels);
    }

    /// Channel-typed parameter names seed the tracked-channel set.
    fn parameter_channels(&self, decl: Node) -> HashSet<String> {
        let mut channels = HashSet::new();
        let Some(params) = decl.child_by_field_name("parameters") else {
            return channels;
        };
        let mut cursor = params.walk();
        for param in params.named_children(&mut cursor) {
            if param.kind() != "parameter_declaration" {
                continue;
            }
            let is_chan = param
                .child_by_field_name("type")
                .is_some_and(|ty| ty.kind() == "channel_type");
            if !is_chan {
                continue;
            }
            let mut names = param.walk();
            for name in param.children_by_field_name("name", &mut names) {
                channels.insert(self.text(name).to_string());
            }
        }
        channels
    }

    fn process_block(&mut self, block: Node, channels: &mut HashSet<String>) {
        let stmts = named_non_comment_children(block);
        self.process_statements(&stmts, channels);
    }

    fn process_statements(&mut self, stmts: &[Node], channels: &mut HashSet<String>) {
        for &stmt in stmts {
            match stmt.kind() {
                // Recurse-only cases: the statement keeps its identity, only
                // nested blocks are rewritten.
                "for_statement" => {
                    if self.try_range_receive(stmt, channels) {
                        continue;
                    }
                    if let Some(body) = stmt.child_by_field_name("body") {
                        self.process_block(body, channels);
                    }
                }
                "if_statement" => self.process_if(stmt, channels),
                "expression_switch_statement" | "type_switch_statement" | "select_statement" => {
                    self.process_clauses(stmt, channels);
                }
                "block" => self.process_block(stmt, channels),

                // Rewrite cases.
                "var_declaration" => self.rewrite_var_decl(stmt, channels),
                "short_var_declaration" | "assignment_statement" => {
                    self.rewrite_assignment(stmt, channels);
                }
                "go_statement" => self.rewrite_go(stmt),
                "send_statement" => self.rewrite_send(stmt),
                "expression_statement" => self.rewrite_close(stmt),

                _ => {}
            }
        }
    }

    fn process_if(&mut self, stmt: Node, channels: &mut HashSet<String>) {
        if let Some(consequence) = stmt.child_by_field_name("consequence") {
            self.process_block(consequence, channels);
        }
        if let Some(alternative) = stmt.child_by_field_name("alternative") {
            match alternative.kind() {
                "block" => self.process_block(alternative, channels),
                // `else if` keeps the chain; recurse along it.
                "if_statement" => self.process_if(alternative, channels),
                _ => {}
            }
        }
    }

    /// Case bodies of switch / type-switch / select. The clause head (case
    /// expressions, bound types, or a select communication operand) sits
    /// before the `:` and is never rewritten.
    fn process_clauses(&mut self, stmt: Node, channels: &mut HashSet<String>) {
        let mut cursor = stmt.walk();
        let clauses: Vec<Node> = stmt
            .named_children(&mut cursor)
            .filter(|n| {
                matches!(
                    n.kind(),
                    "expression_case" | "type_case" | "communication_case" | "default_case"
                )
            })
            .collect();
        for clause in clauses {
            let stmts = clause_statements(clause);
            self.process_statements(&stmts, channels);
        }
    }

    /// Rule 1: `var` declarations whose initializer is `make(chan ...)` keep the
    /// declaration and gain a pass-through wrapper assignment per match.
    fn rewrite_var_decl(&mut self, stmt: Node, channels: &mut HashSet<String>) {
        for spec in collect_kind(stmt, "var_spec") {
            let mut names_cursor = spec.walk();
            let names: Vec<Node> = spec
                .children_by_field_name("name", &mut names_cursor)
                .collect();
            let Some(values) = spec.child_by_field_name("value") else {
                continue;
            };
            for (j, value) in named_non_comment_children(values).into_iter().enumerate() {
                if is_make_chan(self.source, value) && j < names.len() {
                    let name = self.text(names[j]).to_string();
                    self.wrap_make(stmt, value, &name, channels);
                }
            }
        }
    }

    /// Rule 2: assignments and short declarations; each right-hand position is
    /// tested independently, so several wrappers may follow one statement.
    fn rewrite_assignment(&mut self, stmt: Node, channels: &mut HashSet<String>) {
        let Some(left) = stmt.child_by_field_name("left") else {
            return;
        };
        let Some(right) = stmt.child_by_field_name("right") else {
            return;
        };
        let targets = named_non_comment_children(left);
        for (j, rhs) in named_non_comment_children(right).into_iter().enumerate() {
            if is_make_chan(self.source, rhs) && j < targets.len() {
                let name = self.text(targets[j]).to_string();
                self.wrap_make(stmt, rhs, &name, channels);
            }
        }
    }

    fn wrap_make(&mut self, stmt: Node, value: Node, name: &str, channels: &mut HashSet<String>) {
        // A blank target cannot be re-read by the wrapper.
        if name == "_" {
            return;
        }
        channels.insert(name.to_string());
        // Idempotence: the previous run already appended this wrapper.
        if next_statement(stmt).is_some_and(|next| is_make_wrapper_for(self.source, next, name)) {
            return;
        }
        let site = self.site(value);
        let indent = self.line_indent(stmt);
        self.edits.push(Edit::insert(
            stmt.end_byte(),
            format!("\n{indent}{name} = {MAKE_FN}(\"{site}\", {name})"),
        ));
        self.modified = true;
    }

    /// Rule 3: `go f(args...)` becomes `go gtrace.Wrap(f, args...)`.
    fn rewrite_go(&mut self, stmt: Node) {
        let Some(call) = first_named_non_comment(stmt) else {
            return;
        };
        if call.kind() != "call_expression" {
            return;
        }
        let Some(function) = call.child_by_field_name("function") else {
            return;
        };
        let fn_text = self.text(function);
        if fn_text == WRAP_FN {
            return;
        }
        let Some(args) = call.child_by_field_name("arguments") else {
            return;
        };
        // Raw text between the parentheses keeps variadic `...` and multi-line
        // argument formatting intact.
        let inner = self.source[args.start_byte() + 1..args.end_byte() - 1].trim();
        let replacement = if inner.is_empty() {
            format!("{WRAP_FN}({fn_text})")
        } else {
            format!("{WRAP_FN}({fn_text}, {inner})")
        };
        self.edits
            .push(Edit::replace(call.start_byte(), call.end_byte(), replacement));
        self.modified = true;
    }

    /// Rule 4: `ch <- v` becomes `gtrace.WrappedSend(ch, v, "<site>")`.
    fn rewrite_send(&mut self, stmt: Node) {
        let Some(channel) = stmt.child_by_field_name("channel") else {
            return;
        };
        let Some(value) = stmt.child_by_field_name("value") else {
            return;
        };
        let replacement = format!(
            "{SEND_FN}({}, {}, \"{}\")",
            self.text(channel),
            self.text(value),
            self.site(stmt)
        );
        self.edits
            .push(Edit::replace(stmt.start_byte(), stmt.end_byte(), replacement));
        self.modified = true;
    }

    /// Rule 5: `close(ch)` becomes `gtrace.WrappedClose(ch, "<site>")`.
    fn rewrite_close(&mut self, stmt: Node) {
        let Some(call) = first_named_non_comment(stmt) else {
            return;
        };
        if call.kind() != "call_expression" {
            return;
        }
        let is_close = call
            .child_by_field_name("function")
            .is_some_and(|f| f.kind() == "identifier" && self.text(f) == "close");
        if !is_close {
            return;
        }
        let Some(args) = call.child_by_field_name("arguments") else {
            return;
        };
        let arg_nodes = named_non_comment_children(args);
        if arg_nodes.len() != 1 {
            return;
        }
        let replacement = format!(
            "{CLOSE_FN}({}, \"{}\")",
            self.text(arg_nodes[0]),
            self.site(call)
        );
        self.edits
            .push(Edit::replace(call.start_byte(), call.end_byte(), replacement));
        self.modified = true;
    }

    /// Rule 6: a range over a tracked channel gets a receive probe prepended
    /// to its (already recursed) body; the loop itself is preserved.
    fn try_range_receive(&mut self, stmt: Node, channels: &mut HashSet<String>) -> bool {
        let Some(clause) = child_of_kind(stmt, "range_clause") else {
            return false;
        };
        let Some(operand) = clause.child_by_field_name("right") else {
            return false;
        };
        let operand_text = self.text(operand).to_string();
        if !channels.contains(&operand_text) {
            return false;
        }
        let Some(body) = stmt.child_by_field_name("body") else {
            return false;
        };
        self.process_block(body, channels);

        // Idempotence: probe already present from a previous run.
        if first_named_non_comment(body)
            .is_some_and(|first| is_call_statement_to(self.source, first, RECV_FN))
        {
            return true;
        }

        let indent = format!("{}\t", self.line_indent(stmt));
        self.edits.push(Edit::insert(
            body.start_byte() + 1,
            format!("\n{indent}{RECV_FN}({operand_text}, \"{}\")", self.site(stmt)),
        ));
        self.modified = true;
        true
    }
}

fn named_non_comment_children(node: Node) -> Vec<Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|n| n.kind() != "comment")
        .collect()
}

fn first_named_non_comment(node: Node) -> Option<Node> {
    named_non_comment_children(node).into_iter().next()
}

fn child_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).find(|n| n.kind() == kind)
}

/// Statements of a case clause: the named children after the `:` token.
fn clause_statements(clause: Node) -> Vec<Node> {
    let mut cursor = clause.walk();
    let mut seen_colon = false;
    let mut stmts = Vec::new();
    for child in clause.children(&mut cursor) {
        if !seen_colon {
            if child.kind() == ":" {
                seen_colon = true;
            }
            continue;
        }
        if child.is_named() && child.kind() != "comment" {
            stmts.push(child);
        }
    }
    stmts
}

/// Transitive named children of the given kind (e.g. the `var_spec`s of a
/// grouped declaration, or the `import_spec`s of an import block).
pub(crate) fn collect_kind<'t>(node: Node<'t>, kind: &str) -> Vec<Node<'t>> {
    let mut found = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == kind {
            found.push(child);
        } else {
            found.extend(collect_kind(child, kind));
        }
    }
    found
}

fn next_statement(stmt: Node) -> Option<Node> {
    let mut next = stmt.next_named_sibling();
    while let Some(n) = next {
        if n.kind() != "comment" {
            return Some(n);
        }
        next = n.next_named_sibling();
    }
    None
}

/// `make(chan ...)`: a call to the `make` builtin whose first argument is a
/// channel type. The grammar aliases `make` to an identifier in function
/// position.
fn is_make_chan(source: &str, expr: Node) -> bool {
    if expr.kind() != "call_expression" {
        return false;
    }
    let is_make = expr
        .child_by_field_name("function")
        .is_some_and(|f| f.kind() == "identifier" && &source[f.byte_range()] == "make");
    if !is_make {
        return false;
    }
    let Some(args) = expr.child_by_field_name("arguments") else {
        return false;
    };
    first_named_non_comment(args).is_some_and(|first| first.kind() == "channel_type")
}

fn is_make_wrapper_for(source: &str, stmt: Node, name: &str) -> bool {
    if stmt.kind() != "assignment_statement" {
        return false;
    }
    let left_matches = stmt
        .child_by_field_name("left")
        .is_some_and(|left| source[left.byte_range()].trim() == name);
    if !left_matches {
        return false;
    }
    stmt.child_by_field_name("right")
        .and_then(first_named_non_comment)
        .is_some_and(|rhs| is_call_to(source, rhs, MAKE_FN))
}

fn is_call_to(source: &str, expr: Node, callee: &str) -> bool {
    expr.kind() == "call_expression"
        && expr
            .child_by_field_name("function")
            .is_some_and(|f| &source[f.byte_range()] == callee)
}

fn is_call_statement_to(source: &str, stmt: Node, callee: &str) -> bool {
    stmt.kind() == "expression_statement"
        && first_named_non_comment(stmt).is_some_and(|expr| is_call_to(source, expr, callee))
}
