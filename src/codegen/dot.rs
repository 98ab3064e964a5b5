use std::fmt::Write as _;

use crate::ast::*;

const EXPRESSION_COLOR: &str = "#CCE6FF";
const LITERAL_COLOR: &str = "#CCFFCC";
const OPERATOR_COLOR: &str = "#FFCCCC";
const STATEMENT_COLOR: &str = "#FFF2CC";
const EMPTY_COLOR: &str = "#CC0000";

/// Renders an AST as a Graphviz digraph. Node ids are assigned in pre-order,
/// each edge is written just before the subtree it points at.
pub fn render(ast: &Ast) -> String {
    let mut w = DotWriter { out: String::new(), next: 0 };
    w.out.push_str("digraph ast {\n");
    w.out.push_str("    graph [rankdir=LR];\n");
    w.out.push_str("    node [shape=box];\n");
    match ast {
        Ast::Empty => {
            w.node("Empty", EMPTY_COLOR);
        }
        Ast::Expression(e) => {
            let root = w.node("Expression", EXPRESSION_COLOR);
            w.edge_to_next(root, "expression");
            w.expr(e);
        }
        Ast::Stmts(stmts) => {
            let root = w.node("Statements", STATEMENT_COLOR);
            for s in stmts {
                w.edge_to_next(root, "statement");
                w.stmt(s);
            }
        }
    }
    w.out.push_str("}\n");
    w.out
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

struct DotWriter {
    out: String,
    next: usize,
}

impl DotWriter {
    fn node(&mut self, label: &str, color: &str) -> usize {
        let id = self.next;
        self.next += 1;
        let _ = writeln!(
            self.out,
            "    {id} [label=\"{}\", fillcolor=\"{color}\", style=\"filled\"];",
            escape(label)
        );
        id
    }

    fn edge_to_next(&mut self, from: usize, label: &str) {
        let _ = writeln!(self.out, "    {from} -> {} [label=\"{label}\"];", self.next);
    }

    /// Edge plus a leaf node in one go.
    fn leaf(&mut self, from: usize, edge: &str, label: &str, color: &str) {
        self.edge_to_next(from, edge);
        self.node(label, color);
    }

    fn expr(&mut self, e: &Expr) {
        match e {
            Expr::Literal { value, .. } => {
                let root = self.node("Literal", EXPRESSION_COLOR);
                self.leaf(root, "value", &value.to_string(), LITERAL_COLOR);
            }
            Expr::Ident { name, .. } => {
                let root = self.node("Identifier", EXPRESSION_COLOR);
                self.leaf(root, "name", name, LITERAL_COLOR);
            }
            Expr::Unary { op, operand, .. } => {
                let root = self.node("UnaryOp", EXPRESSION_COLOR);
                self.leaf(root, "type", op.symbol(), OPERATOR_COLOR);
                self.edge_to_next(root, "expression");
                self.expr(operand);
            }
            Expr::Binary { op, left, right, .. } => {
                let root = self.node("BinaryOp", EXPRESSION_COLOR);
                self.edge_to_next(root, "left_expression");
                self.expr(left);
                self.leaf(root, "type", op.symbol(), OPERATOR_COLOR);
                self.edge_to_next(root, "right_expression");
                self.expr(right);
            }
            Expr::Ternary { condition, then_branch, else_branch, .. } => {
                let root = self.node("TernaryOp", EXPRESSION_COLOR);
                self.edge_to_next(root, "condition");
                self.expr(condition);
                self.edge_to_next(root, "true_expression");
                self.expr(then_branch);
                self.edge_to_next(root, "false_expression");
                self.expr(else_branch);
            }
        }
    }

    fn body(&mut self, parent: usize, edge: &str, stmts: &[Stmt]) {
        self.edge_to_next(parent, edge);
        let block = self.node("Block", STATEMENT_COLOR);
        for s in stmts {
            self.edge_to_next(block, "statement");
            self.stmt(s);
        }
    }

    fn stmt(&mut self, s: &Stmt) {
        match s {
            Stmt::Let { name, ty, value, .. } => {
                let root = self.node("Let", STATEMENT_COLOR);
                self.leaf(root, "name", name, LITERAL_COLOR);
                if let Some(ty) = ty {
                    self.leaf(root, "type", &type_name(ty), LITERAL_COLOR);
                }
                if let Some(value) = value {
                    self.edge_to_next(root, "value");
                    self.expr(value);
                }
            }
            Stmt::Assign { name, op, value, .. } => {
                let root = self.node("Assign", STATEMENT_COLOR);
                self.leaf(root, "name", name, LITERAL_COLOR);
                self.leaf(root, "type", op.symbol(), OPERATOR_COLOR);
                self.edge_to_next(root, "value");
                self.expr(value);
            }
            Stmt::If { branches, else_body, .. } => {
                let root = self.node("If", STATEMENT_COLOR);
                for branch in branches {
                    self.edge_to_next(root, "condition");
                    self.expr(&branch.condition);
                    self.body(root, "body", &branch.body);
                }
                if let Some(else_body) = else_body {
                    self.body(root, "else", else_body);
                }
            }
            Stmt::While { condition, body, .. } => {
                let root = self.node("While", STATEMENT_COLOR);
                self.edge_to_next(root, "condition");
                self.expr(condition);
                self.body(root, "body", body);
            }
            Stmt::For { var, start, end, step, body, .. } => {
                let root = self.node("For", STATEMENT_COLOR);
                self.leaf(root, "variable", var, LITERAL_COLOR);
                self.edge_to_next(root, "start");
                self.expr(start);
                self.edge_to_next(root, "end");
                self.expr(end);
                if let Some(step) = step {
                    self.edge_to_next(root, "step");
                    self.expr(step);
                }
                self.body(root, "body", body);
            }
            Stmt::Struct { name, members, .. } => {
                let root = self.node("Struct", STATEMENT_COLOR);
                self.leaf(root, "name", name, LITERAL_COLOR);
                for m in members {
                    let label = format!("{}: {}", m.name, type_name(&m.ty));
                    self.leaf(root, "member", &label, LITERAL_COLOR);
                }
            }
            Stmt::Expr(e) => {
                let root = self.node("Expression", EXPRESSION_COLOR);
                self.edge_to_next(root, "expression");
                self.expr(e);
            }
        }
    }
}

fn type_name(ty: &Type) -> String {
    match ty {
        Type::I32 => "i32".into(),
        Type::F64 => "f64".into(),
        Type::Bool => "bool".into(),
        Type::Char => "char".into(),
        Type::String => "string".into(),
        Type::Named(n) => n.clone(),
    }
}
