use std::fmt;

/// Surface-language types. Expression nodes carry one after semantic
/// analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    Int,
    Uint,
    Char,
    Bool,
    Str,
    IntArray,
    Void,
}

impl Ty {
    /// Parameter tag used in mangled function labels.
    pub fn mangle_tag(self) -> &'static str {
        match self {
            Ty::Int => "i",
            Ty::Uint => "u",
            Ty::Char => "c",
            Ty::Bool => "b",
            Ty::Str => "s",
            Ty::IntArray => "ai",
            Ty::Void => "v",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Ty::Int | Ty::Uint | Ty::Char)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Ty::Int => "int",
            Ty::Uint => "uint",
            Ty::Char => "char",
            Ty::Bool => "bool",
            Ty::Str => "string",
            Ty::IntArray => "int[]",
            Ty::Void => "void",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Ne | BinOp::Gt | BinOp::Ge | BinOp::Lt | BinOp::Le)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
}

/// An expression with its resolved type slot. The parser leaves `ty`
/// empty; semantic analysis fills it in.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Option<Ty>,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Expr {
        Expr { kind, ty: None }
    }

    pub fn ty(&self) -> Ty {
        self.ty.expect("expression type not resolved")
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Number(i64),
    CharLit(char),
    StrLit(String),
    BoolLit(bool),
    Void,
    IntArray(Vec<Expr>),
    Ident(String),
    ArrayGet {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct Param {
    pub ty: Ty,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub ret: Ty,
    pub name: String,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    VarDecl {
        ty: Ty,
        name: String,
        value: Expr,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    Break,
    Return(Option<Expr>),
    Expr(Expr),
    Function(Function),
}

pub type Program = Vec<Stmt>;

/// Indented tree rendering for `--viz`.
pub fn dump_program(program: &Program) -> String {
    let mut out = String::new();
    for stmt in program {
        dump_stmt(stmt, 0, &mut out);
    }
    out
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn dump_stmt(stmt: &Stmt, depth: usize, out: &mut String) {
    indent(depth, out);
    match stmt {
        Stmt::VarDecl { ty, name, value } => {
            out.push_str(&format!("VarDecl {ty} {name}\n"));
            dump_expr(value, depth + 1, out);
        }
        Stmt::Assign { target, value } => {
            out.push_str("Assign\n");
            dump_expr(target, depth + 1, out);
            dump_expr(value, depth + 1, out);
        }
        Stmt::If {
            cond,
            then_branch,
            else_branch,
        } => {
            out.push_str("If\n");
            dump_expr(cond, depth + 1, out);
            for s in then_branch {
                dump_stmt(s, depth + 1, out);
            }
            if let Some(else_branch) = else_branch {
                indent(depth, out);
                out.push_str("Else\n");
                for s in else_branch {
                    dump_stmt(s, depth + 1, out);
                }
            }
        }
        Stmt::While { cond, body } => {
            out.push_str("While\n");
            dump_expr(cond, depth + 1, out);
            for s in body {
                dump_stmt(s, depth + 1, out);
            }
        }
        Stmt::Break => out.push_str("Break\n"),
        Stmt::Return(value) => {
            out.push_str("Return\n");
            if let Some(value) = value {
                dump_expr(value, depth + 1, out);
            }
        }
        Stmt::Expr(expr) => {
            out.push_str("ExprStmt\n");
            dump_expr(expr, depth + 1, out);
        }
        Stmt::Function(func) => {
            let params: Vec<String> = func
                .params
                .iter()
                .map(|p| format!("{} {}", p.ty, p.name))
                .collect();
            out.push_str(&format!(
                "Function {} {}({})\n",
                func.ret,
                func.name,
                params.join(", ")
            ));
            for s in &func.body {
                dump_stmt(s, depth + 1, out);
            }
        }
    }
}

fn dump_expr(expr: &Expr, depth: usize, out: &mut String) {
    indent(depth, out);
    match &expr.kind {
        ExprKind::Number(n) => out.push_str(&format!("Number {n}\n")),
        ExprKind::CharLit(c) => out.push_str(&format!("Char {c:?}\n")),
        ExprKind::StrLit(s) => out.push_str(&format!("String {s:?}\n")),
        ExprKind::BoolLit(b) => out.push_str(&format!("Bool {b}\n")),
        ExprKind::Void => out.push_str("Void\n"),
        ExprKind::IntArray(values) => {
            out.push_str("IntArray\n");
            for v in values {
                dump_expr(v, depth + 1, out);
            }
        }
        ExprKind::Ident(name) => out.push_str(&format!("Ident {name}\n")),
        ExprKind::ArrayGet { object, index } => {
            out.push_str("ArrayGet\n");
            dump_expr(object, depth + 1, out);
            dump_expr(index, depth + 1, out);
        }
        ExprKind::MethodCall { object, method, args } => {
            out.push_str(&format!("MethodCall .{method}\n"));
            dump_expr(object, depth + 1, out);
            for a in args {
                dump_expr(a, depth + 1, out);
            }
        }
        ExprKind::Call { name, args } => {
            out.push_str(&format!("Call {name}\n"));
            for a in args {
                dump_expr(a, depth + 1, out);
            }
        }
        ExprKind::Binary { op, left, right } => {
            out.push_str(&format!("Binary {}\n", op.symbol()));
            dump_expr(left, depth + 1, out);
            dump_expr(right, depth + 1, out);
        }
        ExprKind::Unary { op, operand } => {
            out.push_str(&format!("Unary {op:?}\n"));
            dump_expr(operand, depth + 1, out);
        }
    }
}
