//! Semantic analysis: scope and overload checking, and resolved-type
//! annotation on every expression node. The code generator relies on
//! the annotations and performs no checking of its own.

use anyhow::{anyhow, Result};
use std::collections::HashMap;

use crate::ast::{BinOp, Expr, ExprKind, Function, Program, Stmt, Ty, UnOp};

/// Signatures of the reserved `in` intrinsic: the return type is picked
/// from the assignment context.
const IN_SIGS: &[(&[Ty], Ty)] = &[
    (&[], Ty::Int),
    (&[], Ty::Uint),
    (&[], Ty::Char),
    (&[], Ty::Str),
    (&[Ty::Int], Ty::Str),
    (&[Ty::Int], Ty::IntArray),
];

const OUT_PARAM_TYPES: &[Ty] = &[Ty::Int, Ty::Uint, Ty::Char, Ty::Str, Ty::IntArray];

#[derive(Debug, Clone)]
pub struct FnSig {
    pub params: Vec<Ty>,
    pub ret: Ty,
}

struct FnCtx {
    params: HashMap<String, Ty>,
    locals: HashMap<String, Ty>,
    ret: Ty,
}

pub struct Analyzer {
    globals: HashMap<String, Ty>,
    functions: HashMap<String, Vec<FnSig>>,
    current: Option<FnCtx>,
    loop_depth: usize,
}

pub fn compatible(target: Ty, value: Ty) -> bool {
    target == value || (target.is_numeric() && value.is_numeric())
}

fn truthy(ty: Ty) -> bool {
    ty == Ty::Bool || ty.is_numeric()
}

/// Resolves a user-function overload: exact parameter match first, then
/// a unique numeric-compatible one.
pub fn resolve_overload<'a>(overloads: &'a [FnSig], args: &[Ty], name: &str) -> Result<&'a FnSig> {
    if let Some(sig) = overloads.iter().find(|sig| sig.params == args) {
        return Ok(sig);
    }
    let mut candidates = overloads.iter().filter(|sig| {
        sig.params.len() == args.len()
            && sig.params.iter().zip(args).all(|(p, a)| compatible(*p, *a))
    });
    match (candidates.next(), candidates.next()) {
        (Some(sig), None) => Ok(sig),
        (Some(_), Some(_)) => Err(anyhow!("ambiguous call to '{name}'")),
        (None, _) => Err(anyhow!(
            "no matching overload for '{name}({})'",
            args.iter().map(Ty::to_string).collect::<Vec<_>>().join(", ")
        )),
    }
}

impl Analyzer {
    pub fn new() -> Analyzer {
        Analyzer {
            globals: HashMap::new(),
            functions: HashMap::new(),
            current: None,
            loop_depth: 0,
        }
    }

    pub fn analyze(&mut self, program: &mut Program) -> Result<()> {
        // Signatures first, so calls may precede definitions.
        for stmt in program.iter() {
            if let Stmt::Function(func) = stmt {
                self.register_function(func)?;
            }
        }
        for stmt in program.iter_mut() {
            self.check_stmt(stmt)?;
        }
        Ok(())
    }

    fn register_function(&mut self, func: &Function) -> Result<()> {
        anyhow::ensure!(
            !matches!(func.name.as_str(), "in" | "out"),
            "cannot redefine reserved function '{}'",
            func.name
        );
        let params: Vec<Ty> = func.params.iter().map(|p| p.ty).collect();
        let overloads = self.functions.entry(func.name.clone()).or_default();
        anyhow::ensure!(
            !overloads.iter().any(|sig| sig.params == params),
            "duplicate definition of function '{}'",
            func.name
        );
        overloads.push(FnSig {
            params,
            ret: func.ret,
        });
        Ok(())
    }

    fn check_function(&mut self, func: &mut Function) -> Result<()> {
        anyhow::ensure!(
            self.current.is_none(),
            "nested function definitions are not supported"
        );
        let mut params = HashMap::new();
        for param in &func.params {
            anyhow::ensure!(
                params.insert(param.name.clone(), param.ty).is_none(),
                "duplicate parameter '{}' in function '{}'",
                param.name,
                func.name
            );
        }
        self.current = Some(FnCtx {
            params,
            locals: HashMap::new(),
            ret: func.ret,
        });
        let result = func.body.iter_mut().try_for_each(|s| self.check_stmt(s));
        self.current = None;
        result
    }

    fn check_stmt(&mut self, stmt: &mut Stmt) -> Result<()> {
        match stmt {
            Stmt::VarDecl { ty, name, value } => {
                let value_ty = self.check_expr(value, Some(*ty))?;
                anyhow::ensure!(
                    compatible(*ty, value_ty),
                    "cannot initialize {ty} variable '{name}' with {value_ty} value"
                );
                let is_global_name = self.globals.contains_key(name);
                match &mut self.current {
                    // A local sharing a global's name refers to the
                    // global, matching the generated labels.
                    Some(ctx) if !is_global_name => {
                        ctx.locals.insert(name.clone(), *ty);
                    }
                    Some(_) => {}
                    None => {
                        self.globals.insert(name.clone(), *ty);
                    }
                }
            }
            Stmt::Assign { target, value } => {
                anyhow::ensure!(
                    matches!(target.kind, ExprKind::Ident(_) | ExprKind::ArrayGet { .. }),
                    "assignment target must be a variable or array element"
                );
                let target_ty = self.check_expr(target, None)?;
                let value_ty = self.check_expr(value, Some(target_ty))?;
                anyhow::ensure!(
                    compatible(target_ty, value_ty),
                    "cannot assign {value_ty} value to {target_ty} target"
                );
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond_ty = self.check_expr(cond, Some(Ty::Bool))?;
                anyhow::ensure!(truthy(cond_ty), "if condition cannot be {cond_ty}");
                then_branch.iter_mut().try_for_each(|s| self.check_stmt(s))?;
                if let Some(else_branch) = else_branch {
                    else_branch.iter_mut().try_for_each(|s| self.check_stmt(s))?;
                }
            }
            Stmt::While { cond, body } => {
                let cond_ty = self.check_expr(cond, Some(Ty::Bool))?;
                anyhow::ensure!(truthy(cond_ty), "while condition cannot be {cond_ty}");
                self.loop_depth += 1;
                let result = body.iter_mut().try_for_each(|s| self.check_stmt(s));
                self.loop_depth -= 1;
                result?;
            }
            Stmt::Break => {
                anyhow::ensure!(self.loop_depth > 0, "break outside a loop");
            }
            Stmt::Return(value) => {
                let ret = match &self.current {
                    Some(ctx) => ctx.ret,
                    None => return Err(anyhow!("return outside a function")),
                };
                let value_ty = match value {
                    Some(value) => self.check_expr(value, Some(ret))?,
                    None => Ty::Void,
                };
                anyhow::ensure!(
                    value_ty == ret || compatible(ret, value_ty),
                    "function returns {ret}, found {value_ty}"
                );
            }
            Stmt::Expr(expr) => {
                self.check_expr(expr, None)?;
            }
            Stmt::Function(func) => self.check_function(func)?,
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Ty> {
        if let Some(ctx) = &self.current {
            if let Some(ty) = ctx.params.get(name) {
                return Ok(*ty);
            }
        }
        if let Some(ty) = self.globals.get(name) {
            return Ok(*ty);
        }
        if let Some(ctx) = &self.current {
            if let Some(ty) = ctx.locals.get(name) {
                return Ok(*ty);
            }
        }
        Err(anyhow!("unknown variable '{name}'"))
    }

    fn check_expr(&mut self, expr: &mut Expr, expected: Option<Ty>) -> Result<Ty> {
        let ty = match &mut expr.kind {
            ExprKind::Number(_) => Ty::Int,
            ExprKind::CharLit(_) => Ty::Char,
            ExprKind::StrLit(_) => Ty::Str,
            ExprKind::BoolLit(_) => Ty::Bool,
            ExprKind::Void => Ty::Void,
            ExprKind::IntArray(values) => {
                for value in values.iter_mut() {
                    anyhow::ensure!(
                        matches!(value.kind, ExprKind::Number(_)),
                        "array literals may only contain number literals"
                    );
                    self.check_expr(value, Some(Ty::Int))?;
                }
                Ty::IntArray
            }
            ExprKind::Ident(name) => self.lookup(name)?,
            ExprKind::ArrayGet { object, index } => {
                let object_ty = self.check_expr(object, None)?;
                anyhow::ensure!(object_ty == Ty::IntArray, "cannot index into {object_ty}");
                let index_ty = self.check_expr(index, Some(Ty::Int))?;
                anyhow::ensure!(index_ty.is_numeric(), "array index cannot be {index_ty}");
                Ty::Int
            }
            ExprKind::MethodCall { object, method, args } => {
                anyhow::ensure!(args.is_empty(), "method '{method}' takes no arguments");
                anyhow::ensure!(method == "size", "unknown method '{method}'");
                anyhow::ensure!(
                    matches!(object.kind, ExprKind::Ident(_)),
                    "method calls are only supported on variables"
                );
                let object_ty = self.check_expr(object, None)?;
                anyhow::ensure!(object_ty == Ty::IntArray, ".size() requires an array");
                Ty::Int
            }
            ExprKind::Call { name, args } => {
                let mut arg_types = Vec::with_capacity(args.len());
                for arg in args.iter_mut() {
                    arg_types.push(self.check_expr(arg, None)?);
                }
                match name.as_str() {
                    "in" => {
                        let candidates: Vec<Ty> = IN_SIGS
                            .iter()
                            .filter(|(params, _)| *params == arg_types.as_slice())
                            .map(|(_, ret)| *ret)
                            .collect();
                        anyhow::ensure!(
                            !candidates.is_empty(),
                            "no matching overload for reserved function 'in'"
                        );
                        expected
                            .filter(|e| candidates.contains(e))
                            .unwrap_or(candidates[0])
                    }
                    "out" => {
                        anyhow::ensure!(
                            arg_types.len() == 1 && OUT_PARAM_TYPES.contains(&arg_types[0]),
                            "no matching overload for reserved function 'out'"
                        );
                        Ty::Void
                    }
                    _ => {
                        let overloads = self
                            .functions
                            .get(name.as_str())
                            .ok_or_else(|| anyhow!("unknown function '{name}'"))?;
                        resolve_overload(overloads, &arg_types, name)?.ret
                    }
                }
            }
            ExprKind::Binary { op, left, right } => {
                let op = *op;
                let left_ty = self.check_expr(left, None)?;
                let right_ty = self.check_expr(right, None)?;
                if op.is_logical() {
                    anyhow::ensure!(
                        truthy(left_ty) && truthy(right_ty),
                        "'{}' requires boolean operands",
                        op.symbol()
                    );
                    Ty::Bool
                } else if op.is_comparison() {
                    let both_numeric = left_ty.is_numeric() && right_ty.is_numeric();
                    let both_bool = left_ty == Ty::Bool
                        && right_ty == Ty::Bool
                        && matches!(op, BinOp::Eq | BinOp::Ne);
                    anyhow::ensure!(
                        both_numeric || both_bool,
                        "cannot compare {left_ty} with {right_ty}"
                    );
                    Ty::Bool
                } else {
                    anyhow::ensure!(
                        left_ty.is_numeric() && right_ty.is_numeric(),
                        "'{}' requires numeric operands",
                        op.symbol()
                    );
                    if left_ty == Ty::Uint || right_ty == Ty::Uint {
                        Ty::Uint
                    } else {
                        Ty::Int
                    }
                }
            }
            ExprKind::Unary { op, operand } => {
                let op = *op;
                let operand_ty = self.check_expr(operand, None)?;
                match op {
                    UnOp::Not => {
                        anyhow::ensure!(truthy(operand_ty), "'!' requires a boolean operand");
                        Ty::Bool
                    }
                    UnOp::Neg => {
                        anyhow::ensure!(operand_ty.is_numeric(), "'-' requires a numeric operand");
                        Ty::Int
                    }
                }
            }
        };
        expr.ty = Some(ty);
        Ok(ty)
    }
}

impl Default for Analyzer {
    fn default() -> Analyzer {
        Analyzer::new()
    }
}

/// Entry point: annotates the tree in place.
pub fn analyze(program: &mut Program) -> Result<()> {
    Analyzer::new().analyze(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn analyzed(source: &str) -> Result<Program> {
        let mut program = parse_source(source)?;
        analyze(&mut program)?;
        Ok(program)
    }

    #[test]
    fn annotates_expression_types() {
        let program = analyzed("int x = 1 + 2; bool b = x < 3;").unwrap();
        let Stmt::VarDecl { value, .. } = &program[0] else {
            panic!()
        };
        assert_eq!(value.ty, Some(Ty::Int));
        let Stmt::VarDecl { value, .. } = &program[1] else {
            panic!()
        };
        assert_eq!(value.ty, Some(Ty::Bool));
    }

    #[test]
    fn uint_propagates_through_arithmetic() {
        let program = analyzed("uint a = 1; uint b = a + 2;").unwrap();
        let Stmt::VarDecl { value, .. } = &program[1] else {
            panic!()
        };
        assert_eq!(value.ty, Some(Ty::Uint));
    }

    #[test]
    fn in_takes_type_from_context() {
        let program = analyzed("char c = in(); int n = in(); string s = in(4);").unwrap();
        for (stmt, want) in program.iter().zip([Ty::Char, Ty::Int, Ty::Str]) {
            let Stmt::VarDecl { value, .. } = stmt else {
                panic!()
            };
            assert_eq!(value.ty, Some(want));
        }
    }

    #[test]
    fn unknown_names_fail() {
        assert!(analyzed("int x = y;").is_err());
        assert!(analyzed("frob(1);").is_err());
    }

    #[test]
    fn type_mismatches_fail() {
        assert!(analyzed("int x = \"hi\";").is_err());
        assert!(analyzed("string s = 1;").is_err());
        assert!(analyzed("int[] a = {1}; string s = a[0];").is_err());
        assert!(analyzed("int x = 1; int y = x.size();").is_err());
    }

    #[test]
    fn break_requires_a_loop() {
        assert!(analyzed("break;").is_err());
        assert!(analyzed("while (true) { break; }").is_ok());
    }

    #[test]
    fn overloads_resolve_and_duplicates_fail() {
        assert!(analyzed(
            "int f(int a) { return a; } int f(string s) { return 1; } int x = f(2);"
        )
        .is_ok());
        assert!(analyzed("int f(int a) { return a; } int f(int b) { return b; }").is_err());
    }

    #[test]
    fn return_type_is_checked() {
        assert!(analyzed("int f() { return \"no\"; }").is_err());
        assert!(analyzed("void f() { return; }").is_ok());
        assert!(analyzed("return 1;").is_err());
    }

    #[test]
    fn function_parameters_are_visible_in_the_body() {
        assert!(analyzed("int twice(int n) { return n * 2; }").is_ok());
        assert!(analyzed("int f(string s) { out(s); return 0; }").is_ok());
    }
}
