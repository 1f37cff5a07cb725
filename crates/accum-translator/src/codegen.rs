//! Syntax-directed code generation with single-accumulator
//! conventions: binary operands travel through the stack and the
//! `temp_right` scratch word, short-circuit logic propagates true/false
//! labels, and function calls pass arguments through the stack into
//! per-argument data cells.

use anyhow::{anyhow, Result};
use std::collections::{HashMap, HashSet};

use crate::ast::{BinOp, Expr, ExprKind, Function, Program, Stmt, Ty, UnOp};
use crate::runtime;
use crate::sema;

#[derive(Debug, Clone)]
struct FunctionData {
    label: String,
    ret: Ty,
    params: Vec<(Ty, String)>,
}

pub struct CodeGenerator {
    data: Vec<String>,
    code: Vec<String>,
    funcs: Vec<String>,
    variables: HashMap<String, Ty>,
    functions: HashMap<String, Vec<FunctionData>>,
    emitted_consts: HashSet<i64>,
    label_counter: usize,
    str_counter: usize,
    arr_counter: usize,
    current_fn: Option<FunctionData>,
    break_labels: Vec<String>,
}

const OPERAND_LIMIT: i64 = 0x00FF_FFFF;

fn mangle(name: &str, params: &[Ty]) -> String {
    let mut label = format!("func_{name}");
    for ty in params {
        label.push('_');
        label.push_str(ty.mangle_tag());
    }
    label
}

impl CodeGenerator {
    pub fn new() -> CodeGenerator {
        CodeGenerator {
            data: Vec::new(),
            code: Vec::new(),
            funcs: Vec::new(),
            variables: HashMap::new(),
            functions: HashMap::new(),
            emitted_consts: HashSet::new(),
            label_counter: 0,
            str_counter: 0,
            arr_counter: 0,
            current_fn: None,
            break_labels: Vec::new(),
        }
    }

    pub fn generate(&mut self, program: &Program) -> Result<String> {
        for stmt in program {
            if let Stmt::Function(func) = stmt {
                let params: Vec<(Ty, String)> =
                    func.params.iter().map(|p| (p.ty, p.name.clone())).collect();
                let param_types: Vec<Ty> = func.params.iter().map(|p| p.ty).collect();
                self.functions
                    .entry(func.name.clone())
                    .or_default()
                    .push(FunctionData {
                        label: mangle(&func.name, &param_types),
                        ret: func.ret,
                        params,
                    });
            }
        }

        self.emit_code_label("_start");
        for stmt in program {
            self.gen_stmt(stmt)?;
        }
        self.emit_code("halt");

        Ok(self.assemble())
    }

    fn assemble(&self) -> String {
        let mut out = String::new();
        out.push_str(".data\n");
        out.push_str(runtime::DATA_PREAMBLE);
        for line in &self.data {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("\n.text\n.org 0x20\n");
        out.push_str(runtime::TEXT_RUNTIME);
        for line in &self.funcs {
            out.push_str(line);
            out.push('\n');
        }
        for line in &self.code {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::VarDecl { name, value, ty } => {
                let label = self.var_label(name);
                if !self.variables.contains_key(&label) {
                    self.emit_data(&format!("{label}: 0"));
                    self.variables.insert(label.clone(), *ty);
                }
                self.gen_expr(value)?;
                self.emit_code(&format!("st {label}"));
            }
            Stmt::Assign { target, value } => {
                self.gen_expr(value)?;
                match &target.kind {
                    ExprKind::Ident(name) => {
                        let label = self.var_label(name);
                        self.emit_code(&format!("st {label}"));
                    }
                    ExprKind::ArrayGet { object, index } => {
                        // Value is in ACC; park it while the element
                        // address is computed.
                        self.emit_code("push");
                        self.gen_expr(index)?;
                        self.emit_code("st temp_right");
                        self.gen_expr(object)?;
                        self.emit_code("add temp_right");
                        self.emit_code("st temp_right");
                        self.emit_code("pop");
                        self.emit_code("sta temp_right");
                    }
                    _ => return Err(anyhow!("unsupported assignment target")),
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let then_label = self.new_label();
                let end_label = self.new_label();
                let else_label = if else_branch.is_some() {
                    self.new_label()
                } else {
                    end_label.clone()
                };

                self.gen_condition(cond, &then_label, &else_label)?;

                self.emit_code_label(&then_label);
                for s in then_branch {
                    self.gen_stmt(s)?;
                }
                if let Some(else_branch) = else_branch {
                    self.emit_code(&format!("jmp {end_label}"));
                    self.emit_code_label(&else_label);
                    for s in else_branch {
                        self.gen_stmt(s)?;
                    }
                }
                self.emit_code_label(&end_label);
            }
            Stmt::While { cond, body } => {
                let start_label = self.new_label();
                let body_label = self.new_label();
                let end_label = self.new_label();
                self.break_labels.push(end_label.clone());

                self.emit_code_label(&start_label);
                self.gen_condition(cond, &body_label, &end_label)?;
                self.emit_code_label(&body_label);
                for s in body {
                    self.gen_stmt(s)?;
                }
                self.emit_code(&format!("jmp {start_label}"));
                self.emit_code_label(&end_label);

                self.break_labels.pop();
            }
            Stmt::Break => {
                let label = self
                    .break_labels
                    .last()
                    .ok_or_else(|| anyhow!("break outside a loop"))?
                    .clone();
                self.emit_code(&format!("jmp {label}"));
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.gen_expr(value)?;
                }
                self.emit_code("st temp_right");
                self.emit_code("ld temp_ret_addr");
                self.emit_code("push");
                self.emit_code("ld temp_right");
                self.emit_code("ret");
            }
            Stmt::Expr(expr) => {
                self.gen_expr(expr)?;
            }
            Stmt::Function(func) => self.gen_function(func)?,
        }
        Ok(())
    }

    fn gen_function(&mut self, func: &Function) -> Result<()> {
        let param_types: Vec<Ty> = func.params.iter().map(|p| p.ty).collect();
        let label = mangle(&func.name, &param_types);
        let data = self
            .functions
            .get(&func.name)
            .and_then(|overloads| overloads.iter().find(|f| f.label == label))
            .cloned()
            .ok_or_else(|| anyhow!("unregistered function '{}'", func.name))?;

        for (ty, name) in &data.params {
            let arg_label = format!("arg_{label}_{name}");
            self.emit_data(&format!("{arg_label}: 0"));
            self.variables.insert(arg_label, *ty);
        }

        self.current_fn = Some(data.clone());
        self.emit_code_label(&label);

        // Unstack the return address, then the arguments in reverse.
        self.emit_code("pop");
        self.emit_code("st temp_ret_addr");
        for (_, name) in data.params.iter().rev() {
            self.emit_code("pop");
            self.emit_code(&format!("st arg_{label}_{name}"));
        }

        for stmt in &func.body {
            self.gen_stmt(stmt)?;
        }

        // A void function may fall off its end.
        if data.ret == Ty::Void {
            self.emit_code("ld temp_ret_addr");
            self.emit_code("push");
            self.emit_code("ret");
        }
        self.emit_code("");

        self.current_fn = None;
        Ok(())
    }

    /// Branching evaluation: control transfers to `true_label` or
    /// `false_label` instead of producing a 0/1 in ACC. Short-circuit
    /// operators thread their labels; everything else falls back to a
    /// truth test on the value.
    fn gen_condition(&mut self, expr: &Expr, true_label: &str, false_label: &str) -> Result<()> {
        match &expr.kind {
            ExprKind::Binary { op: BinOp::And, left, right } => {
                let right_side = self.new_label();
                self.gen_condition(left, &right_side, false_label)?;
                self.emit_code_label(&right_side);
                self.gen_condition(right, true_label, false_label)
            }
            ExprKind::Binary { op: BinOp::Or, left, right } => {
                let right_side = self.new_label();
                self.gen_condition(left, true_label, &right_side)?;
                self.emit_code_label(&right_side);
                self.gen_condition(right, true_label, false_label)
            }
            ExprKind::Binary { op, left, right } if op.is_comparison() => {
                self.gen_expr(left)?;
                self.emit_code("push");
                self.gen_expr(right)?;
                self.emit_code("st temp_right");
                self.emit_code("pop");
                self.emit_code("cmp temp_right");
                let jump = CodeGenerator::comparison_jump(*op, left, right);
                self.emit_code(&format!("{jump} {true_label}"));
                self.emit_code(&format!("jmp {false_label}"));
                Ok(())
            }
            ExprKind::Unary { op: UnOp::Not, operand } => {
                self.gen_condition(operand, false_label, true_label)
            }
            _ => {
                self.gen_expr(expr)?;
                self.emit_code(&format!("jnz {true_label}"));
                self.emit_code(&format!("jmp {false_label}"));
                Ok(())
            }
        }
    }

    /// Comparisons after `cmp` pick signed or unsigned jumps from the
    /// operand types; C comes from the comparison itself, with no
    /// flag-writing instruction in between.
    fn comparison_jump(op: BinOp, left: &Expr, right: &Expr) -> &'static str {
        let unsigned = left.ty() == Ty::Uint || right.ty() == Ty::Uint;
        match (op, unsigned) {
            (BinOp::Eq, _) => "jz",
            (BinOp::Ne, _) => "jnz",
            (BinOp::Gt, false) => "jg",
            (BinOp::Ge, false) => "jge",
            (BinOp::Lt, false) => "jl",
            (BinOp::Le, false) => "jle",
            (BinOp::Gt, true) => "ja",
            (BinOp::Ge, true) => "jae",
            (BinOp::Lt, true) => "jb",
            (BinOp::Le, true) => "jbe",
            _ => unreachable!("not a comparison"),
        }
    }

    fn gen_expr(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Number(n) => {
                if *n > OPERAND_LIMIT {
                    let label = format!("const_{n}");
                    if self.emitted_consts.insert(*n) {
                        self.emit_data(&format!("{label}: {n}"));
                    }
                    self.emit_code(&format!("ld {label}"));
                } else {
                    self.emit_code(&format!("ldi {n}"));
                }
            }
            ExprKind::CharLit(c) => {
                self.emit_code(&format!("ldi {}", *c as u32));
            }
            ExprKind::StrLit(s) => {
                let label = format!("str_{}", self.str_counter);
                self.str_counter += 1;
                self.emit_data(&format!("{label}: \"{s}\\0\""));
                self.emit_code(&format!("ldi {label}"));
            }
            ExprKind::BoolLit(b) => {
                self.emit_code(if *b { "ldi 1" } else { "ldi 0" });
            }
            ExprKind::Void => {}
            ExprKind::IntArray(values) => {
                let label = format!("arr_{}", self.arr_counter);
                self.arr_counter += 1;
                let numbers: Vec<String> = values
                    .iter()
                    .map(|v| match &v.kind {
                        ExprKind::Number(n) => Ok(n.to_string()),
                        _ => Err(anyhow!("array literals may only contain number literals")),
                    })
                    .collect::<Result<_>>()?;
                // Hidden length word right before the elements.
                self.emit_data(&format!("{label}_len: {}", numbers.len()));
                if numbers.is_empty() {
                    self.emit_data(&format!("{label}: 0"));
                } else {
                    self.emit_data(&format!("{label}: {}", numbers.join(", ")));
                }
                self.emit_code(&format!("ldi {label}"));
            }
            ExprKind::Ident(name) => {
                let label = self.var_label(name);
                self.emit_code(&format!("ld {label}"));
            }
            ExprKind::ArrayGet { object, index } => {
                self.gen_expr(object)?;
                self.emit_code("push");
                self.gen_expr(index)?;
                self.emit_code("st temp_right");
                self.emit_code("pop");
                self.emit_code("add temp_right");
                self.emit_code("st temp_right");
                self.emit_code("lda temp_right");
            }
            ExprKind::MethodCall { object, .. } => {
                self.gen_expr(object)?;
                self.emit_code("call arr_size");
            }
            ExprKind::Call { name, args } => match name.as_str() {
                "in" => self.gen_in_call(expr, args)?,
                "out" => self.gen_out_call(args)?,
                _ => self.gen_user_call(name, args)?,
            },
            ExprKind::Binary { op, left, right } => {
                self.gen_binary(*op, left, right)?;
            }
            ExprKind::Unary { op, operand } => match op {
                UnOp::Neg => {
                    self.gen_expr(operand)?;
                    self.emit_code("not");
                    self.emit_code("inc");
                }
                UnOp::Not => {
                    let true_label = self.new_label();
                    let end_label = self.new_label();
                    self.gen_expr(operand)?;
                    self.emit_code(&format!("jz {true_label}"));
                    self.emit_code("ldi 0");
                    self.emit_code(&format!("jmp {end_label}"));
                    self.emit_code_label(&true_label);
                    self.emit_code("ldi 1");
                    self.emit_code_label(&end_label);
                }
            },
        }
        Ok(())
    }

    fn gen_binary(&mut self, op: BinOp, left: &Expr, right: &Expr) -> Result<()> {
        self.gen_expr(left)?;
        self.emit_code("push");
        self.gen_expr(right)?;
        self.emit_code("st temp_right");
        self.emit_code("pop");

        match op {
            BinOp::Add => self.emit_code("add temp_right"),
            BinOp::Sub => self.emit_code("sub temp_right"),
            BinOp::Mul => self.emit_code("mul temp_right"),
            BinOp::Div => self.emit_code("div temp_right"),
            BinOp::Rem => self.emit_code("rem temp_right"),
            // Both operands are 0/1 values here.
            BinOp::And => self.emit_code("mul temp_right"),
            BinOp::Or => {
                self.emit_code("add temp_right");
                let false_label = self.new_label();
                let end_label = self.new_label();
                self.emit_code(&format!("jz {false_label}"));
                self.emit_code("ldi 1");
                self.emit_code(&format!("jmp {end_label}"));
                self.emit_code_label(&false_label);
                self.emit_code("ldi 0");
                self.emit_code_label(&end_label);
            }
            _ => {
                // Comparison producing a 0/1 value.
                self.emit_code("cmp temp_right");
                let true_label = self.new_label();
                let end_label = self.new_label();
                let jump = CodeGenerator::comparison_jump(op, left, right);
                self.emit_code(&format!("{jump} {true_label}"));
                self.emit_code("ldi 0");
                self.emit_code(&format!("jmp {end_label}"));
                self.emit_code_label(&true_label);
                self.emit_code("ldi 1");
                self.emit_code_label(&end_label);
            }
        }
        Ok(())
    }

    fn gen_in_call(&mut self, call: &Expr, args: &[Expr]) -> Result<()> {
        if args.is_empty() {
            self.emit_code("ldi 0");
        } else {
            self.gen_expr(&args[0])?;
        }
        self.emit_code("st input_count");

        let routine = match call.ty() {
            Ty::Int | Ty::Uint => "read_int",
            Ty::Char => "read_char",
            Ty::Str => "read_string",
            Ty::IntArray => "read_arr",
            other => return Err(anyhow!("'in' cannot produce {other}")),
        };
        self.emit_code(&format!("call {routine}"));
        Ok(())
    }

    fn gen_out_call(&mut self, args: &[Expr]) -> Result<()> {
        let arg = args
            .first()
            .ok_or_else(|| anyhow!("'out' requires an argument"))?;
        self.gen_expr(arg)?;
        let routine = match arg.ty() {
            Ty::Int => "write_int",
            Ty::Uint => "write_uint",
            Ty::Char => "write_char",
            Ty::Str => "write_string",
            Ty::IntArray => "write_arr",
            other => return Err(anyhow!("'out' cannot print {other}")),
        };
        self.emit_code(&format!("call {routine}"));
        Ok(())
    }

    fn gen_user_call(&mut self, name: &str, args: &[Expr]) -> Result<()> {
        let arg_types: Vec<Ty> = args.iter().map(Expr::ty).collect();
        let target = {
            let overloads = self
                .functions
                .get(name)
                .ok_or_else(|| anyhow!("unknown function '{name}'"))?;
            let sigs: Vec<sema::FnSig> = overloads
                .iter()
                .map(|f| sema::FnSig {
                    params: f.params.iter().map(|(ty, _)| *ty).collect(),
                    ret: f.ret,
                })
                .collect();
            let sig = sema::resolve_overload(&sigs, &arg_types, name)?;
            mangle(name, &sig.params)
        };

        // Caller-saved state: the return-address cell and this
        // function's own argument cells survive the callee.
        let saved = self.current_fn.clone();
        if let Some(current) = &saved {
            self.emit_code("ld temp_ret_addr");
            self.emit_code("push");
            for (_, param) in &current.params {
                self.emit_code(&format!("ld arg_{}_{}", current.label, param));
                self.emit_code("push");
            }
        }

        for arg in args {
            self.gen_expr(arg)?;
            self.emit_code("push");
        }
        self.emit_code(&format!("call {target}"));

        if let Some(current) = &saved {
            self.emit_code("st temp_right");
            for (_, param) in current.params.iter().rev() {
                self.emit_code("pop");
                self.emit_code(&format!("st arg_{}_{}", current.label, param));
            }
            self.emit_code("pop");
            self.emit_code("st temp_ret_addr");
            self.emit_code("ld temp_right");
        }
        Ok(())
    }

    /// Labels for variables: globals are `var_<name>`; function
    /// parameters and locals carry the mangled function label. A local
    /// that shares a global's name refers to the global.
    fn var_label(&self, name: &str) -> String {
        if let Some(current) = &self.current_fn {
            if current.params.iter().any(|(_, param)| param == name) {
                return format!("arg_{}_{name}", current.label);
            }
            if self.variables.contains_key(&format!("var_{name}")) {
                return format!("var_{name}");
            }
            return format!("var_{}_{name}", current.label);
        }
        format!("var_{name}")
    }

    fn new_label(&mut self) -> String {
        let label = format!("L{}", self.label_counter);
        self.label_counter += 1;
        label
    }

    fn emit_code(&mut self, line: &str) {
        let target = if self.current_fn.is_some() {
            &mut self.funcs
        } else {
            &mut self.code
        };
        target.push(format!("  {line}"));
    }

    fn emit_code_label(&mut self, label: &str) {
        let target = if self.current_fn.is_some() {
            &mut self.funcs
        } else {
            &mut self.code
        };
        target.push(format!("{label}:"));
    }

    fn emit_data(&mut self, line: &str) {
        self.data.push(format!("  {line}"));
    }
}

impl Default for CodeGenerator {
    fn default() -> CodeGenerator {
        CodeGenerator::new()
    }
}

/// Compiles an analyzed program to assembly text.
pub fn generate(program: &Program) -> Result<String> {
    CodeGenerator::new().generate(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;
    use crate::sema::analyze;

    fn compile(source: &str) -> String {
        let mut program = parse_source(source).unwrap();
        analyze(&mut program).unwrap();
        generate(&program).unwrap()
    }

    #[test]
    fn declaration_emits_data_cell_and_store() {
        let asm = compile("int x = 5;");
        assert!(asm.contains("var_x: 0"));
        assert!(asm.contains("ldi 5"));
        assert!(asm.contains("st var_x"));
        assert!(asm.contains("_start:"));
        assert!(asm.trim_end().ends_with("halt"));
    }

    #[test]
    fn binary_op_uses_stack_and_scratch() {
        let asm = compile("int x = 1 + 2;");
        let expected = [
            "ldi 1", "push", "ldi 2", "st temp_right", "pop", "add temp_right",
        ];
        let mut cursor = 0;
        for line in asm.lines() {
            if cursor < expected.len() && line.trim() == expected[cursor] {
                cursor += 1;
            }
        }
        assert_eq!(cursor, expected.len(), "sequence missing in:\n{asm}");
    }

    #[test]
    fn unsigned_comparison_uses_unsigned_jump() {
        let asm = compile("uint a = 1; bool b = a < 2;");
        assert!(asm.contains("jb L"));
        let asm = compile("int a = 1; bool b = a < 2;");
        assert!(asm.contains("jl L"));
    }

    #[test]
    fn string_literal_is_nul_terminated() {
        let asm = compile("string s = \"hi\";");
        assert!(asm.contains("str_0: \"hi\\0\""));
    }

    #[test]
    fn array_literal_carries_hidden_length() {
        let asm = compile("int[] a = {7, 8};");
        assert!(asm.contains("arr_0_len: 2"));
        assert!(asm.contains("arr_0: 7, 8"));
        assert!(asm.contains("ldi arr_0"));
    }

    #[test]
    fn large_constant_spills_to_data() {
        let asm = compile("int x = 999999999;");
        assert!(asm.contains("const_999999999: 999999999"));
        assert!(asm.contains("ld const_999999999"));
    }

    #[test]
    fn in_out_dispatch_on_type() {
        let asm = compile("char c = in(); out(c); int n = in(); out(n);");
        assert!(asm.contains("call read_char"));
        assert!(asm.contains("call write_char"));
        assert!(asm.contains("call read_int"));
        assert!(asm.contains("call write_int"));
    }

    #[test]
    fn function_labels_are_mangled_by_parameter_types() {
        let asm = compile(
            "int add(int a, int b) { return a + b; } int r = add(1, 2);",
        );
        assert!(asm.contains("func_add_i_i:"));
        assert!(asm.contains("call func_add_i_i"));
        assert!(asm.contains("arg_func_add_i_i_a: 0"));
    }

    #[test]
    fn while_with_break_jumps_to_loop_end() {
        let asm = compile("while (true) { break; }");
        // The break target label is emitted after the loop body.
        let break_jump = asm
            .lines()
            .find(|l| l.trim().starts_with("jmp L"))
            .expect("break jump");
        let target = break_jump.trim().strip_prefix("jmp ").unwrap();
        assert!(asm.contains(&format!("{target}:")));
    }

    #[test]
    fn runtime_handler_leads_the_text_section() {
        let asm = compile("int x = 1;");
        let text_pos = asm.find(".text").unwrap();
        let org_pos = asm.find(".org 0x20").unwrap();
        let handler_pos = asm.find("int_handler:").unwrap();
        assert!(text_pos < org_pos && org_pos < handler_pos);
        let start_pos = asm.find("_start:").unwrap();
        assert!(handler_pos < start_pos);
    }
}
