//! Source text for the external-toolchain backends.
//!
//! All three emitters walk the same [`Schedule`] and store node `i` into
//! `heap[i]`. The exported entry point returns the value of the first root.

use std::collections::BTreeSet;
use std::fmt::Write;

use super::schedule::Schedule;
use crate::graph::{MathFunction, Node, NodeIndex, Operation};

fn libm_functions(schedule: &Schedule) -> BTreeSet<&'static str> {
    schedule
        .steps
        .iter()
        .filter_map(|(_, node)| match node {
            Node::Function { function, .. } if function.is_libm() => Some(function.name()),
            _ => None,
        })
        .collect()
}

fn sse_mnemonic(op: Operation) -> &'static str {
    match op {
        Operation::Add => "addsd",
        Operation::Sub => "subsd",
        Operation::Mul => "mulsd",
        Operation::Div => "divsd",
    }
}

// =============================================================================
// NASM (Intel syntax, elf64)
// =============================================================================

pub fn nasm(schedule: &Schedule, entry: &str, result: NodeIndex, dim: usize) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "[BITS 64]");
    let _ = writeln!(s, "default rel");
    for symbol in ["dim", "heap_size", entry] {
        let _ = writeln!(s, "global {symbol}");
    }
    for name in libm_functions(schedule) {
        let _ = writeln!(s, "extern {name}");
    }
    let _ = writeln!(s, "section .text");
    let _ = writeln!(s, "dim:\n    mov rax, {dim}\n    ret");
    let _ = writeln!(s, "heap_size:\n    mov rax, {}\n    ret", schedule.heap_size);
    let _ = writeln!(s, "{entry}:");
    let _ = writeln!(s, "    push rbp");

    for &(index, node) in &schedule.steps {
        let i = index.index();
        let out = 8 * i;
        match node {
            Node::Variable(slot) => {
                let _ = writeln!(s, "    movsd xmm0, [rdi + {}]", 8 * slot as usize);
                let _ = writeln!(s, "    movsd [rsi + {out}], xmm0");
            }
            Node::Constant(value) => {
                let _ = writeln!(s, "    mov rax, 0x{:016x}", value.to_bits());
                let _ = writeln!(s, "    mov [rsi + {out}], rax");
            }
            Node::Operation { op, lhs, rhs } => {
                let _ = writeln!(s, "    movsd xmm0, [rsi + {}]", 8 * lhs.index());
                let _ = writeln!(s, "    {} xmm0, [rsi + {}]", sse_mnemonic(op), 8 * rhs.index());
                let _ = writeln!(s, "    movsd [rsi + {out}], xmm0");
            }
            Node::Function { function, arg } => {
                let _ = writeln!(s, "    movsd xmm0, [rsi + {}]", 8 * arg.index());
                match function {
                    MathFunction::Sqr => {
                        let _ = writeln!(s, "    mulsd xmm0, xmm0");
                        let _ = writeln!(s, "    movsd [rsi + {out}], xmm0");
                    }
                    MathFunction::UnitStep => {
                        let _ = writeln!(s, "    xorpd xmm1, xmm1");
                        let _ = writeln!(s, "    ucomisd xmm0, xmm1");
                        let _ = writeln!(s, "    mov rax, 0x{:016x}", 1.0f64.to_bits());
                        let _ = writeln!(s, "    jae .step_{i}");
                        let _ = writeln!(s, "    xor eax, eax");
                        let _ = writeln!(s, ".step_{i}:");
                        let _ = writeln!(s, "    mov [rsi + {out}], rax");
                    }
                    MathFunction::Ramp => {
                        let _ = writeln!(s, "    xorpd xmm1, xmm1");
                        let _ = writeln!(s, "    ucomisd xmm0, xmm1");
                        let _ = writeln!(s, "    ja .ramp_{i}");
                        let _ = writeln!(s, "    xorpd xmm0, xmm0");
                        let _ = writeln!(s, ".ramp_{i}:");
                        let _ = writeln!(s, "    movsd [rsi + {out}], xmm0");
                    }
                    _ => {
                        let _ = writeln!(s, "    push rdi");
                        let _ = writeln!(s, "    push rsi");
                        let _ = writeln!(s, "    call {} wrt ..plt", function.name());
                        let _ = writeln!(s, "    pop rsi");
                        let _ = writeln!(s, "    pop rdi");
                        let _ = writeln!(s, "    movsd [rsi + {out}], xmm0");
                    }
                }
            }
        }
    }

    let _ = writeln!(s, "    movsd xmm0, [rsi + {}]", 8 * result.index());
    let _ = writeln!(s, "    pop rbp");
    let _ = writeln!(s, "    ret");
    let _ = writeln!(s, "section .note.GNU-stack noalloc noexec nowrite progbits");
    s
}

// =============================================================================
// GNU as (AT&T syntax)
// =============================================================================

pub fn gnu_as(schedule: &Schedule, entry: &str, result: NodeIndex, dim: usize) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "    .text");
    for symbol in ["dim", "heap_size", entry] {
        let _ = writeln!(s, "    .globl {symbol}");
        let _ = writeln!(s, "    .type {symbol}, @function");
    }
    let _ = writeln!(s, "dim:\n    movabsq ${dim}, %rax\n    ret");
    let _ = writeln!(s, "heap_size:\n    movabsq ${}, %rax\n    ret", schedule.heap_size);
    let _ = writeln!(s, "{entry}:");
    let _ = writeln!(s, "    pushq %rbp");

    for &(index, node) in &schedule.steps {
        let i = index.index();
        let out = 8 * i;
        match node {
            Node::Variable(slot) => {
                let _ = writeln!(s, "    movsd {}(%rdi), %xmm0", 8 * slot as usize);
                let _ = writeln!(s, "    movsd %xmm0, {out}(%rsi)");
            }
            Node::Constant(value) => {
                let _ = writeln!(s, "    movabsq $0x{:016x}, %rax", value.to_bits());
                let _ = writeln!(s, "    movq %rax, {out}(%rsi)");
            }
            Node::Operation { op, lhs, rhs } => {
                let _ = writeln!(s, "    movsd {}(%rsi), %xmm0", 8 * lhs.index());
                let _ = writeln!(s, "    {} {}(%rsi), %xmm0", sse_mnemonic(op), 8 * rhs.index());
                let _ = writeln!(s, "    movsd %xmm0, {out}(%rsi)");
            }
            Node::Function { function, arg } => {
                let _ = writeln!(s, "    movsd {}(%rsi), %xmm0", 8 * arg.index());
                match function {
                    MathFunction::Sqr => {
                        let _ = writeln!(s, "    mulsd %xmm0, %xmm0");
                        let _ = writeln!(s, "    movsd %xmm0, {out}(%rsi)");
                    }
                    MathFunction::UnitStep => {
                        let _ = writeln!(s, "    xorpd %xmm1, %xmm1");
                        let _ = writeln!(s, "    ucomisd %xmm1, %xmm0");
                        let _ = writeln!(s, "    movabsq $0x{:016x}, %rax", 1.0f64.to_bits());
                        let _ = writeln!(s, "    jae .Lstep_{i}");
                        let _ = writeln!(s, "    xorl %eax, %eax");
                        let _ = writeln!(s, ".Lstep_{i}:");
                        let _ = writeln!(s, "    movq %rax, {out}(%rsi)");
                    }
                    MathFunction::Ramp => {
                        let _ = writeln!(s, "    xorpd %xmm1, %xmm1");
                        let _ = writeln!(s, "    ucomisd %xmm1, %xmm0");
                        let _ = writeln!(s, "    ja .Lramp_{i}");
                        let _ = writeln!(s, "    xorpd %xmm0, %xmm0");
                        let _ = writeln!(s, ".Lramp_{i}:");
                        let _ = writeln!(s, "    movsd %xmm0, {out}(%rsi)");
                    }
                    _ => {
                        let _ = writeln!(s, "    pushq %rdi");
                        let _ = writeln!(s, "    pushq %rsi");
                        let _ = writeln!(s, "    call {}@PLT", function.name());
                        let _ = writeln!(s, "    popq %rsi");
                        let _ = writeln!(s, "    popq %rdi");
                        let _ = writeln!(s, "    movsd %xmm0, {out}(%rsi)");
                    }
                }
            }
        }
    }

    let _ = writeln!(s, "    movsd {}(%rsi), %xmm0", 8 * result.index());
    let _ = writeln!(s, "    popq %rbp");
    let _ = writeln!(s, "    ret");
    let _ = writeln!(s, "    .section .note.GNU-stack,\"\",@progbits");
    s
}

// =============================================================================
// C
// =============================================================================

fn c_literal(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "INFINITY" } else { "(-INFINITY)" }.to_string()
    } else {
        // Shortest representation that round-trips through strtod.
        format!("{value:e}")
    }
}

pub fn c(schedule: &Schedule, entry: &str, result: NodeIndex, dim: usize) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "#include <math.h>");
    let _ = writeln!(s, "#define sqr(x) ((x) * (x))");
    let _ = writeln!(s, "#define unit_step(x) ((x) >= 0 ? 1.0 : 0.0)");
    let _ = writeln!(s, "#define ramp(x) ((x) > 0 ? (x) : 0.0)");
    let _ = writeln!(s, "long long dim(void) {{ return {dim}LL; }}");
    let _ = writeln!(s, "long long heap_size(void) {{ return {}LL; }}", schedule.heap_size);
    let _ = writeln!(s, "double {entry}(const double* x, double* a) {{");

    for &(index, node) in &schedule.steps {
        let i = index.index();
        let _ = match node {
            Node::Variable(slot) => writeln!(s, "  a[{i}] = x[{slot}];"),
            Node::Constant(value) => writeln!(s, "  a[{i}] = {};", c_literal(value)),
            Node::Operation { op, lhs, rhs } => writeln!(
                s,
                "  a[{i}] = a[{}] {} a[{}];",
                lhs.index(),
                op.symbol(),
                rhs.index()
            ),
            Node::Function { function, arg } => {
                writeln!(s, "  a[{i}] = {}(a[{}]);", function.name(), arg.index())
            }
        };
    }

    let _ = writeln!(s, "  return a[{}];", result.index());
    let _ = writeln!(s, "}}");
    s
}
