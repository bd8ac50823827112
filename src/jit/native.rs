//! In-process x86-64 code generation, no external toolchain.
//!
//! Generated functions follow the SysV ABI:
//!
//! ```text
//! f64 eval(const f64* x, f64* scratch, const MathFn* table)
//!     rdi = x - 16        inputs, biased
//!     rsi = scratch - 16  moved to rbx (callee-saved) in the prologue
//!     rdx = table - 1     function pointer table, biased by one entry
//! ```
//!
//! Both data pointers are biased by [`BIAS`] slots, which puts every
//! displacement at 128 bytes or more. Every load and store is therefore a
//! disp32 form of fixed length.

use log::debug;

use super::executable::ExecutableCode;
use super::schedule::Schedule;
use super::x86_64::{
    emit_arith_mem, emit_call_mem_disp8, emit_mov_rax_imm64, emit_mov_rr, emit_mov_store_rax,
    emit_movsd_load, emit_movsd_store, emit_mulsd_rr, emit_pop, emit_push, emit_ret, Gpr, XMM0,
};
use crate::error::JitError;
use crate::graph::{MathFunction, Node, NodeIndex};

/// Slots the input and scratch pointers are biased by.
pub const BIAS: usize = 16;

type MathFn = extern "C" fn(f64) -> f64;
type EvalFn = unsafe extern "C" fn(*const f64, *mut f64, *const MathFn) -> f64;

extern "C" fn apply<const F: usize>(x: f64) -> f64 {
    MathFunction::ALL[F].apply(x)
}

/// Indexed by [`MathFunction::table_index`].
static FUNCTION_TABLE: [MathFn; 12] = [
    apply::<0>,
    apply::<1>,
    apply::<2>,
    apply::<3>,
    apply::<4>,
    apply::<5>,
    apply::<6>,
    apply::<7>,
    apply::<8>,
    apply::<9>,
    apply::<10>,
    apply::<11>,
];

fn displacement(slot: usize) -> Result<i32, JitError> {
    slot.checked_add(BIAS)
        .and_then(|biased| biased.checked_mul(8))
        .and_then(|bytes| i32::try_from(bytes).ok())
        .ok_or(JitError::DisplacementOverflow(slot))
}

/// Lowers `schedule` into machine code returning the value of `result`.
pub fn generate(schedule: &Schedule, result: NodeIndex) -> Result<Vec<u8>, JitError> {
    let mut code = Vec::with_capacity(schedule.steps.len() * 16 + 16);

    emit_push(&mut code, Gpr::Rbx);
    emit_mov_rr(&mut code, Gpr::Rbx, Gpr::Rsi);

    for &(index, node) in &schedule.steps {
        let out = displacement(index.index())?;
        match node {
            Node::Variable(slot) => {
                emit_movsd_load(&mut code, XMM0, Gpr::Rdi, displacement(slot as usize)?);
                emit_movsd_store(&mut code, Gpr::Rbx, out, XMM0);
            }
            Node::Constant(value) => {
                emit_mov_rax_imm64(&mut code, value.to_bits());
                emit_mov_store_rax(&mut code, Gpr::Rbx, out);
            }
            Node::Operation { op, lhs, rhs } => {
                emit_movsd_load(&mut code, XMM0, Gpr::Rbx, displacement(lhs.index())?);
                emit_arith_mem(&mut code, op, XMM0, Gpr::Rbx, displacement(rhs.index())?);
                emit_movsd_store(&mut code, Gpr::Rbx, out, XMM0);
            }
            Node::Function { function, arg } => {
                emit_movsd_load(&mut code, XMM0, Gpr::Rbx, displacement(arg.index())?);
                if function == MathFunction::Sqr {
                    emit_mulsd_rr(&mut code, XMM0, XMM0);
                } else {
                    // rbx was pushed, so two more pushes keep rsp 16-byte
                    // aligned at the call.
                    emit_push(&mut code, Gpr::Rdi);
                    emit_push(&mut code, Gpr::Rdx);
                    emit_call_mem_disp8(&mut code, Gpr::Rdx, ((function.table_index() + 1) * 8) as u8);
                    emit_pop(&mut code, Gpr::Rdx);
                    emit_pop(&mut code, Gpr::Rdi);
                }
                emit_movsd_store(&mut code, Gpr::Rbx, out, XMM0);
            }
        }
    }

    emit_movsd_load(&mut code, XMM0, Gpr::Rbx, displacement(result.index())?);
    emit_pop(&mut code, Gpr::Rbx);
    emit_ret(&mut code);
    Ok(code)
}

/// Machine code for one expression, mapped executable.
#[derive(Debug)]
pub struct NativeCode {
    code: ExecutableCode,
    dim: usize,
    heap_size: usize,
}

impl NativeCode {
    pub fn new(schedule: &Schedule, result: NodeIndex, dim: usize) -> Result<Self, JitError> {
        if !cfg!(all(target_arch = "x86_64", unix)) {
            return Err(JitError::UnsupportedTarget("native"));
        }
        let bytes = generate(schedule, result)?;
        let code = ExecutableCode::new(&bytes)?;
        debug!(
            "Native backend emitted {} bytes for {} nodes",
            code.len(),
            schedule.steps.len()
        );
        Ok(NativeCode {
            code,
            dim,
            heap_size: schedule.heap_size,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn heap_size(&self) -> usize {
        self.heap_size
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn eval(&self, x: &[f64], scratch: &mut [f64]) -> f64 {
        assert_eq!(x.len(), self.dim, "expected {} inputs", self.dim);
        assert!(
            scratch.len() >= self.heap_size,
            "scratch holds {} slots, need {}",
            scratch.len(),
            self.heap_size
        );
        // SAFETY: the code was generated for this ABI, reads at most `dim`
        // inputs and writes below `heap_size`, and `self.code` outlives the
        // call. The biased pointers are only dereferenced after the
        // generated code adds the bias back.
        unsafe {
            let f: EvalFn = self.code.as_fn();
            f(
                x.as_ptr().wrapping_sub(BIAS),
                scratch.as_mut_ptr().wrapping_sub(BIAS),
                FUNCTION_TABLE.as_ptr().wrapping_sub(1),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, Operation};

    #[test]
    fn function_table_follows_declaration_order() {
        for function in MathFunction::ALL {
            let x = 0.375;
            assert_eq!(FUNCTION_TABLE[function.table_index()](x), function.apply(x));
        }
    }

    #[test]
    fn displacements_are_biased() {
        assert_eq!(displacement(0).unwrap(), 128);
        assert_eq!(displacement(3).unwrap(), 152);
        assert!(matches!(
            displacement(usize::MAX),
            Err(JitError::DisplacementOverflow(_))
        ));
    }

    #[test]
    fn emits_prologue_and_epilogue() {
        let g = Graph::new(1);
        let x = g.variable(0);
        let schedule = Schedule::new(&g, &[x]);
        let code = generate(&schedule, x).unwrap();
        assert_eq!(&code[..4], &[0x53, 0x48, 0x89, 0xF3]);
        assert_eq!(&code[code.len() - 2..], &[0x5B, 0xC3]);
    }

    #[test]
    #[cfg(all(target_arch = "x86_64", unix))]
    fn evaluates_through_the_function_table() {
        let g = Graph::new(2);
        let (x, y) = (g.variable(0), g.variable(1));
        let s = g.function(MathFunction::Sin, x);
        let q = g.function(MathFunction::Sqr, y);
        let root = g.operation(Operation::Div, s, q);
        let schedule = Schedule::new(&g, &[root]);
        let native = NativeCode::new(&schedule, root, 2).unwrap();
        let mut scratch = vec![0.0; native.heap_size()];
        let value = native.eval(&[0.5, 3.0], &mut scratch);
        assert_eq!(value, 0.5f64.sin() / 9.0);
    }
}
