//! x86-64 scalar SSE2 and general-purpose instruction encoding.
//!
//! Each function emits raw machine code bytes for one instruction. Memory
//! operands always use `[base + disp32]` (ModRM mod=10) so every load and
//! store of a given kind has the same length.

use crate::graph::Operation;

/// General-purpose register number as encoded in ModRM / opcode low bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rdx = 2,
    Rbx = 3,
    Rsi = 6,
    Rdi = 7,
}

/// SSE register number (xmm0-xmm7; no REX needed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Xmm(pub u8);

pub const XMM0: Xmm = Xmm(0);

// =============================================================================
// Encoding Helpers
// =============================================================================

#[inline]
fn modrm_disp32(reg: u8, base: Gpr) -> u8 {
    0x80 | ((reg & 7) << 3) | (base as u8)
}

/// Emit `F2 0F <opcode> modrm disp32`, the scalar-double memory form.
fn emit_sd_mem(code: &mut Vec<u8>, opcode: u8, reg: Xmm, base: Gpr, disp: i32) {
    debug_assert!(reg.0 < 8);
    code.extend_from_slice(&[0xF2, 0x0F, opcode, modrm_disp32(reg.0, base)]);
    code.extend_from_slice(&disp.to_le_bytes());
}

// =============================================================================
// Load / Store
// =============================================================================

/// MOVSD xmm, [base + disp32]
pub fn emit_movsd_load(code: &mut Vec<u8>, dst: Xmm, base: Gpr, disp: i32) {
    emit_sd_mem(code, 0x10, dst, base, disp);
}

/// MOVSD [base + disp32], xmm
pub fn emit_movsd_store(code: &mut Vec<u8>, base: Gpr, disp: i32, src: Xmm) {
    emit_sd_mem(code, 0x11, src, base, disp);
}

/// MOV rax, imm64
pub fn emit_mov_rax_imm64(code: &mut Vec<u8>, imm: u64) {
    code.extend_from_slice(&[0x48, 0xB8]);
    code.extend_from_slice(&imm.to_le_bytes());
}

/// MOV [base + disp32], rax
pub fn emit_mov_store_rax(code: &mut Vec<u8>, base: Gpr, disp: i32) {
    code.extend_from_slice(&[0x48, 0x89, modrm_disp32(Gpr::Rax as u8, base)]);
    code.extend_from_slice(&disp.to_le_bytes());
}

/// MOV dst, src (64-bit)
pub fn emit_mov_rr(code: &mut Vec<u8>, dst: Gpr, src: Gpr) {
    code.extend_from_slice(&[0x48, 0x89, 0xC0 | ((src as u8) << 3) | (dst as u8)]);
}

// =============================================================================
// Arithmetic (scalar double)
// =============================================================================

/// ADDSD / SUBSD / MULSD / DIVSD xmm, [base + disp32]
pub fn emit_arith_mem(code: &mut Vec<u8>, op: Operation, dst: Xmm, base: Gpr, disp: i32) {
    let opcode = match op {
        Operation::Add => 0x58,
        Operation::Sub => 0x5C,
        Operation::Mul => 0x59,
        Operation::Div => 0x5E,
    };
    emit_sd_mem(code, opcode, dst, base, disp);
}

/// MULSD dst, src
pub fn emit_mulsd_rr(code: &mut Vec<u8>, dst: Xmm, src: Xmm) {
    code.extend_from_slice(&[0xF2, 0x0F, 0x59, 0xC0 | ((dst.0 & 7) << 3) | (src.0 & 7)]);
}

// =============================================================================
// Stack / Control Flow
// =============================================================================

/// PUSH r64
pub fn emit_push(code: &mut Vec<u8>, reg: Gpr) {
    code.push(0x50 + reg as u8);
}

/// POP r64
pub fn emit_pop(code: &mut Vec<u8>, reg: Gpr) {
    code.push(0x58 + reg as u8);
}

/// CALL [base + disp8]
pub fn emit_call_mem_disp8(code: &mut Vec<u8>, base: Gpr, disp: u8) {
    code.extend_from_slice(&[0xFF, 0x50 | (base as u8), disp]);
}

/// RET
pub fn emit_ret(code: &mut Vec<u8>) {
    code.push(0xC3);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(f: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut code = Vec::new();
        f(&mut code);
        code
    }

    #[test]
    fn movsd_uses_disp32_forms() {
        assert_eq!(
            encode(|c| emit_movsd_load(c, XMM0, Gpr::Rdi, 128)),
            [0xF2, 0x0F, 0x10, 0x87, 0x80, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            encode(|c| emit_movsd_store(c, Gpr::Rbx, 136, XMM0)),
            [0xF2, 0x0F, 0x11, 0x83, 0x88, 0x00, 0x00, 0x00]
        );
        assert_eq!(
            encode(|c| emit_movsd_load(c, XMM0, Gpr::Rbx, -8)),
            [0xF2, 0x0F, 0x10, 0x83, 0xF8, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn arithmetic_opcodes() {
        let ops = [
            (Operation::Add, 0x58),
            (Operation::Sub, 0x5C),
            (Operation::Mul, 0x59),
            (Operation::Div, 0x5E),
        ];
        for (op, opcode) in ops {
            assert_eq!(
                encode(|c| emit_arith_mem(c, op, XMM0, Gpr::Rbx, 256)),
                [0xF2, 0x0F, opcode, 0x83, 0x00, 0x01, 0x00, 0x00]
            );
        }
        assert_eq!(encode(|c| emit_mulsd_rr(c, XMM0, XMM0)), [0xF2, 0x0F, 0x59, 0xC0]);
    }

    #[test]
    fn general_purpose_encodings() {
        assert_eq!(encode(|c| emit_mov_rr(c, Gpr::Rbx, Gpr::Rsi)), [0x48, 0x89, 0xF3]);
        assert_eq!(encode(|c| emit_push(c, Gpr::Rbx)), [0x53]);
        assert_eq!(encode(|c| emit_push(c, Gpr::Rdi)), [0x57]);
        assert_eq!(encode(|c| emit_pop(c, Gpr::Rdx)), [0x5A]);
        assert_eq!(encode(|c| emit_call_mem_disp8(c, Gpr::Rdx, 16)), [0xFF, 0x52, 0x10]);
        assert_eq!(
            encode(|c| emit_mov_store_rax(c, Gpr::Rbx, 128)),
            [0x48, 0x89, 0x83, 0x80, 0x00, 0x00, 0x00]
        );
        let mut expected = vec![0x48, 0xB8];
        expected.extend_from_slice(&1.5f64.to_bits().to_le_bytes());
        assert_eq!(encode(|c| emit_mov_rax_imm64(c, 1.5f64.to_bits())), expected);
    }
}
