//! Bytecode disassembler, used by the `print-code` and `trace-execution`
//! features and handy when debugging the compiler by hand.

use std::fmt::Write;

use crate::bytecode::{Chunk, OpCode};
use crate::heap::Heap;

/// Render a whole chunk with a header line.
pub fn disassemble_chunk(chunk: &Chunk, name: &str, heap: &Heap) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== {name} ==");
    let mut offset = 0;
    while offset < chunk.code.len() {
        offset = disassemble_instruction(chunk, offset, heap, &mut out);
    }
    out
}

/// Render the instruction at `offset`, returning the offset of the next one.
pub fn disassemble_instruction(
    chunk: &Chunk,
    offset: usize,
    heap: &Heap,
    out: &mut String,
) -> usize {
    let _ = write!(out, "{offset:04} ");
    if offset > 0 && chunk.lines[offset] == chunk.lines[offset - 1] {
        let _ = write!(out, "   | ");
    } else {
        let _ = write!(out, "{:4} ", chunk.lines[offset]);
    }

    let Ok(op) = OpCode::try_from(chunk.code[offset]) else {
        let _ = writeln!(out, "Unknown opcode {}", chunk.code[offset]);
        return offset + 1;
    };

    match op {
        OpCode::Constant
        | OpCode::GetGlobal
        | OpCode::DefineGlobal
        | OpCode::SetGlobal
        | OpCode::GetProperty
        | OpCode::SetProperty
        | OpCode::Class
        | OpCode::Method => constant_instruction(op, chunk, offset, heap, out),
        OpCode::GetLocal
        | OpCode::SetLocal
        | OpCode::GetUpvalue
        | OpCode::SetUpvalue
        | OpCode::Call => byte_instruction(op, chunk, offset, out),
        OpCode::Jump | OpCode::JumpIfFalse => jump_instruction(op, 1, chunk, offset, out),
        OpCode::JumpBack => jump_instruction(op, -1, chunk, offset, out),
        OpCode::Closure => closure_instruction(chunk, offset, heap, out),
        _ => {
            let _ = writeln!(out, "{op:?}");
            offset + 1
        }
    }
}

fn constant_instruction(
    op: OpCode,
    chunk: &Chunk,
    offset: usize,
    heap: &Heap,
    out: &mut String,
) -> usize {
    let index = chunk.code[offset + 1];
    let value = chunk.constants[index as usize];
    let _ = writeln!(out, "{op:?} {index} '{}'", heap.format_value(value));
    offset + 2
}

fn byte_instruction(op: OpCode, chunk: &Chunk, offset: usize, out: &mut String) -> usize {
    let _ = writeln!(out, "{op:?} {}", chunk.code[offset + 1]);
    offset + 2
}

fn jump_instruction(
    op: OpCode,
    sign: isize,
    chunk: &Chunk,
    offset: usize,
    out: &mut String,
) -> usize {
    let jump = u16::from_be_bytes([chunk.code[offset + 1], chunk.code[offset + 2]]) as isize;
    let target = offset as isize + 3 + sign * jump;
    let _ = writeln!(out, "{op:?} {offset} -> {target}");
    offset + 3
}

fn closure_instruction(chunk: &Chunk, offset: usize, heap: &Heap, out: &mut String) -> usize {
    let index = chunk.code[offset + 1];
    let value = chunk.constants[index as usize];
    let _ = writeln!(out, "Closure {index} '{}'", heap.format_value(value));
    let upvalue_count = value
        .as_obj()
        .map(|r| heap.function(r).upvalue_count)
        .unwrap_or(0);
    let mut next = offset + 2;
    for _ in 0..upvalue_count {
        let is_local = chunk.code[next] == 1;
        let slot = chunk.code[next + 1];
        let _ = writeln!(
            out,
            "{next:04}    |      {} {slot}",
            if is_local { "local" } else { "upvalue" }
        );
        next += 2;
    }
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn disassembles_operands_and_jumps() {
        let heap = Heap::new();
        let mut chunk = Chunk::new();
        let index = chunk.add_constant(Value::Number(1.5));
        chunk.write_op(OpCode::Constant, 1);
        chunk.write(index as u8, 1);
        chunk.write_op(OpCode::JumpIfFalse, 1);
        chunk.write(0, 1);
        chunk.write(2, 1);
        chunk.write_op(OpCode::Pop, 2);
        chunk.write_op(OpCode::Return, 2);

        let text = disassemble_chunk(&chunk, "test", &heap);
        assert!(text.starts_with("== test ==\n"));
        assert!(text.contains("Constant 0 '1.5'"));
        assert!(text.contains("JumpIfFalse 2 -> 7"));
        assert!(text.contains("Return"));
    }
}
