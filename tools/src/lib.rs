pub mod dummy;

use num_traits::FromPrimitive;
use simplechain::core::engine::{Opcode, Program};
use simplechain::core::ContractCode;

pub fn opcode_to_str(opcode: u8) -> Option<&'static str> {
    let opcode: Option<Opcode> = FromPrimitive::from_u8(opcode);
    use Opcode::*;
    opcode.map(|opcode| match opcode {
        Stop => "Stop",
        Add => "Add",
        Mul => "Mul",
        Sub => "Sub",
        Lt => "Lt",
        Gt => "Gt",
        Eql => "Eql",
        IsZero => "IsZero",
        Concat => "Concat",
        Address => "Address",
        Balance => "Balance",
        Caller => "Caller",
        Arg => "Arg",
        Number => "Number",
        Pop => "Pop",
        SLoad => "SLoad",
        SStore => "SStore",
        Jump => "Jump",
        JumpI => "JumpI",
        MapGet => "MapGet",
        MapSet => "MapSet",
        Push => "Push",
        Dup => "Dup",
        Swap => "Swap",
        Emit => "Emit",
        Transfer => "Transfer",
        Return => "Return",
        Revert => "Revert",
    })
}

/// Disassemble the program stored in contract code. API entry points are shown as labels.
pub fn disasm(code: &ContractCode, line_breaks: bool) -> Option<String> {
    let program = Program::from_code(code).ok()?;
    let mut asm = Vec::new();
    for (i, inst) in program.insts.iter().enumerate() {
        for e in program.entries.iter().filter(|e| e.pc as usize == i) {
            asm.push(format!(
                "[{}{}]",
                e.api,
                if e.offline { " (offline)" } else { "" }
            ));
        }
        let prefix = if line_breaks {
            format!("{:04x} ", i)
        } else {
            "".into()
        };
        let name = opcode_to_str(inst.opcode as u8).unwrap_or("?");
        match &inst.operand {
            Some(v) => asm.push(format!("{}{} {}", prefix, name, v)),
            None => asm.push(format!("{}{}", prefix, name)),
        }
    }
    Some(asm.join(if line_breaks { "\n" } else { " " }))
}
