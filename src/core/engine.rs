//! Execution-engine interface and `StackEngine`, a small reference stack machine.
//!
//! A program is the RLP list `[entries, instructions]` stored in [ContractCode::code]. Every
//! entry maps an API name to the instruction it starts at. Binary operators pop their right-hand
//! operand first, so `Push a; Push b; Sub` computes `a - b`.

use log::debug;
use num_traits::FromPrimitive;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

use super::stack::Stack;
use super::{ContractCode, ExecError};
use crate::common::{Addr, AssetId, Bytes, Share};
use crate::core::LedgerR;
use crate::state::EvaluateState;
use crate::value::Value;

/// Caller and callee of one contract API invocation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CallContext {
    pub caller: Addr,
    pub contract: Addr,
}

/// What the engine reports back after running an API.
#[derive(Clone, PartialEq, Debug)]
pub struct ExecOutcome {
    pub result: Value,
    /// Number of instructions executed, billed as gas.
    pub instructions: u64,
    pub status: Result<(), ExecError>,
}

/// Runs contract code. All storage, balance and event access goes through the evaluation state,
/// so code observes the pending writes of its own operation.
pub trait ExecutionEngine {
    fn execute(
        &self, code: &ContractCode, api: &str, arg: &str, ctx: &CallContext,
        state: &mut EvaluateState<'_>, limit: u64,
    ) -> ExecOutcome;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive)]
pub enum Opcode {
    Stop = 0x00,
    Add = 0x01,
    Mul = 0x02,
    Sub = 0x03,
    Lt = 0x10,
    Gt = 0x11,
    Eql = 0x14,
    IsZero = 0x15,
    Concat = 0x20,
    Address = 0x30,
    Balance = 0x31,
    Caller = 0x33,
    Arg = 0x35,
    Number = 0x43,
    Pop = 0x50,
    SLoad = 0x54,
    SStore = 0x55,
    Jump = 0x56,
    JumpI = 0x57,
    MapGet = 0x58,
    MapSet = 0x59,
    Push = 0x60,
    Dup = 0x80,
    Swap = 0x90,
    Emit = 0xa0,
    Transfer = 0xf0,
    Return = 0xf3,
    Revert = 0xfd,
}

/// One decoded instruction. `Push` carries the pushed value, `Dup`/`Swap` a position and
/// `Jump`/`JumpI` a destination.
#[derive(Clone, PartialEq, Debug)]
pub struct Inst {
    pub opcode: Opcode,
    pub operand: Option<Value>,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Entry {
    pub api: String,
    pub pc: u64,
    /// Read-only API.
    pub offline: bool,
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct Program {
    pub entries: Vec<Entry>,
    pub insts: Vec<Inst>,
}

impl Encodable for Inst {
    fn rlp_append(&self, s: &mut RlpStream) {
        match &self.operand {
            Some(v) => {
                s.begin_list(2);
                s.append(&(self.opcode as u8));
                s.append(v);
            }
            None => {
                s.begin_list(1);
                s.append(&(self.opcode as u8));
            }
        }
    }
}

impl Decodable for Inst {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        let raw: u8 = rlp.val_at(0)?;
        let opcode = Opcode::from_u8(raw)
            .ok_or(DecoderError::Custom("unknown opcode"))?;
        let operand = match rlp.item_count()? {
            1 => None,
            2 => Some(rlp.val_at(1)?),
            _ => return Err(DecoderError::RlpIncorrectListLen),
        };
        Ok(Self { opcode, operand })
    }
}

impl Encodable for Entry {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(3);
        s.append(&self.api);
        s.append(&self.pc);
        s.append(&self.offline);
    }
}

impl Decodable for Entry {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            api: rlp.val_at(0)?,
            pc: rlp.val_at(1)?,
            offline: rlp.val_at(2)?,
        })
    }
}

impl Encodable for Program {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(2);
        s.append_list::<Entry, _>(&self.entries);
        s.append_list::<Inst, _>(&self.insts);
    }
}

impl Decodable for Program {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        Ok(Self {
            entries: rlp.list_at(0)?,
            insts: rlp.list_at(1)?,
        })
    }
}

impl Program {
    pub fn from_code(code: &ContractCode) -> Result<Self, ExecError> {
        rlp::decode(&code.code)
            .map_err(|e| ExecError::InvalidCode(e.to_string()))
    }

    pub fn entry(&self, api: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.api == api)
    }

    /// Package the program as contract code. The ABI lists follow the entries.
    pub fn into_code(self, events: Vec<String>) -> ContractCode {
        let abi = self
            .entries
            .iter()
            .filter(|e| !e.offline)
            .map(|e| e.api.clone())
            .collect();
        let offline_abi = self
            .entries
            .iter()
            .filter(|e| e.offline)
            .map(|e| e.api.clone())
            .collect();
        ContractCode {
            abi,
            offline_abi,
            events,
            code: Bytes::from(rlp::encode(&self).to_vec()),
        }
    }
}

/// Assembler for [Program]s with named jump labels.
#[derive(Default)]
pub struct ProgramBuilder {
    entries: Vec<Entry>,
    insts: Vec<(Opcode, Operand)>,
    labels: Vec<(String, u64)>,
    events: Vec<String>,
}

enum Operand {
    None,
    Value(Value),
    Label(String),
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an on-chain API at the next instruction.
    pub fn api(mut self, name: &str) -> Self {
        self.add_entry(name, false);
        self
    }

    /// Start a read-only API at the next instruction.
    pub fn offline_api(mut self, name: &str) -> Self {
        self.add_entry(name, true);
        self
    }

    fn add_entry(&mut self, name: &str, offline: bool) {
        self.entries.push(Entry {
            api: name.to_string(),
            pc: self.insts.len() as u64,
            offline,
        })
    }

    pub fn event(mut self, name: &str) -> Self {
        self.events.push(name.to_string());
        self
    }

    pub fn label(mut self, name: &str) -> Self {
        self.labels.push((name.to_string(), self.insts.len() as u64));
        self
    }

    pub fn op(mut self, opcode: Opcode) -> Self {
        self.insts.push((opcode, Operand::None));
        self
    }

    pub fn push<V: Into<Value>>(mut self, v: V) -> Self {
        self.insts.push((Opcode::Push, Operand::Value(v.into())));
        self
    }

    pub fn dup(mut self, pos: u64) -> Self {
        self.insts.push((Opcode::Dup, Operand::Value(pos.into())));
        self
    }

    pub fn swap(mut self, pos: u64) -> Self {
        self.insts.push((Opcode::Swap, Operand::Value(pos.into())));
        self
    }

    pub fn jump(mut self, label: &str) -> Self {
        self.insts.push((Opcode::Jump, Operand::Label(label.to_string())));
        self
    }

    pub fn jumpi(mut self, label: &str) -> Self {
        self.insts
            .push((Opcode::JumpI, Operand::Label(label.to_string())));
        self
    }

    /// Resolve labels. An undefined label is reported by name.
    pub fn build(self) -> Result<Program, String> {
        let labels = self.labels;
        let mut insts = Vec::with_capacity(self.insts.len());
        for (opcode, operand) in self.insts {
            let operand = match operand {
                Operand::None => None,
                Operand::Value(v) => Some(v),
                Operand::Label(name) => {
                    let pc = labels
                        .iter()
                        .find(|(l, _)| *l == name)
                        .map(|(_, pc)| *pc)
                        .ok_or_else(|| format!("undefined label {}", name))?;
                    Some(pc.into())
                }
            };
            insts.push(Inst { opcode, operand })
        }
        Ok(Program {
            entries: self.entries,
            insts,
        })
    }

    pub fn build_code(self) -> Result<ContractCode, String> {
        let events = self.events.clone();
        Ok(self.build()?.into_code(events))
    }
}

/// Reference engine interpreting [Program]s. One executed instruction costs one unit of gas.
#[derive(Clone, Copy, Default, Debug)]
pub struct StackEngine;

struct Machine<'a, 'b, 'c> {
    insts: &'a [Inst],
    pc: usize,
    stack: Stack,
    arg: &'a str,
    ctx: &'a CallContext,
    state: &'b mut EvaluateState<'c>,
}

enum Flow {
    Next,
    Jump(usize),
    Return(Value),
}

fn pop_int(stack: &mut Stack) -> Result<i64, ExecError> {
    stack.consume1()?.as_int().ok_or(ExecError::TypeMismatch("int"))
}

fn pop_text(stack: &mut Stack) -> Result<String, ExecError> {
    match stack.consume1()? {
        Value::Text(s) => Ok(s),
        _ => Err(ExecError::TypeMismatch("text")),
    }
}

fn pop_addr(stack: &mut Stack) -> Result<Addr, ExecError> {
    let addr = Addr::new(pop_text(stack)?);
    if !addr.is_valid() {
        return Err(ExecError::Contract(format!("invalid address `{}`", addr)))
    }
    Ok(addr)
}

fn pop_asset(stack: &mut Stack) -> Result<AssetId, ExecError> {
    AssetId::try_from(pop_int(stack)?)
        .map_err(|_| ExecError::TypeMismatch("asset id"))
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        _ => true,
    }
}

/// Text form used by `Concat` and `Emit`: text as is, anything else as JSON.
fn to_text(v: Value) -> String {
    match v {
        Value::Text(s) => s,
        v => v.to_string(),
    }
}

fn operand_pos(inst: &Inst) -> Result<usize, ExecError> {
    inst.operand
        .as_ref()
        .and_then(|v| v.as_int())
        .and_then(|i| usize::try_from(i).ok())
        .ok_or_else(|| ExecError::InvalidCode("missing operand".into()))
}

impl<'a, 'b, 'c> Machine<'a, 'b, 'c> {
    #[inline(always)]
    fn arith(
        &mut self, f: fn(i64, i64) -> Option<i64>,
    ) -> Result<(), ExecError> {
        let b = pop_int(&mut self.stack)?;
        let a = pop_int(&mut self.stack)?;
        let r = f(a, b)
            .ok_or_else(|| ExecError::Contract("integer overflow".into()))?;
        self.stack.push(Value::Int(r))
    }

    #[inline(always)]
    fn compare(&mut self, f: fn(i64, i64) -> bool) -> Result<(), ExecError> {
        let b = pop_int(&mut self.stack)?;
        let a = pop_int(&mut self.stack)?;
        self.stack.push(Value::Bool(f(a, b)))
    }

    fn jump_dest(&self, inst: &Inst) -> Result<usize, ExecError> {
        let dest = operand_pos(inst).map_err(|_| ExecError::InvalidJump)?;
        if dest >= self.insts.len() {
            return Err(ExecError::InvalidJump)
        }
        Ok(dest)
    }

    fn step(&mut self, inst: &Inst) -> Result<Flow, ExecError> {
        use Opcode::*;
        let ctx = self.ctx;
        let contract = &ctx.contract;
        match inst.opcode {
            Stop => return Ok(Flow::Return(Value::Null)),
            Add => self.arith(i64::checked_add)?,
            Mul => self.arith(i64::checked_mul)?,
            Sub => self.arith(i64::checked_sub)?,
            Lt => self.compare(|a, b| a < b)?,
            Gt => self.compare(|a, b| a > b)?,
            Eql => {
                let (b, a) = self.stack.consume2()?;
                self.stack.push(Value::Bool(a == b))?
            }
            IsZero => {
                let v = self.stack.consume1()?;
                self.stack.push(Value::Bool(!truthy(&v)))?
            }
            Concat => {
                let (b, a) = self.stack.consume2()?;
                let mut s = to_text(a);
                s.push_str(&to_text(b));
                self.stack.push(Value::Text(s))?
            }
            Address => self.stack.push(contract.as_str().into())?,
            Caller => self.stack.push(ctx.caller.as_str().into())?,
            Arg => self.stack.push(self.arg.into())?,
            Number => {
                let n = self.state.head_block_number() + 1;
                self.stack.push(n.into())?
            }
            Balance => {
                let asset = pop_asset(&mut self.stack)?;
                let addr = pop_addr(&mut self.stack)?;
                let balance = self.state.get_balance(&addr, asset);
                self.stack.push(balance.into())?
            }
            Pop => {
                self.stack.consume1()?;
            }
            SLoad => {
                let slot = pop_text(&mut self.stack)?;
                let v = self.state.get_storage(contract, &slot);
                self.stack.push(v)?
            }
            SStore => {
                let v = self.stack.consume1()?;
                let slot = pop_text(&mut self.stack)?;
                self.state.set_storage(contract, &slot, v)
            }
            MapGet => {
                let key = to_text(self.stack.consume1()?);
                let name = pop_text(&mut self.stack)?;
                let v = self.state.get_map(contract, &name, &key);
                self.stack.push(v)?
            }
            MapSet => {
                let v = self.stack.consume1()?;
                let key = to_text(self.stack.consume1()?);
                let name = pop_text(&mut self.stack)?;
                self.state.set_map(contract, &name, &key, v)
            }
            Jump => return Ok(Flow::Jump(self.jump_dest(inst)?)),
            JumpI => {
                let dest = self.jump_dest(inst)?;
                if truthy(&self.stack.consume1()?) {
                    return Ok(Flow::Jump(dest))
                }
            }
            Push => {
                let v = inst.operand.clone().ok_or_else(|| {
                    ExecError::InvalidCode("missing operand".into())
                })?;
                self.stack.push(v)?
            }
            Dup => self.stack.dup(operand_pos(inst)?)?,
            Swap => self.stack.swap(operand_pos(inst)?)?,
            Emit => {
                let arg = to_text(self.stack.consume1()?);
                let name = pop_text(&mut self.stack)?;
                self.state.emit_event(contract, &ctx.caller, &name, &arg)
            }
            Transfer => {
                let amount = pop_int(&mut self.stack)?;
                let asset = pop_asset(&mut self.stack)?;
                let to = pop_addr(&mut self.stack)?;
                if amount <= 0 {
                    return Err(ExecError::Contract(
                        "transfer amount must be positive".into(),
                    ))
                }
                self.state
                    .transfer(contract, &to, asset, amount as Share)?
            }
            Return => return Ok(Flow::Return(self.stack.consume1()?)),
            Revert => {
                return Err(ExecError::Contract(to_text(self.stack.consume1()?)))
            }
        }
        Ok(Flow::Next)
    }
}

impl ExecutionEngine for StackEngine {
    fn execute(
        &self, code: &ContractCode, api: &str, arg: &str, ctx: &CallContext,
        state: &mut EvaluateState<'_>, limit: u64,
    ) -> ExecOutcome {
        let failed = |err| ExecOutcome {
            result: Value::Null,
            instructions: 0,
            status: Err(err),
        };
        let program = match Program::from_code(code) {
            Ok(p) => p,
            Err(e) => return failed(e),
        };
        let pc = match program.entry(api) {
            Some(e) => e.pc as usize,
            None => return failed(ExecError::ApiNotFound(api.to_string())),
        };
        let mut m = Machine {
            insts: &program.insts,
            pc,
            stack: Stack::new(),
            arg,
            ctx,
            state,
        };
        let mut instructions = 0;
        let status = loop {
            // running off the end behaves like `Stop`
            let inst = match program.insts.get(m.pc) {
                Some(inst) => inst,
                None => break Ok(Value::Null),
            };
            if instructions == limit {
                break Err(ExecError::OutOfGas)
            }
            instructions += 1;
            match m.step(inst) {
                Ok(Flow::Next) => m.pc += 1,
                Ok(Flow::Jump(dest)) => m.pc = dest,
                Ok(Flow::Return(v)) => break Ok(v),
                Err(e) => break Err(e),
            }
        };
        debug!(
            "{}::{} executed {} instructions (stack depth {})",
            ctx.contract,
            api,
            instructions,
            m.stack.len()
        );
        match status {
            Ok(result) => ExecOutcome {
                result,
                instructions,
                status: Ok(()),
            },
            Err(e) => ExecOutcome {
                result: Value::Null,
                instructions,
                status: Err(e),
            },
        }
    }
}

#[cfg(test)]
fn run(
    code: &ContractCode, api: &str, arg: &str, limit: u64,
) -> (ExecOutcome, crate::state::StateChanges) {
    let ledger = crate::state::MemLedger::new();
    let ctx = CallContext {
        caller: Addr::account("caller"),
        contract: Addr::new("CONtest"),
    };
    let mut state = EvaluateState::new(&ledger, limit);
    let out = StackEngine.execute(code, api, arg, &ctx, &mut state, limit);
    (out, state.finish().0)
}

#[test]
fn test_arith_and_return() {
    let code = ProgramBuilder::new()
        .api("calc")
        .push(7i64)
        .push(3i64)
        .op(Opcode::Sub)
        .push(5i64)
        .op(Opcode::Mul)
        .op(Opcode::Return)
        .build_code()
        .unwrap();
    assert_eq!(code.abi, vec!["calc".to_string()]);
    let (out, _) = run(&code, "calc", "", 100);
    assert_eq!(out.status, Ok(()));
    assert_eq!(out.result, Value::Int(20));
    assert_eq!(out.instructions, 6);
}

#[test]
fn test_loop_and_limit() {
    // count down from the argument-independent constant 10
    let code = ProgramBuilder::new()
        .api("loop")
        .push(10i64)
        .label("top")
        .dup(1)
        .op(Opcode::IsZero)
        .jumpi("done")
        .push(1i64)
        .op(Opcode::Sub)
        .jump("top")
        .label("done")
        .op(Opcode::Return)
        .build_code()
        .unwrap();
    let (out, _) = run(&code, "loop", "", 1000);
    assert_eq!(out.status, Ok(()));
    assert_eq!(out.result, Value::Int(0));
    // 1 + 10 * 6 + 3 + 1
    assert_eq!(out.instructions, 65);
    let (out, _) = run(&code, "loop", "", 20);
    assert_eq!(out.status, Err(ExecError::OutOfGas));
    assert_eq!(out.instructions, 20);
}

#[test]
fn test_storage_and_events() {
    let code = ProgramBuilder::new()
        .api("init")
        .push("owner")
        .op(Opcode::Caller)
        .op(Opcode::SStore)
        .push("seen")
        .op(Opcode::Arg)
        .push(true)
        .op(Opcode::MapSet)
        .push("Inited")
        .op(Opcode::Arg)
        .op(Opcode::Emit)
        .op(Opcode::Stop)
        .event("Inited")
        .build_code()
        .unwrap();
    let (out, changes) = run(&code, "init", "hello", 100);
    assert_eq!(out.status, Ok(()));
    let slots = &changes.storage[&Addr::new("CONtest")];
    assert_eq!(slots["owner"].after, Value::Text("SPLcaller".into()));
    assert_eq!(slots["seen.hello"].after, Value::Bool(true));
    assert_eq!(changes.events.len(), 1);
    assert_eq!(changes.events[0].event_arg, "hello");
    assert_eq!(changes.events[0].block_num, 1);
}

#[test]
fn test_errors() {
    let code = ProgramBuilder::new()
        .api("revert")
        .push("bad input")
        .op(Opcode::Revert)
        .api("underflow")
        .op(Opcode::Pop)
        .api("pay")
        .push("SPLsomeone")
        .push(0i64)
        .push(5i64)
        .op(Opcode::Transfer)
        .build_code()
        .unwrap();
    let (out, _) = run(&code, "revert", "", 100);
    assert_eq!(out.status, Err(ExecError::Contract("bad input".into())));
    let (out, _) = run(&code, "underflow", "", 100);
    assert_eq!(out.status, Err(ExecError::StackUnderflow));
    let (out, _) = run(&code, "missing", "", 100);
    assert_eq!(out.status, Err(ExecError::ApiNotFound("missing".into())));
    let (out, changes) = run(&code, "pay", "", 100);
    assert!(matches!(
        out.status,
        Err(ExecError::InsufficientBalance { .. })
    ));
    assert!(changes.balances.is_empty());
    assert!(ProgramBuilder::new().jump("nowhere").build().is_err());
}
