use super::params::MAX_STACK_DEPTH;
use super::ExecError;
use crate::value::Value;

/// Operand stack of the reference engine.
pub struct Stack {
    stack: Vec<Value>,
}

impl Stack {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(16),
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    #[inline(always)]
    pub fn push(&mut self, val: Value) -> Result<(), ExecError> {
        if self.stack.len() == MAX_STACK_DEPTH {
            return Err(ExecError::StackOverflow)
        }
        self.stack.push(val);
        Ok(())
    }

    /// Push a copy of the `pos`-th item from the top (1 is the top itself).
    #[inline(always)]
    pub fn dup(&mut self, pos: usize) -> Result<(), ExecError> {
        if pos == 0 || pos > self.stack.len() {
            return Err(ExecError::StackUnderflow)
        }
        let val = self.stack[self.stack.len() - pos].clone();
        self.push(val)
    }

    /// Exchange the top with the item `pos` places below it.
    #[inline(always)]
    pub fn swap(&mut self, pos: usize) -> Result<(), ExecError> {
        if pos == 0 || pos + 1 > self.stack.len() {
            return Err(ExecError::StackUnderflow)
        }
        let top = self.stack.len() - 1;
        self.stack.swap(top, top - pos);
        Ok(())
    }

    #[inline(always)]
    pub fn consume1(&mut self) -> Result<Value, ExecError> {
        self.stack.pop().ok_or(ExecError::StackUnderflow)
    }

    /// Pop two items, the former top first.
    #[inline(always)]
    pub fn consume2(&mut self) -> Result<(Value, Value), ExecError> {
        if self.stack.len() > 1 {
            let a = self.consume1()?;
            let b = self.consume1()?;
            return Ok((a, b))
        }
        Err(ExecError::StackUnderflow)
    }
}

#[test]
fn test_stack_ops() {
    let mut s = Stack::new();
    s.push(Value::Int(1)).unwrap();
    s.push(Value::Int(2)).unwrap();
    s.dup(2).unwrap();
    assert_eq!(s.len(), 3);
    s.swap(2).unwrap();
    assert_eq!(s.consume2().unwrap(), (Value::Int(1), Value::Int(2)));
    assert_eq!(s.consume1().unwrap(), Value::Int(1));
    assert_eq!(s.consume1(), Err(ExecError::StackUnderflow));
    assert_eq!(s.dup(1), Err(ExecError::StackUnderflow));
}

#[test]
fn test_stack_overflow() {
    let mut s = Stack::new();
    for _ in 0..MAX_STACK_DEPTH {
        s.push(Value::Null).unwrap();
    }
    assert_eq!(s.push(Value::Null), Err(ExecError::StackOverflow));
}
