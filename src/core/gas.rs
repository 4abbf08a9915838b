use super::{gas_checked_add, gas_checked_mul, ExecError};
use crate::common::Gas;

/// Monotonic gas counter bounded by the caller-supplied limit. Usage from all sources is summed.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct GasMeter {
    limit: Gas,
    used: Gas,
}

impl GasMeter {
    pub fn new(limit: Gas) -> Self {
        Self { limit, used: 0 }
    }

    #[inline(always)]
    pub fn limit(&self) -> Gas {
        self.limit
    }

    #[inline(always)]
    pub fn used(&self) -> Gas {
        self.used
    }

    #[inline(always)]
    pub fn remaining(&self) -> Gas {
        self.limit - self.used
    }

    /// Add `gas` to the usage. Exceeding the limit fails and leaves the counter saturated at the
    /// limit.
    pub fn charge(&mut self, gas: Gas) -> Result<(), ExecError> {
        let used = gas_checked_add(self.used, gas)?;
        if used > self.limit {
            self.used = self.limit;
            return Err(ExecError::OutOfGas)
        }
        self.used = used;
        Ok(())
    }

    /// Charge `bytes` at `price` per byte.
    pub fn charge_bytes(
        &mut self, bytes: usize, price: Gas,
    ) -> Result<(), ExecError> {
        self.charge(gas_checked_mul(bytes as Gas, price)?)
    }
}

#[test]
fn test_gas_meter() {
    let mut m = GasMeter::new(100);
    m.charge(40).unwrap();
    m.charge_bytes(5, 10).unwrap();
    assert_eq!(m.used(), 90);
    assert_eq!(m.remaining(), 10);
    assert_eq!(m.charge(11), Err(ExecError::OutOfGas));
    assert_eq!(m.used(), 100);
    assert_eq!(m.charge(Gas::MAX), Err(ExecError::GasIntOverflow));
}
