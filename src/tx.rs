use num_traits::FromPrimitive;
use rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};

use crate::common::{contract_addr, Addr, AssetId, Gas, Hash, Share};
use crate::core::ContractCode;

#[derive(Clone, Copy, PartialEq, Eq, Debug, FromPrimitive)]
pub enum OpType {
    RegisterAccount = 0x0,
    Mint,
    Transfer,
    ContractCreate,
    NativeContractCreate,
    ContractInvoke,
}

#[derive(
    Clone, PartialEq, Debug, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct RegisterAccountOp {
    pub addr: Addr,
    pub pubkey: String,
}

/// Authorized creation of an asset amount.
#[derive(
    Clone, PartialEq, Debug, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct MintOp {
    pub account: Addr,
    pub asset_id: AssetId,
    pub amount: Share,
}

#[derive(
    Clone, PartialEq, Debug, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct TransferOp {
    pub from: Addr,
    pub to: Addr,
    pub asset_id: AssetId,
    pub amount: Share,
}

#[derive(
    Clone, PartialEq, Debug, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct ContractCreateOp {
    pub caller_addr: Addr,
    pub contract_code: ContractCode,
    pub gas_limit: Gas,
    pub op_time: u64,
}

impl ContractCreateOp {
    pub fn contract_address(&self) -> Addr {
        contract_addr(self.contract_code.code_hash().as_bytes(), self.op_time)
    }
}

#[derive(
    Clone, PartialEq, Debug, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct NativeContractCreateOp {
    pub caller_addr: Addr,
    pub template_key: String,
    pub gas_limit: Gas,
    pub op_time: u64,
}

impl NativeContractCreateOp {
    pub fn contract_address(&self) -> Addr {
        contract_addr(self.template_key.as_bytes(), self.op_time)
    }
}

/// Call of a contract API, optionally depositing an asset into the contract first. A
/// `deposit_amount` of zero means no deposit.
#[derive(
    Clone, PartialEq, Debug, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct ContractInvokeOp {
    pub caller_addr: Addr,
    pub contract_address: Addr,
    pub contract_api: String,
    pub contract_arg: String,
    pub gas_limit: Gas,
    #[serde(default)]
    pub deposit_asset_id: AssetId,
    #[serde(default)]
    pub deposit_amount: Share,
    pub op_time: u64,
}

impl ContractInvokeOp {
    #[inline]
    pub fn has_deposit(&self) -> bool {
        self.deposit_amount > 0
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Operation {
    RegisterAccount(RegisterAccountOp),
    Mint(MintOp),
    Transfer(TransferOp),
    ContractCreate(ContractCreateOp),
    NativeContractCreate(NativeContractCreateOp),
    ContractInvoke(ContractInvokeOp),
}

impl Operation {
    pub fn type_(&self) -> OpType {
        match self {
            Self::RegisterAccount(_) => OpType::RegisterAccount,
            Self::Mint(_) => OpType::Mint,
            Self::Transfer(_) => OpType::Transfer,
            Self::ContractCreate(_) => OpType::ContractCreate,
            Self::NativeContractCreate(_) => OpType::NativeContractCreate,
            Self::ContractInvoke(_) => OpType::ContractInvoke,
        }
    }

    /// Typed envelope: the type byte followed by the RLP of the operation body.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.type_() as u8];
        let body = match self {
            Self::RegisterAccount(op) => rlp::encode(op),
            Self::Mint(op) => rlp::encode(op),
            Self::Transfer(op) => rlp::encode(op),
            Self::ContractCreate(op) => rlp::encode(op),
            Self::NativeContractCreate(op) => rlp::encode(op),
            Self::ContractInvoke(op) => rlp::encode(op),
        };
        out.extend_from_slice(&body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None
        }
        let rlp = rlp::Rlp::new(&bytes[1..]);
        Some(match OpType::from_u8(bytes[0])? {
            OpType::RegisterAccount => Self::RegisterAccount(rlp.as_val().ok()?),
            OpType::Mint => Self::Mint(rlp.as_val().ok()?),
            OpType::Transfer => Self::Transfer(rlp.as_val().ok()?),
            OpType::ContractCreate => Self::ContractCreate(rlp.as_val().ok()?),
            OpType::NativeContractCreate => {
                Self::NativeContractCreate(rlp.as_val().ok()?)
            }
            OpType::ContractInvoke => Self::ContractInvoke(rlp.as_val().ok()?),
        })
    }

    /// Address of the contract this operation creates, if any.
    pub fn created_contract(&self) -> Option<Addr> {
        match self {
            Self::ContractCreate(op) => Some(op.contract_address()),
            Self::NativeContractCreate(op) => Some(op.contract_address()),
            _ => None,
        }
    }
}

impl rlp::Encodable for Operation {
    fn rlp_append(&self, s: &mut rlp::RlpStream) {
        s.encoder().encode_value(&self.encode())
    }
}

impl rlp::Decodable for Operation {
    fn decode(rlp: &rlp::Rlp) -> Result<Self, rlp::DecoderError> {
        rlp.decoder().decode_value(|bytes| {
            Operation::decode(bytes)
                .ok_or(rlp::DecoderError::Custom("invalid operation"))
        })
    }
}

#[derive(
    Clone, PartialEq, Debug, Serialize, Deserialize, RlpEncodable, RlpDecodable,
)]
pub struct Transaction {
    pub nonce: u64,
    pub tx_time: u64,
    pub operations: Vec<Operation>,
}

impl Transaction {
    pub fn new(nonce: u64, tx_time: u64, operations: Vec<Operation>) -> Self {
        Self {
            nonce,
            tx_time,
            operations,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        rlp::encode(self).to_vec()
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        rlp::decode(bytes).ok()
    }

    /// Transaction id: Keccak-256 of the canonical encoding.
    pub fn tx_id(&self) -> Hash {
        Hash::hash(&self.encode())
    }
}

#[cfg(test)]
fn sample_tx() -> Transaction {
    let caller = Addr::account("caller1");
    Transaction::new(
        1,
        1_600_000_000,
        vec![
            Operation::Mint(MintOp {
                account: caller.clone(),
                asset_id: 0,
                amount: 123,
            }),
            Operation::NativeContractCreate(NativeContractCreateOp {
                caller_addr: caller.clone(),
                template_key: "token".into(),
                gas_limit: 10000,
                op_time: 1_600_000_000,
            }),
            Operation::ContractInvoke(ContractInvokeOp {
                caller_addr: caller,
                contract_address: Addr::new("CONabc"),
                contract_api: "transfer".into(),
                contract_arg: "SPLcaller2,10".into(),
                gas_limit: 10000,
                deposit_asset_id: 0,
                deposit_amount: 0,
                op_time: 1_600_000_000,
            }),
        ],
    )
}

#[test]
fn test_tx_codec() {
    let tx = sample_tx();
    let bytes = tx.encode();
    let tx2 = Transaction::decode(&bytes).unwrap();
    assert_eq!(tx, tx2);
    assert_eq!(tx.tx_id(), tx2.tx_id());
    let mut tx3 = tx.clone();
    tx3.nonce = 2;
    assert_ne!(tx.tx_id(), tx3.tx_id());
    assert!(Operation::decode(&[0xff, 0xc0]).is_none());
    assert!(Operation::decode(&[]).is_none());
}

#[test]
fn test_tx_json() {
    let tx = sample_tx();
    let s = serde_json::to_string(&tx).unwrap();
    assert!(s.contains("\"type\":\"native_contract_create\""));
    let tx2: Transaction = serde_json::from_str(&s).unwrap();
    assert_eq!(tx, tx2);
    assert_eq!(
        tx.operations[1].created_contract(),
        Some(contract_addr(b"token", 1_600_000_000))
    );
}
