use crate::common::{AssetId, Gas};

pub const ADDRESS_PREFIX: &str = "SPL";
pub const CONTRACT_ADDRESS_PREFIX: &str = "CON";

pub const CORE_ASSET_ID: AssetId = 0;
pub const CORE_ASSET_SYMBOL: &str = "COIN";
pub const CORE_ASSET_PRECISION: u32 = 5;

pub const MAX_STACK_DEPTH: usize = 1024;
/// Deepest nesting of lists, maps and tags accepted when decoding a value.
pub const MAX_VALUE_DEPTH: usize = 128;

// gas consumption parameters
pub const GAS_STORAGE_BYTE: Gas = 10;
pub const GAS_EVENT_BYTE: Gas = 2;
pub const GAS_NATIVE_API_CALL: Gas = 100;

pub const API_INIT: &str = "init";
pub const API_ON_DEPOSIT_ASSET: &str = "on_deposit_asset";
pub const API_ON_DESTROY: &str = "on_destroy";
pub const API_ON_UPGRADE: &str = "on_upgrade";

/// Contract APIs that the chain invokes on its own and callers may not name directly.
pub const SPECIAL_APIS: [&str; 4] =
    [API_INIT, API_ON_DEPOSIT_ASSET, API_ON_DESTROY, API_ON_UPGRADE];

#[inline]
pub fn is_special_api(api: &str) -> bool {
    SPECIAL_APIS.contains(&api)
}
