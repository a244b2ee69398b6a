//! Protocol constants. Fixed at compile time; not runtime-configurable.

pub const SECONDS_PER_DAY: u64 = 86_400;

/// Time from mint until collateral starts vesting out.
pub const VESTING_PERIOD: u64 = 1129 * SECONDS_PER_DAY;

/// Minimum spacing between two withdrawals of one vault.
pub const WITHDRAWAL_PERIOD: u64 = 30 * SECONDS_PER_DAY;

/// Per-period withdrawal rate: 875 / 100000 (0.875%).
pub const WITHDRAWAL_RATE_NUMERATOR: u128 = 875;
pub const WITHDRAWAL_RATE_DENOMINATOR: u128 = 100_000;

/// Inactivity after which a vault may be poked.
pub const DORMANCY_THRESHOLD: u64 = 1129 * SECONDS_PER_DAY;

/// Time an owner has to respond to a poke.
pub const GRACE_PERIOD: u64 = 30 * SECONDS_PER_DAY;

pub const BTC_DECIMALS: u32 = 8;

/// One whole BTC in satoshis.
pub const ONE_BTC: u128 = 100_000_000;

/// Below this population size tiers are withheld.
pub const MIN_VAULTS_FOR_PERCENTILE: usize = 10;

pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";
