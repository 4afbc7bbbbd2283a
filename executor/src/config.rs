use anyhow::{Context, Result};
use tonkit_types::cell::Cell;
use tonkit_types::dict::Dict;
use tonkit_types::models::{
    shift_ceil_price, GasLimitsPrices, MsgForwardPrices, SizeLimitsConfig, StoragePrices,
    StorageInfo,
};
use tonkit_types::num::Tokens;
use tonkit_vm::GasParams;

/// Price and limit records unpacked from the blockchain config dictionary.
///
/// The raw dictionary root is kept as well since contracts read it through
/// the `c7` tuple.
pub struct ParsedConfig {
    pub mc_gas_prices: GasLimitsPrices,
    pub gas_prices: GasLimitsPrices,
    pub mc_fwd_prices: MsgForwardPrices,
    pub fwd_prices: MsgForwardPrices,
    pub size_limits: SizeLimitsConfig,
    /// Param 18 entries in ascending `utime_since` order.
    pub storage_prices: Vec<StoragePrices>,
    pub global_id: i32,
    pub raw: Cell,
}

impl ParsedConfig {
    /// Unpacks the params required by the executor from a config dictionary
    /// root cell.
    ///
    /// Gas prices (20, 21) and forward prices (24, 25) are mandatory.
    /// Storage prices (18) may be empty, the global id (19) defaults to
    /// zero and size limits (43) fall back to network defaults.
    pub fn parse(root: Cell) -> Result<Self> {
        let dict = Dict::<u32, Cell>::from_root(Some(root.clone()));

        fn require(dict: &Dict<u32, Cell>, id: u32) -> Result<Cell> {
            dict.get(&id)?
                .with_context(|| format!("config param {id} not found"))
        }

        let mut storage_prices = Vec::new();
        if let Some(param) = dict.get(&18)? {
            for entry in Dict::<u32, StoragePrices>::from_root(Some(param)).iter() {
                let (_, prices) = entry.context("invalid storage prices dict")?;
                storage_prices.push(prices);
            }
        }

        let global_id = match dict.get(&19)? {
            Some(param) => param.as_slice()?.load_u32()? as i32,
            None => 0,
        };

        let size_limits = match dict.get(&43)? {
            Some(param) => param.parse::<SizeLimitsConfig>()?,
            None => SizeLimitsConfig::default(),
        };

        Ok(Self {
            mc_gas_prices: require(&dict, 20)?.parse()?,
            gas_prices: require(&dict, 21)?.parse()?,
            mc_fwd_prices: require(&dict, 24)?.parse()?,
            fwd_prices: require(&dict, 25)?.parse()?,
            size_limits,
            storage_prices,
            global_id,
            raw: root,
        })
    }

    pub fn gas_prices(&self, is_masterchain: bool) -> &GasLimitsPrices {
        if is_masterchain {
            &self.mc_gas_prices
        } else {
            &self.gas_prices
        }
    }

    pub fn fwd_prices(&self, is_masterchain: bool) -> &MsgForwardPrices {
        if is_masterchain {
            &self.mc_fwd_prices
        } else {
            &self.fwd_prices
        }
    }

    /// Computes the storage fee accumulated since the last payment.
    ///
    /// Special accounts and accounts which never paid before are exempt.
    pub fn compute_storage_fees(
        &self,
        storage_stat: &StorageInfo,
        now: u32,
        is_special: bool,
        is_masterchain: bool,
    ) -> Tokens {
        let last_paid = storage_stat.last_paid;
        if now <= last_paid || last_paid == 0 || is_special || self.storage_prices.is_empty() {
            return Tokens::ZERO;
        }
        let Some(oldest) = self.storage_prices.first() else {
            return Tokens::ZERO;
        };
        if now <= oldest.utime_since {
            return Tokens::ZERO;
        }

        let cells = storage_stat.used.cells.into_inner() as u128;
        let bits = storage_stat.used.bits.into_inner() as u128;

        let mut total: u128 = 0;
        let mut upto = now as u64;
        for prices in self.storage_prices.iter().rev() {
            if upto <= last_paid as u64 {
                break;
            }
            let since = prices.utime_since as u64;
            if since >= upto {
                continue;
            }
            let delta = upto - std::cmp::max(since, last_paid as u64);

            let (bit_price, cell_price) = if is_masterchain {
                (prices.mc_bit_price_ps, prices.mc_cell_price_ps)
            } else {
                (prices.bit_price_ps, prices.cell_price_ps)
            };
            let fee = (bit_price as u128)
                .saturating_mul(bits)
                .saturating_add((cell_price as u128).saturating_mul(cells))
                .saturating_mul(delta as u128);
            total = total.saturating_add(fee);

            upto = since;
        }

        Tokens::new(shift_ceil_price(total))
    }

    /// Derives the gas limits for the compute phase.
    ///
    /// Special accounts run on the fixed special limit. Ordinary external
    /// messages start on credit since the account has not accepted anything
    /// yet, everything else is limited by what the balance can buy.
    pub fn compute_gas_params(
        &self,
        account_balance: Tokens,
        msg_balance: Tokens,
        is_special: bool,
        is_masterchain: bool,
        is_ordinary: bool,
        is_external: bool,
    ) -> GasParams {
        let prices = self.gas_prices(is_masterchain);
        if is_special {
            return GasParams {
                max: prices.special_gas_limit,
                limit: prices.special_gas_limit,
                credit: 0,
            };
        }

        let gas_max = prices.bought_gas_limit(account_balance);
        let mut limit = gas_max;
        let mut credit = 0;
        if is_ordinary && is_external {
            limit = std::cmp::min(gas_max, prices.bought_gas_limit(msg_balance));
            credit = std::cmp::min(prices.gas_credit, gas_max);
        }
        GasParams {
            max: gas_max,
            limit,
            credit,
        }
    }
}

#[cfg(test)]
mod tests {
    use tonkit_types::num::{VarUint56, Tokens};
    use tonkit_types::models::StorageUsed;

    use super::*;
    use crate::tests::make_default_config;

    fn storage_stat(cells: u64, bits: u64, last_paid: u32) -> StorageInfo {
        StorageInfo {
            used: StorageUsed {
                cells: VarUint56::new(cells),
                bits: VarUint56::new(bits),
            },
            last_paid,
            due_payment: None,
        }
    }

    #[test]
    fn parses_the_default_config() {
        let config = make_default_config();
        assert_eq!(config.global_id, 42);
        assert_eq!(config.gas_prices.gas_limit, 1_000_000);
        assert_eq!(config.fwd_prices.lump_price, 400_000);
        assert_eq!(config.storage_prices.len(), 1);
        assert_eq!(config.size_limits, SizeLimitsConfig::default());
    }

    #[test]
    fn storage_fee_accumulates_linearly() {
        let config = make_default_config();
        let stat = storage_stat(10, 1000, 500);

        let fee = config.compute_storage_fees(&stat, 1500, false, false);
        // (1 * 1000 + 500 * 10) * 1000 seconds, divided by 2^16, rounded up
        assert_eq!(fee, Tokens::new(shift_ceil_price(6000 * 1000)));

        // never paid before, nothing to charge
        let stat = storage_stat(10, 1000, 0);
        assert_eq!(
            config.compute_storage_fees(&stat, 1500, false, false),
            Tokens::ZERO
        );

        // special accounts are exempt
        let stat = storage_stat(10, 1000, 500);
        assert_eq!(
            config.compute_storage_fees(&stat, 1500, true, false),
            Tokens::ZERO
        );
    }

    #[test]
    fn external_messages_run_on_credit() {
        let config = make_default_config();
        let balance = Tokens::new(1_000_000_000);

        let params = config.compute_gas_params(balance, Tokens::ZERO, false, false, true, true);
        assert_eq!(params.credit, config.gas_prices.gas_credit);
        assert_eq!(params.limit, 0);
        assert!(params.max > 0);

        let params = config.compute_gas_params(balance, balance, false, false, true, false);
        assert_eq!(params.credit, 0);
        assert_eq!(params.limit, params.max);

        let params = config.compute_gas_params(balance, Tokens::ZERO, true, false, true, false);
        assert_eq!(params.limit, config.gas_prices.special_gas_limit);
    }
}
