use crate::domain::fixed::{MAX_DECIMALS, RATE_DECIMALS};
use crate::domain::{Address, AssetId, Decimal, FundId};
use crate::engine::{FeeSchedule, DEFAULT_MAX_OWNED_ASSETS};
use crate::fund::FundSetup;
use primitive_types::U256;
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    /// Fund to open; a fresh id is generated when unset.
    pub fund_id: Option<FundId>,
    pub fund_name: String,
    pub quote_asset: AssetId,
    pub quote_decimals: u8,
    pub manager: Address,
    pub vault: Address,
    pub fees: FeeSchedule,
    pub max_owned_assets: usize,
    pub max_rate_age_ms: Option<i64>,
    pub settlement_interval_ms: u64,
    pub investment_assets: Vec<AssetId>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = required(&env_map, "DATABASE_PATH")?;

        let fund_id = match env_map.get("FUND_ID") {
            Some(s) => Some(FundId::parse(s.trim()).map_err(|_| {
                ConfigError::InvalidValue("FUND_ID".to_string(), "must be a uuid".to_string())
            })?),
            None => None,
        };

        let fund_name = env_map
            .get("FUND_NAME")
            .cloned()
            .unwrap_or_else(|| "fund".to_string());
        let quote_asset = AssetId::new(required(&env_map, "FUND_QUOTE_ASSET")?);
        let quote_decimals: u8 = parse_or(&env_map, "FUND_QUOTE_DECIMALS", 18, "an integer 0-77")?;
        if quote_decimals > MAX_DECIMALS {
            return Err(ConfigError::InvalidValue(
                "FUND_QUOTE_DECIMALS".to_string(),
                format!("must be at most {MAX_DECIMALS}, got {quote_decimals}"),
            ));
        }
        let manager = Address::new(required(&env_map, "FUND_MANAGER")?);
        let vault = Address::new(
            env_map
                .get("FUND_VAULT")
                .cloned()
                .unwrap_or_else(|| "vault".to_string()),
        );

        let management_rate = fee_rate(&env_map, "MANAGEMENT_FEE_RATE", "0.02")?;
        let performance_rate = fee_rate(&env_map, "PERFORMANCE_FEE_RATE", "0.2")?;
        let fees = FeeSchedule::new(management_rate, performance_rate).map_err(|e| {
            ConfigError::InvalidValue(format!("{}_FEE_RATE", e.name.to_uppercase()), e.to_string())
        })?;

        let max_owned_assets: usize = parse_or(
            &env_map,
            "MAX_OWNED_ASSETS",
            DEFAULT_MAX_OWNED_ASSETS,
            "a positive integer",
        )?;
        if max_owned_assets == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_OWNED_ASSETS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let max_rate_age_ms = env_map
            .get("MAX_RATE_AGE_MS")
            .map(|s| match s.trim().parse::<i64>() {
                Ok(v) if v >= 0 => Ok(v),
                _ => Err(ConfigError::InvalidValue(
                    "MAX_RATE_AGE_MS".to_string(),
                    "must be a non-negative integer".to_string(),
                )),
            })
            .transpose()?;

        let settlement_interval_ms: u64 = parse_or(
            &env_map,
            "SETTLEMENT_INTERVAL_MS",
            86_400_000,
            "a positive integer",
        )?;
        if settlement_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "SETTLEMENT_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        let investment_assets = env_map
            .get("INVESTMENT_ASSETS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(AssetId::new)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Config {
            database_path,
            fund_id,
            fund_name,
            quote_asset,
            quote_decimals,
            manager,
            vault,
            fees,
            max_owned_assets,
            max_rate_age_ms,
            settlement_interval_ms,
            investment_assets,
        })
    }

    pub fn fund_setup(&self) -> FundSetup {
        FundSetup::new(
            self.fund_name.clone(),
            self.quote_asset.clone(),
            self.quote_decimals,
            self.manager.clone(),
            self.vault.clone(),
        )
        .with_fees(self.fees)
        .with_max_owned_assets(self.max_owned_assets)
        .with_investment_assets(self.investment_assets.clone())
        .with_max_rate_age(self.max_rate_age_ms)
    }
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(s) => s
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), format!("must be {expected}"))),
        None => Ok(default),
    }
}

/// Parse a human decimal fee rate ("0.02" for 2%) into 18-decimal fixed point.
fn fee_rate(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<U256, ConfigError> {
    let raw = env_map.get(key).map(|s| s.trim()).unwrap_or(default);
    let invalid = || {
        ConfigError::InvalidValue(
            key.to_string(),
            format!("must be a non-negative decimal, got {raw}"),
        )
    };
    let rate = Decimal::from_str_canonical(raw).map_err(|_| invalid())?;
    if rate.is_negative() {
        return Err(invalid());
    }
    rate.to_base_units(RATE_DECIMALS).ok_or_else(invalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_required_env() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("DATABASE_PATH".to_string(), "/tmp/test.db".to_string());
        map.insert("FUND_QUOTE_ASSET".to_string(), "USDC".to_string());
        map.insert("FUND_MANAGER".to_string(), "0xmanager".to_string());
        map
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_env_map(setup_required_env()).unwrap();
        assert_eq!(config.quote_decimals, 18);
        assert_eq!(config.vault, Address::new("vault"));
        assert_eq!(config.fees.management_rate(), U256::from(2u8) * U256::exp10(16));
        assert_eq!(config.fees.performance_rate(), U256::from(2u8) * U256::exp10(17));
        assert_eq!(config.max_owned_assets, DEFAULT_MAX_OWNED_ASSETS);
        assert_eq!(config.settlement_interval_ms, 86_400_000);
        assert!(config.fund_id.is_none());
        assert!(config.max_rate_age_ms.is_none());
        assert!(config.investment_assets.is_empty());
    }

    #[test]
    fn test_missing_database_path() {
        let mut env_map = setup_required_env();
        env_map.remove("DATABASE_PATH");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "DATABASE_PATH"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_missing_quote_asset() {
        let mut env_map = setup_required_env();
        env_map.remove("FUND_QUOTE_ASSET");
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "FUND_QUOTE_ASSET"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_blank_manager_is_missing() {
        let mut env_map = setup_required_env();
        env_map.insert("FUND_MANAGER".to_string(), "   ".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::MissingEnv(s)) => assert_eq!(s, "FUND_MANAGER"),
            _ => panic!("Expected MissingEnv error"),
        }
    }

    #[test]
    fn test_invalid_fund_id() {
        let mut env_map = setup_required_env();
        env_map.insert("FUND_ID".to_string(), "not-a-uuid".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "FUND_ID"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_fee_rate_above_one_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("PERFORMANCE_FEE_RATE".to_string(), "1.5".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "PERFORMANCE_FEE_RATE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_negative_fee_rate_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("MANAGEMENT_FEE_RATE".to_string(), "-0.01".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "MANAGEMENT_FEE_RATE"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_zero_settlement_interval_rejected() {
        let mut env_map = setup_required_env();
        env_map.insert("SETTLEMENT_INTERVAL_MS".to_string(), "0".to_string());
        match Config::from_env_map(env_map) {
            Err(ConfigError::InvalidValue(k, _)) => assert_eq!(k, "SETTLEMENT_INTERVAL_MS"),
            _ => panic!("Expected InvalidValue error"),
        }
    }

    #[test]
    fn test_investment_assets_and_fund_setup() {
        let mut env_map = setup_required_env();
        env_map.insert("INVESTMENT_ASSETS".to_string(), "WETH, WBTC,,".to_string());
        env_map.insert("FUND_QUOTE_DECIMALS".to_string(), "6".to_string());
        env_map.insert("MAX_RATE_AGE_MS".to_string(), "60000".to_string());
        let config = Config::from_env_map(env_map).unwrap();

        let setup = config.fund_setup();
        assert_eq!(
            setup.investment_assets,
            vec![AssetId::new("WETH"), AssetId::new("WBTC")]
        );
        assert_eq!(setup.initial_share_price().unwrap(), U256::exp10(6));
        assert_eq!(setup.max_rate_age_ms, Some(60_000));
        assert!(setup.accepts_investment(&AssetId::new("USDC")));
    }
}
