//! Ledger entry classification

use serde::{Deserialize, Serialize};

/// History row type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryType {
    Deposit,
    Withdraw,
    OptionPayout,
}

impl HistoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryType::Deposit => "DEPOSIT",
            HistoryType::Withdraw => "WITHDRAW",
            HistoryType::OptionPayout => "OPTION_PAYOUT",
        }
    }
}

impl std::fmt::Display for HistoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HistoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEPOSIT" => Ok(HistoryType::Deposit),
            "WITHDRAW" => Ok(HistoryType::Withdraw),
            "OPTION_PAYOUT" => Ok(HistoryType::OptionPayout),
            _ => Err(format!("Unknown history type: {}", s)),
        }
    }
}

/// Which leg of the product a withdrawal drew from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawType {
    None,
    Principal,
    Coupon,
    Option,
}

impl WithdrawType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawType::None => "NONE",
            WithdrawType::Principal => "PRINCIPAL",
            WithdrawType::Coupon => "COUPON",
            WithdrawType::Option => "OPTION",
        }
    }
}

impl std::fmt::Display for WithdrawType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WithdrawType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(WithdrawType::None),
            "PRINCIPAL" => Ok(WithdrawType::Principal),
            "COUPON" => Ok(WithdrawType::Coupon),
            "OPTION" => Ok(WithdrawType::Option),
            _ => Err(format!("Unknown withdraw type: {}", s)),
        }
    }
}

/// Deposits credit the running balance, everything else debits it.
pub fn balance_sign(history_type: HistoryType) -> i8 {
    match history_type {
        HistoryType::Deposit => 1,
        HistoryType::Withdraw | HistoryType::OptionPayout => -1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_history_type_round_trip_strings() {
        for ty in [HistoryType::Deposit, HistoryType::Withdraw, HistoryType::OptionPayout] {
            assert_eq!(HistoryType::from_str(ty.as_str()), Ok(ty));
        }
        assert!(HistoryType::from_str("deposit").is_err());
    }

    #[test]
    fn test_balance_sign() {
        assert_eq!(balance_sign(HistoryType::Deposit), 1);
        assert_eq!(balance_sign(HistoryType::Withdraw), -1);
        assert_eq!(balance_sign(HistoryType::OptionPayout), -1);
    }
}
