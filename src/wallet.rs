// ===============================
// src/wallet.rs
// ===============================
//
// Wallet ledger: balance + holdings per identity. The check-then-mutate
// sequence runs on the hub task, so two trades for the same identity can
// never interleave. Balance and holdings stay non-negative.
//

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;

use crate::domain::{
    ConnId, TradeAction, TradeOrder, TradeOutcome, TradeStatus, TransactionRecord, Wallet,
};

pub const BALANCE_MIN: i64 = 10_000;
pub const BALANCE_MAX: i64 = 50_000; // exclusive

pub const REASON_BALANCE: &str = "Insufficient balance";
pub const REASON_HOLDINGS: &str = "Insufficient stocks";

/// Validation failures: rejected before touching any wallet, surfaced to
/// the caller only, never broadcast.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TradeError {
    #[error("Quantity must be positive")]
    BadQuantity,
    #[error("Price must be positive")]
    BadPrice,
    #[error("Order value too large")]
    Notional,
    #[error("Unknown user")]
    UnknownUser,
}

/// Starting balance in [10000, 50000).
pub fn starting_balance() -> i64 {
    rand::thread_rng().gen_range(BALANCE_MIN..BALANCE_MAX)
}

#[derive(Debug, Default)]
pub struct WalletLedger {
    wallets: HashMap<ConnId, Wallet>,
}

impl WalletLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, conn: &str, balance: i64) -> Wallet {
        let wallet = Wallet { balance, holdings: Default::default() };
        self.wallets.insert(conn.to_string(), wallet.clone());
        wallet
    }

    pub fn close(&mut self, conn: &str) {
        self.wallets.remove(conn);
    }

    pub fn get(&self, conn: &str) -> Option<&Wallet> {
        self.wallets.get(conn)
    }

    /// Execute a buy/sell against one wallet. Business-rule failures come
    /// back as a Failed record with the wallet untouched; validation
    /// failures short-circuit as `TradeError`.
    pub fn execute(
        &mut self,
        conn: &str,
        order: &TradeOrder,
        user: &str,
        now: DateTime<Utc>,
    ) -> Result<TradeOutcome, TradeError> {
        if order.quantity <= 0 {
            return Err(TradeError::BadQuantity);
        }
        if order.price <= 0 {
            return Err(TradeError::BadPrice);
        }
        // client-supplied i64s: an unchecked product can wrap
        let notional = order
            .price
            .checked_mul(order.quantity)
            .ok_or(TradeError::Notional)?;
        let wallet = self.wallets.get_mut(conn).ok_or(TradeError::UnknownUser)?;

        let mut status = TradeStatus::Failed;
        let mut failure_reason = None;

        match order.action {
            TradeAction::Buy => {
                if wallet.balance >= notional {
                    wallet.balance -= notional;
                    *wallet.holdings.entry(order.symbol.clone()).or_insert(0) += order.quantity;
                    status = TradeStatus::Passed;
                } else {
                    failure_reason = Some(REASON_BALANCE.to_string());
                }
            }
            TradeAction::Sell => {
                let held = wallet.holdings.get(&order.symbol).copied().unwrap_or(0);
                if held >= order.quantity {
                    *wallet.holdings.entry(order.symbol.clone()).or_insert(0) -= order.quantity;
                    wallet.balance += notional;
                    status = TradeStatus::Passed;
                } else {
                    failure_reason = Some(REASON_HOLDINGS.to_string());
                }
            }
        }

        Ok(TradeOutcome {
            transaction: TransactionRecord {
                symbol: order.symbol.clone(),
                price: order.price,
                quantity: order.quantity,
                action: order.action,
                timestamp: now.to_rfc3339(),
                status,
                user: user.to_string(),
            },
            wallet: wallet.clone(),
            failure_reason,
        })
    }
}
