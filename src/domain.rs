// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque per-connection identity. Generated at connect time, discarded on
/// disconnect together with the wallet.
pub type ConnId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction { Buy, Sell }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus { Passed, Failed }

/// Balance plus per-symbol holdings for one identity. Whole currency units,
/// never negative; mutated only by the wallet ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Wallet {
    pub balance: i64,
    pub holdings: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: i64,
    pub timestamp: String,
}

/// Immutable record of one executed (or refused) trade. Not stored
/// server-side; the client is the system of record for history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub symbol: String,
    pub price: i64,
    pub quantity: i64,
    pub action: TradeAction,
    pub timestamp: String,
    pub status: TradeStatus,
    pub user: String,
}

/// A trade request as submitted by a client (ws frame or HTTP body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOrder {
    pub symbol: String,
    pub price: i64,
    pub quantity: i64,
    pub action: TradeAction,
}

/// Result handed back to the submitter: the record plus the
/// post-transaction wallet snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub transaction: TransactionRecord,
    pub wallet: Wallet,
    #[serde(rename = "failureReason", skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

// ---- Wire protocol -----------------------------------------------------
// Tagged JSON text frames. Event names follow the upstream client.

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientRequest {
    #[serde(rename = "JOIN_STOCK_ROOM")]
    JoinStockRoom {
        #[serde(rename = "stockName")]
        stock_name: String,
    },
    #[serde(rename = "LEAVE_STOCK_ROOM")]
    LeaveStockRoom,
    #[serde(rename = "TRANSACTION")]
    Transaction(TradeOrder),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "USER_INFO")]
    UserInfo {
        #[serde(rename = "userId")]
        user_id: ConnId,
        #[serde(rename = "userName")]
        user_name: String,
        wallet: Wallet,
    },
    /// Snapshot sent to the joining identity only.
    #[serde(rename = "STOCK_PRICE")]
    StockPrice {
        #[serde(rename = "stockName")]
        stock_name: String,
        price: i64,
        history: Vec<PricePoint>,
    },
    /// Join/leave announcements to room peers.
    #[serde(rename = "NOTIFICATION")]
    Notification { message: String, timestamp: String },
    #[serde(rename = "STOCK_PRICE_UPDATE")]
    StockPriceUpdate(PriceUpdate),
    /// To the submitter only.
    #[serde(rename = "TRANSACTION_RESULT")]
    TransactionResult(TradeOutcome),
    /// To the other room members, on Passed only.
    #[serde(rename = "LIVE_TRANSACTION")]
    LiveTransaction { transaction: TransactionRecord },
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceUpdate {
    #[serde(rename = "stockName")]
    pub stock_name: String,
    #[serde(rename = "previousPrice")]
    pub previous_price: i64,
    #[serde(rename = "currentPrice")]
    pub current_price: i64,
    pub change: i64,
    #[serde(rename = "percentChange")]
    pub percent_change: f64,
    pub timestamp: String,
}
