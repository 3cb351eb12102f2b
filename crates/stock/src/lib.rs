//! Stock ledger domain module: on-hand quantity per (product, warehouse).

pub mod balance;

pub use balance::{
    BalanceSet, DecrementStock, ReceiveStock, SetBalance, StockBalance, StockBalanceSnapshot,
    StockCommand, StockDecremented, StockEvent, StockReceived,
};
