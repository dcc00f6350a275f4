//! Ledger storage: state, unit of work, and store backends.
//!
//! Every ledger mutation runs inside [`LedgerStore::transaction`]. The closure
//! reads through a [`UnitOfWork`] that overlays staged writes on the committed
//! state; the staged [`ChangeSet`] is handed to the store only when the closure
//! returns `Ok`. An error anywhere discards the whole change set.

mod memory;
#[cfg(feature = "persistence")]
mod file;

pub use memory::MemoryStore;
#[cfg(feature = "persistence")]
pub use file::JsonFileStore;

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use rustc_hash::FxHashMap;

use crate::error::{LedgerError, Result};
use crate::ledger::{Account, Position, Trade};
use crate::types::{AccountId, InstrumentCode, Money, TradeId};
use crate::valuation::PortfolioSnapshot;

/// Serde helper for keyed maps: stored as a plain list of records, keys rebuilt on load.
#[cfg(feature = "serde")]
mod serde_records {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::Keyed;

    pub fn serialize<K, V: Serialize, S: Serializer>(
        map: &BTreeMap<K, V>,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, V, D>(
        deserializer: D,
    ) -> std::result::Result<BTreeMap<V::Key, V>, D::Error>
    where
        V: Keyed + Deserialize<'de>,
        D: Deserializer<'de>,
    {
        let records: Vec<V> = Vec::deserialize(deserializer)?;
        Ok(records.into_iter().map(|r| (r.key(), r)).collect())
    }
}

/// A record that knows its own storage key.
pub trait Keyed {
    type Key: Ord;
    fn key(&self) -> Self::Key;
}

impl Keyed for Account {
    type Key = AccountId;
    fn key(&self) -> AccountId {
        self.id
    }
}

impl Keyed for Position {
    type Key = (AccountId, InstrumentCode);
    fn key(&self) -> Self::Key {
        (self.account_id, self.code)
    }
}

impl Keyed for PortfolioSnapshot {
    type Key = (AccountId, NaiveDate);
    fn key(&self) -> Self::Key {
        (self.account_id, self.date)
    }
}

/// Committed ledger state.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LedgerState {
    #[cfg_attr(feature = "serde", serde(with = "serde_records"))]
    accounts: BTreeMap<AccountId, Account>,
    #[cfg_attr(feature = "serde", serde(with = "serde_records"))]
    positions: BTreeMap<(AccountId, InstrumentCode), Position>,
    /// Append-only, in trade-id order
    trades: Vec<Trade>,
    #[cfg_attr(feature = "serde", serde(with = "serde_records"))]
    snapshots: BTreeMap<(AccountId, NaiveDate), PortfolioSnapshot>,
    next_account_id: u64,
    next_trade_id: u64,
}

impl LedgerState {
    // === Queries ===

    pub fn account(&self, id: AccountId) -> Option<&Account> {
        self.accounts.get(&id)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }

    pub fn position(&self, account: AccountId, code: InstrumentCode) -> Option<&Position> {
        self.positions.get(&(account, code))
    }

    /// Open positions of one account, ordered by instrument code.
    pub fn positions(&self, account: AccountId) -> impl Iterator<Item = &Position> {
        self.positions
            .range((account, InstrumentCode::LOWEST)..=(account, InstrumentCode::HIGHEST))
            .map(|(_, p)| p)
    }

    /// Trades of one account in execution order.
    pub fn trades(&self, account: AccountId) -> impl Iterator<Item = &Trade> {
        self.trades.iter().filter(move |t| t.account_id == account)
    }

    /// Snapshots of one account in date order.
    pub fn snapshots(&self, account: AccountId) -> impl Iterator<Item = &PortfolioSnapshot> {
        self.snapshots
            .range((account, NaiveDate::MIN)..=(account, NaiveDate::MAX))
            .map(|(_, s)| s)
    }

    pub fn snapshot(&self, account: AccountId, date: NaiveDate) -> Option<&PortfolioSnapshot> {
        self.snapshots.get(&(account, date))
    }

    // === Commit ===

    /// Apply a staged change set. Infallible: all checks ran while staging.
    pub fn apply(&mut self, changes: ChangeSet) {
        for (id, account) in changes.accounts {
            self.accounts.insert(id, account);
        }
        for (key, slot) in changes.positions {
            match slot {
                Some(position) => {
                    self.positions.insert(key, position);
                }
                None => {
                    self.positions.remove(&key);
                }
            }
        }
        self.trades.extend(changes.trades);
        for snapshot in changes.snapshots {
            self.snapshots.insert(snapshot.key(), snapshot);
        }
        self.next_account_id = self.next_account_id.max(changes.next_account_id);
        self.next_trade_id = self.next_trade_id.max(changes.next_trade_id);
    }
}

/// Writes staged by one unit of work.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    accounts: FxHashMap<AccountId, Account>,
    /// `None` marks a deletion
    positions: FxHashMap<(AccountId, InstrumentCode), Option<Position>>,
    trades: Vec<Trade>,
    snapshots: Vec<PortfolioSnapshot>,
    next_account_id: u64,
    next_trade_id: u64,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
            && self.positions.is_empty()
            && self.trades.is_empty()
            && self.snapshots.is_empty()
    }

    pub fn trade_count(&self) -> usize {
        self.trades.len()
    }
}

/// Read-through view over committed state plus staged writes.
pub struct UnitOfWork<'a> {
    base: &'a LedgerState,
    changes: ChangeSet,
}

impl<'a> UnitOfWork<'a> {
    pub fn new(base: &'a LedgerState) -> Self {
        Self {
            base,
            changes: ChangeSet {
                next_account_id: base.next_account_id,
                next_trade_id: base.next_trade_id,
                ..ChangeSet::default()
            },
        }
    }

    pub fn into_changes(self) -> ChangeSet {
        self.changes
    }

    // === Accounts ===

    pub fn account(&self, id: AccountId) -> Result<&Account> {
        self.changes
            .accounts
            .get(&id)
            .or_else(|| self.base.account(id))
            .ok_or(LedgerError::AccountNotFound(id))
    }

    pub fn account_mut(&mut self, id: AccountId) -> Result<&mut Account> {
        if !self.changes.accounts.contains_key(&id) {
            let account = self.base.account(id).ok_or(LedgerError::AccountNotFound(id))?;
            self.changes.accounts.insert(id, account.clone());
        }
        self.changes
            .accounts
            .get_mut(&id)
            .ok_or(LedgerError::AccountNotFound(id))
    }

    pub fn insert_account(
        &mut self,
        name: &str,
        initial_balance: Money,
        created_at: NaiveDateTime,
    ) -> AccountId {
        self.changes.next_account_id += 1;
        let id = AccountId(self.changes.next_account_id);
        self.changes.accounts.insert(
            id,
            Account {
                id,
                name: name.to_string(),
                initial_balance,
                cash_balance: initial_balance,
                created_at,
            },
        );
        id
    }

    // === Positions ===

    pub fn position(&self, account: AccountId, code: InstrumentCode) -> Option<&Position> {
        match self.changes.positions.get(&(account, code)) {
            Some(staged) => staged.as_ref(),
            None => self.base.position(account, code),
        }
    }

    /// Current positions of an account, staged writes included, by code.
    pub fn positions(&self, account: AccountId) -> Vec<Position> {
        let mut merged: BTreeMap<InstrumentCode, Position> = self
            .base
            .positions(account)
            .map(|p| (p.code, p.clone()))
            .collect();
        for ((acct, code), slot) in &self.changes.positions {
            if *acct != account {
                continue;
            }
            match slot {
                Some(p) => {
                    merged.insert(*code, p.clone());
                }
                None => {
                    merged.remove(code);
                }
            }
        }
        merged.into_values().collect()
    }

    /// Stage a position write; a flat position is staged as a deletion.
    pub fn put_position(&mut self, position: Position) {
        let key = position.key();
        let slot = if position.is_flat() { None } else { Some(position) };
        self.changes.positions.insert(key, slot);
    }

    // === Trades ===

    /// Append a trade, assigning the next trade id.
    pub fn append_trade(&mut self, mut trade: Trade) -> TradeId {
        self.changes.next_trade_id += 1;
        trade.id = TradeId(self.changes.next_trade_id);
        let id = trade.id;
        self.changes.trades.push(trade);
        id
    }

    // === Snapshots ===

    /// Insert or replace the snapshot for `(account, date)`.
    pub fn upsert_snapshot(&mut self, snapshot: PortfolioSnapshot) {
        self.changes.snapshots.retain(|s| s.key() != snapshot.key());
        self.changes.snapshots.push(snapshot);
    }
}

/// Repository / unit-of-work interface consumed by the ledger.
pub trait LedgerStore {
    /// Committed state.
    fn state(&self) -> &LedgerState;

    /// Persist a change set. On error nothing may be applied.
    fn commit(&mut self, changes: ChangeSet) -> Result<()>;

    /// Run `f` against a fresh unit of work and commit its writes if it succeeds.
    fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut UnitOfWork<'_>) -> Result<T>,
    {
        let (value, changes) = {
            let mut uow = UnitOfWork::new(self.state());
            let value = f(&mut uow)?;
            (value, uow.into_changes())
        };
        if !changes.is_empty() {
            self.commit(changes)?;
        }
        Ok(value)
    }
}
