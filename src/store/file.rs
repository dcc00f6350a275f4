//! JSON file-backed ledger store.
//!
//! The whole state is rewritten on every commit: serialized to a sibling
//! temp file, then renamed over the target. A failed write leaves both the
//! file and the in-memory state at the previous commit.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{LedgerError, Result};

use super::{ChangeSet, LedgerState, LedgerStore};

/// Durable store persisting [`LedgerState`] as one JSON document.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    state: LedgerState,
}

impl JsonFileStore {
    /// Open a store file, starting empty when it does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            load_state(&path).map_err(|e| store_error(&path, e))?
        } else {
            LedgerState::default()
        };
        log::debug!("opened ledger store {}", path.display());
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for JsonFileStore {
    fn state(&self) -> &LedgerState {
        &self.state
    }

    fn commit(&mut self, changes: ChangeSet) -> Result<()> {
        let mut next = self.state.clone();
        next.apply(changes);
        save_state(&next, &self.path).map_err(|e| store_error(&self.path, e))?;
        self.state = next;
        Ok(())
    }
}

fn store_error(path: &Path, e: io::Error) -> LedgerError {
    LedgerError::Store(format!("{}: {e}", path.display()))
}

/// Load a ledger state document.
pub fn load_state(path: &Path) -> io::Result<LedgerState> {
    let file = fs::File::open(path)?;
    serde_json::from_reader(io::BufReader::new(file))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Save a ledger state document atomically (temp file + rename).
pub fn save_state(state: &LedgerState, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    {
        let file = fs::File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, state).map_err(io::Error::other)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{Ledger, OrderRequest};
    use crate::feed::MemoryFeed;
    use crate::types::{InstrumentCode, Money};

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let feed = MemoryFeed::default();

        let account = {
            let store = JsonFileStore::open(&path).unwrap();
            let mut ledger = Ledger::new(store);
            let account = ledger.open_account("paper", Money::from_units(10_000_000)).unwrap();
            ledger
                .execute_buy(
                    OrderRequest::new(account, InstrumentCode::new("005930"), 10)
                        .at_price(Money::from_units(1000)),
                    &feed,
                )
                .unwrap();
            account
        };

        let reopened = JsonFileStore::open(&path).unwrap();
        let state = reopened.state();
        assert_eq!(
            state.account(account).unwrap().cash_balance,
            Money(9_989_998_500000)
        );
        let pos = state.position(account, InstrumentCode::new("005930")).unwrap();
        assert_eq!(pos.quantity, 10);
        assert_eq!(state.trades(account).count(), 1);
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("nested").join("ledger.json")).unwrap();
        assert_eq!(store.state(), &LedgerState::default());
    }

    #[test]
    fn corrupt_file_is_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{not json").unwrap();
        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, LedgerError::Store(_)));
    }
}
