//! pstore-storage: the append-only ledger the node reconciles against
//!
//! The pipelines only see the [`Ledger`] trait. [`OpendalLedger`] implements
//! it on any OpenDAL operator (memory, local fs, S3-compatible).

pub mod health;
pub mod ledger;
pub mod opendal_ledger;
pub mod operator;

pub use health::{check_health, is_healthy};
pub use ledger::{EntryRef, Ledger, LedgerError};
pub use opendal_ledger::OpendalLedger;
pub use operator::{build_from_core_config, build_operator, S3Credentials};
