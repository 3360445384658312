//! `tradepost-accounts` — user accounts and the balance ledger capability.
//!
//! Buyers and sellers are the same kind of account; a seller is simply a
//! user who lists offers. All money movement on an account goes through the
//! narrow [`Account::credit`] / [`Account::debit`] capability so the storage
//! layer can compose it into a single transaction.

pub mod account;
pub mod password;

pub use account::{Account, ProfileUpdate, Registration};
