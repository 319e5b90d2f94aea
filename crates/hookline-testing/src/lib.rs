//! Shared test harness for the hookline workspace.
//!
//! Provides an isolated database environment per test and a deterministic
//! clock. Database-backed tests call [`TestEnv::try_new`] and return early
//! when no test database is configured, so the suite passes on machines
//! without PostgreSQL.

#![forbid(unsafe_code)]

pub mod database;
pub mod time;

pub use database::TestEnv;
pub use time::TestClock;
