//! Redis backing store for the relay engine
//!
//! Provides [`RedisHistory`], an `EventHistory` implementation over a
//! Redis instance reachable by URL.

mod history;

pub use history::RedisHistory;
