//! Marketplace client: accounts, listings and a local listing store kept in
//! a key-value device store.

pub mod api;
pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod kv;
pub mod listing;
pub mod price;
pub mod product;
pub mod session;
