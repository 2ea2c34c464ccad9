//! Soup Card bot — Telegram loyalty-card balance bot.

pub mod barcode;
pub mod bot;
pub mod config;
pub mod error;
pub mod gateway;
pub mod rate_limit;
pub mod store;
pub mod telegram;
pub mod validator;
