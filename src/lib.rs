pub mod access;
pub mod accounts;
pub mod captcha;
pub mod config;
pub mod documents;
pub mod error;
pub mod import;
pub mod ledger;
pub mod mailer;
#[cfg(test)]
pub(crate) mod memory;
pub mod models;
pub mod password;
pub mod routes;
pub mod session;
pub mod spreadsheet;
pub mod state;
pub mod validation;
