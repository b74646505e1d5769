//! relaykit-sheets - Feishu (Lark) spreadsheet access
//!
//! Lists the sheets of a spreadsheet, reads a sheet into a [`Table`] and
//! appends single cells, authenticating as an internal Feishu app.

pub mod client;
pub mod error;

pub use client::{
    InsertDataOption, SheetInfo, SheetRef, SheetsClient, SheetsCredentials, Table,
    DEFAULT_BASE_URL,
};
pub use error::{Result, SheetsError};
