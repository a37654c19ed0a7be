pub mod mssql;

pub use mssql::*;
