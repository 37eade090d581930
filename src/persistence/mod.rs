pub mod connection;
pub mod data_sources;
pub mod links;
pub mod lots;
pub mod raw_data;
pub mod transactions;

pub use connection::Database;
pub use data_sources::DataSourceFilter;
pub use links::TransactionLink;
pub use transactions::TransactionFilter;
