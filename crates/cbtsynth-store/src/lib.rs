pub mod cases;
pub mod database;
pub mod error;
pub mod history;
pub mod row_helpers;
pub mod schema;
pub mod store;

pub use cases::CaseSummary;
pub use database::Database;
pub use error::StoreError;
pub use history::CommitReceipt;
pub use store::CaseStore;
