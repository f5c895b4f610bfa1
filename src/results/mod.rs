// Query results: rows keyed by column name and the result sets that hold them.

mod result_set;
mod row;

pub use result_set::ResultSet;
pub use row::Row;
