// Market periods and bucket alignment
pub mod period;

pub use period::Period;
