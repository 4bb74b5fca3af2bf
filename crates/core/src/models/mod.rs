pub mod aggregates;
pub mod calorie;
pub mod category;
pub mod period;
pub mod sync;
pub mod transaction;
