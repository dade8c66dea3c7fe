pub mod agreement;
pub mod api;
pub mod party;
pub mod transaction;
