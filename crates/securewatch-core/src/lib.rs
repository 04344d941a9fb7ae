pub mod alert_log;
pub mod bus;
pub mod error;
pub mod model;
pub mod paths;
pub mod store;
