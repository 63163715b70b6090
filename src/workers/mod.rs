pub mod alert_dispatcher;
pub mod transaction_monitor;
