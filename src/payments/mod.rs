//! Payment gateway layer: the gateway contract, concrete providers, their
//! signing schemes and the factory that hands them out.

pub mod config_cache;
pub mod error;
pub mod factory;
pub mod gateway;
pub mod providers;
pub mod retry;
pub mod settings;
pub mod signature;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::{GatewayFactory, GatewayStatus};
pub use gateway::PaymentGateway;
pub use settings::{PaymentSettings, SettingsSnapshot};
pub use types::{GatewayName, TransactionStatus};
