pub mod duitku;
pub mod midtrans;
pub mod paypal;
pub mod paypal_links;
pub mod paypal_webhook;

pub use duitku::{DuitkuConfig, DuitkuGateway};
pub use midtrans::{MidtransConfig, MidtransGateway};
pub use paypal::{PaypalConfig, PaypalGateway};
pub use paypal_links::{
    PaypalCheckoutLinkConfig, PaypalCheckoutLinkGateway, PaypalMeConfig, PaypalMeGateway,
};
pub use paypal_webhook::{CertificateFetcher, HttpCertificateFetcher, PaypalWebhookVerifier};
