use crate::config::PaymentRuntimeConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::providers::{
    DuitkuConfig, DuitkuGateway, MidtransConfig, MidtransGateway, PaypalCheckoutLinkConfig,
    PaypalCheckoutLinkGateway, PaypalConfig, PaypalGateway, PaypalMeConfig, PaypalMeGateway,
};
use crate::payments::settings::{PaymentSettings, SettingsSnapshot};
use crate::payments::types::{GatewayCapabilities, GatewayName};
use crate::services::notification::AdminAlertEmitter;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Availability of one gateway as seen by the factory.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    pub name: GatewayName,
    pub available: bool,
    pub capabilities: Option<GatewayCapabilities>,
    pub error: Option<String>,
}

/// Builds every gateway once at start-up and hands them out by name.
///
/// A gateway whose credentials are missing is kept as its configuration
/// error; asking for it returns that error, never a different gateway.
pub struct GatewayFactory {
    gateways: HashMap<GatewayName, Result<Arc<dyn PaymentGateway>, PaymentError>>,
    settings: Arc<PaymentSettings>,
}

fn build_gateway(
    name: GatewayName,
    snapshot: &SettingsSnapshot,
    runtime: &PaymentRuntimeConfig,
    alerts: &AdminAlertEmitter,
) -> PaymentResult<Arc<dyn PaymentGateway>> {
    let gateway: Arc<dyn PaymentGateway> = match name {
        GatewayName::Midtrans => Arc::new(MidtransGateway::new(MidtransConfig::from_settings(
            snapshot, runtime,
        )?)?),
        GatewayName::Duitku => Arc::new(DuitkuGateway::new(DuitkuConfig::from_settings(
            snapshot, runtime,
        )?)?),
        GatewayName::Paypal => Arc::new(
            PaypalGateway::new(PaypalConfig::from_settings(snapshot, runtime)?)?
                .with_alerts(alerts.clone()),
        ),
        GatewayName::PaypalMe => Arc::new(PaypalMeGateway::new(PaypalMeConfig::from_settings(
            snapshot,
        )?)),
        GatewayName::PaypalCheckoutLink => Arc::new(PaypalCheckoutLinkGateway::new(
            PaypalCheckoutLinkConfig::from_settings(snapshot, runtime)?,
        )?),
    };
    Ok(gateway)
}

impl GatewayFactory {
    pub fn from_settings(
        snapshot: &SettingsSnapshot,
        runtime: &PaymentRuntimeConfig,
        settings: Arc<PaymentSettings>,
        alerts: AdminAlertEmitter,
    ) -> Self {
        let mut gateways = HashMap::new();
        for name in GatewayName::ALL {
            let built = build_gateway(name, snapshot, runtime, &alerts);
            match &built {
                Ok(_) => info!(gateway = %name, "payment gateway configured"),
                Err(e) => warn!(gateway = %name, error = %e, "payment gateway unavailable"),
            }
            gateways.insert(name, built);
        }
        Self { gateways, settings }
    }

    /// Factory over ready-made gateways; names not supplied are unavailable.
    pub fn with_gateways(
        gateways: Vec<Arc<dyn PaymentGateway>>,
        settings: Arc<PaymentSettings>,
    ) -> Self {
        let gateways = gateways
            .into_iter()
            .map(|g| (g.name(), Ok(g)))
            .collect();
        Self { gateways, settings }
    }

    /// Explicit name first, then the configured active gateway (cached),
    /// then the built-in default.
    pub async fn get_gateway(
        &self,
        name: Option<GatewayName>,
    ) -> PaymentResult<Arc<dyn PaymentGateway>> {
        let name = match name {
            Some(name) => name,
            None => self.settings.active_gateway().await,
        };
        self.gateway(name)
    }

    /// Lookup by name without consulting the active-gateway setting.
    pub fn gateway(&self, name: GatewayName) -> PaymentResult<Arc<dyn PaymentGateway>> {
        match self.gateways.get(&name) {
            Some(Ok(gateway)) => Ok(gateway.clone()),
            Some(Err(e)) => Err(e.clone()),
            None => Err(PaymentError::configuration(
                name.as_str(),
                "gateway is not configured",
            )),
        }
    }

    pub async fn active_gateway_name(&self) -> GatewayName {
        self.settings.active_gateway().await
    }

    pub fn settings(&self) -> &Arc<PaymentSettings> {
        &self.settings
    }

    pub fn list_gateways(&self) -> Vec<GatewayStatus> {
        GatewayName::ALL
            .iter()
            .map(|name| match self.gateways.get(name) {
                Some(Ok(gateway)) => GatewayStatus {
                    name: *name,
                    available: true,
                    capabilities: Some(gateway.capabilities()),
                    error: None,
                },
                Some(Err(e)) => GatewayStatus {
                    name: *name,
                    available: false,
                    capabilities: None,
                    error: Some(e.to_string()),
                },
                None => GatewayStatus {
                    name: *name,
                    available: false,
                    capabilities: None,
                    error: Some("gateway is not configured".to_string()),
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::database::memory::InMemorySiteConfigRepository;
    use crate::services::notification::alert_channel;
    use std::time::Duration;

    fn settings(store: Arc<InMemorySiteConfigRepository>) -> Arc<PaymentSettings> {
        Arc::new(
            PaymentSettings::new(store, Duration::from_secs(60), Arc::new(ManualClock::default()))
                .with_defaults(99_000, GatewayName::Midtrans),
        )
    }

    #[tokio::test]
    async fn missing_credentials_never_fall_back() {
        let snapshot = SettingsSnapshot::from_pairs(
            [("MIDTRANS_SERVER_KEY", "SB-Mid-server-abc")],
            Vec::<(String, String)>::new(),
        );
        let (alerts, _rx) = alert_channel(8);
        let factory = GatewayFactory::from_settings(
            &snapshot,
            &PaymentRuntimeConfig::default(),
            settings(Arc::new(InMemorySiteConfigRepository::new())),
            alerts,
        );

        let midtrans = factory.get_gateway(None).await.unwrap();
        assert_eq!(midtrans.name(), GatewayName::Midtrans);

        let err = factory
            .get_gateway(Some(GatewayName::Duitku))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PaymentError::ConfigurationError { .. }));

        let listed = factory.list_gateways();
        assert_eq!(listed.len(), GatewayName::ALL.len());
        assert!(listed.iter().any(|s| s.name == GatewayName::Midtrans && s.available));
        assert!(listed.iter().any(|s| s.name == GatewayName::Paypal && !s.available));
    }

    #[tokio::test]
    async fn active_gateway_comes_from_site_config() {
        let snapshot = SettingsSnapshot::from_pairs(
            [("PAYPAL_ME_USERNAME", "premiumshop")],
            Vec::<(String, String)>::new(),
        );
        let store = Arc::new(InMemorySiteConfigRepository::with_values([(
            "active_payment_gateway",
            "paypal_me",
        )]));
        let (alerts, _rx) = alert_channel(8);
        let factory = GatewayFactory::from_settings(
            &snapshot,
            &PaymentRuntimeConfig::default(),
            settings(store),
            alerts,
        );

        assert_eq!(factory.active_gateway_name().await, GatewayName::PaypalMe);
        let gateway = factory.get_gateway(None).await.unwrap();
        assert!(!gateway.capabilities().supports_webhooks);
    }
}
