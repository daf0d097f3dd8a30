use anyhow::{anyhow, Context, Result};
use common_money::CurrencyCode;
use std::collections::BTreeSet;
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::reference::prefix_is_ambiguous;

pub const GATEWAY_ID: &str = "komerci";

/// Merchant-facing gateway settings. One snapshot is shared by every request.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub enabled: bool,
    pub title: String,
    pub description: String,
    pub invoice_prefix: String,
    pub allowed_currencies: BTreeSet<CurrencyCode>,
    pub allowed_countries: BTreeSet<String>,
    pub debug: bool,
}

impl GatewayConfig {
    pub fn accepts_currency(&self, currency: &CurrencyCode) -> bool {
        self.allowed_currencies.contains(currency)
    }

    /// Countries are ISO 3166 alpha-2 codes compared case-insensitively.
    pub fn accepts_country(&self, country: &str) -> bool {
        self.allowed_countries
            .contains(&country.trim().to_ascii_uppercase())
    }

    /// The gateway only makes sense when the store itself prices in an accepted currency.
    pub fn is_valid_for_use(&self, store_currency: &CurrencyCode) -> bool {
        self.accepts_currency(store_currency)
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            title: "Komerci".to_string(),
            description: "Pay via Komerci".to_string(),
            invoice_prefix: "WC-".to_string(),
            allowed_currencies: default_currencies(),
            allowed_countries: default_countries(),
            debug: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub token_url: String,
    pub payment_url: String,
    pub notification_url: Option<String>,
    pub shared_secret: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct MailConfig {
    pub webhook_url: Option<String>,
    pub webhook_bearer: Option<String>,
    pub admin_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub gateway: GatewayConfig,
    pub provider: ProviderConfig,
    pub mail: MailConfig,
    pub store_currency: CurrencyCode,
    pub host_store_url: Option<String>,
    /// Bound on every host store and mail relay call.
    pub host_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub host: String,
    pub port: u16,
}

pub fn load_settings() -> Result<Settings> {
    let default = GatewayConfig::default();
    let invoice_prefix = env::var("KOMERCI_INVOICE_PREFIX").unwrap_or(default.invoice_prefix);
    if prefix_is_ambiguous(&invoice_prefix) {
        warn!(
            prefix = %invoice_prefix,
            "KOMERCI_INVOICE_PREFIX ends with a digit; invoice references may be ambiguous"
        );
    }

    let allowed_currencies = env::var("KOMERCI_ALLOWED_CURRENCIES")
        .ok()
        .map(|value| parse_currency_list(&value))
        .transpose()
        .context("Failed to parse KOMERCI_ALLOWED_CURRENCIES")?
        .unwrap_or(default.allowed_currencies);
    if allowed_currencies.is_empty() {
        return Err(anyhow!("KOMERCI_ALLOWED_CURRENCIES must name at least one currency"));
    }
    let allowed_countries = env::var("KOMERCI_ALLOWED_COUNTRIES")
        .ok()
        .map(|value| parse_country_list(&value))
        .unwrap_or(default.allowed_countries);

    let gateway = GatewayConfig {
        enabled: bool_from_env("KOMERCI_ENABLED").unwrap_or(default.enabled),
        title: env::var("KOMERCI_TITLE").unwrap_or(default.title),
        description: env::var("KOMERCI_DESCRIPTION").unwrap_or(default.description),
        invoice_prefix,
        allowed_currencies,
        allowed_countries,
        debug: bool_from_env("KOMERCI_DEBUG").unwrap_or(false),
    };

    let shared_secret = env::var("KOMERCI_SHARED_SECRET")
        .ok()
        .and_then(|value| normalize_optional(&value))
        .context("KOMERCI_SHARED_SECRET must be set")?;
    let token_url = env::var("KOMERCI_TOKEN_URL").context("KOMERCI_TOKEN_URL must be set")?;
    let payment_url = env::var("KOMERCI_PAYMENT_URL").context("KOMERCI_PAYMENT_URL must be set")?;
    let timeout_secs = env::var("KOMERCI_TIMEOUT_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(15);
    let provider = ProviderConfig {
        token_url,
        payment_url,
        notification_url: env::var("KOMERCI_NOTIFICATION_URL")
            .ok()
            .and_then(|value| normalize_optional(&value)),
        shared_secret,
        timeout: Duration::from_secs(timeout_secs.max(1)),
    };

    let mail = MailConfig {
        webhook_url: env::var("MAIL_WEBHOOK_URL")
            .ok()
            .and_then(|value| normalize_optional(&value)),
        webhook_bearer: env::var("MAIL_WEBHOOK_BEARER")
            .ok()
            .and_then(|value| normalize_optional(&value)),
        admin_address: env::var("MAIL_ADMIN_ADDRESS")
            .ok()
            .and_then(|value| normalize_optional(&value)),
    };

    let host_timeout_secs = env::var("HOST_STORE_TIMEOUT_SECONDS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(10);

    let store_currency = env::var("STORE_CURRENCY")
        .unwrap_or_else(|_| "BRL".to_string())
        .parse::<CurrencyCode>()
        .context("Failed to parse STORE_CURRENCY")?;

    let allowed_origins = env::var("ALLOWED_ORIGINS")
        .map(|value| split_list(&value).map(str::to_string).collect())
        .unwrap_or_else(|_| {
            vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ]
        });

    let port = env::var("PORT")
        .ok()
        .map(|value| value.parse::<u16>())
        .transpose()
        .context("Failed to parse PORT")?
        .unwrap_or(8087);

    Ok(Settings {
        gateway,
        provider,
        mail,
        store_currency,
        host_store_url: env::var("HOST_STORE_URL")
            .ok()
            .and_then(|value| normalize_optional(&value)),
        host_timeout: Duration::from_secs(host_timeout_secs.max(1)),
        allowed_origins,
        host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
        port,
    })
}

fn bool_from_env(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        matches!(
            value.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(|c| c == ',' || c == ';' || c == ' ')
        .map(str::trim)
        .filter(|item| !item.is_empty())
}

fn parse_currency_list(value: &str) -> Result<BTreeSet<CurrencyCode>> {
    split_list(value)
        .map(|item| {
            item.parse::<CurrencyCode>()
                .map_err(|err| anyhow!("Invalid currency '{item}': {err}"))
        })
        .collect()
}

fn parse_country_list(value: &str) -> BTreeSet<String> {
    split_list(value).map(str::to_ascii_uppercase).collect()
}

fn default_currencies() -> BTreeSet<CurrencyCode> {
    BTreeSet::from([CurrencyCode::try_from("BRL".to_string()).expect("BRL is a valid currency code")])
}

fn default_countries() -> BTreeSet<String> {
    BTreeSet::from(["BR".to_string()])
}

fn normalize_optional(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
