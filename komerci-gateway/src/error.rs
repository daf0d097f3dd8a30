use common_money::CurrencyCode;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("reference does not start with the invoice prefix")]
    PrefixMismatch,
    #[error("reference suffix is not a non-negative integer")]
    NotNumeric,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("currency {0} is not accepted by this gateway")]
    UnsupportedCurrency(CurrencyCode),
    #[error("gateway is disabled")]
    Disabled,
    #[error("shared secret is not configured")]
    MissingSecret,
    #[error("invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Network(String),
    #[error("provider rejected the payment request: {0}")]
    Rejected(String),
    #[error("provider response could not be understood: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Only transport failures are worth retrying; the other variants are final for the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Network(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("notification field `{0}` is missing or malformed")]
    Malformed(&'static str),
    #[error("notification signature does not match")]
    BadSignature,
    #[error("notification reference is invalid: {0}")]
    BadReference(DecodeError),
}

impl VerificationError {
    pub fn code(&self) -> &'static str {
        match self {
            VerificationError::Malformed(_) => "malformed_notification",
            VerificationError::BadSignature => "bad_signature",
            VerificationError::BadReference(_) => "bad_reference",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("order store unavailable: {0}")]
    Unavailable(String),
    #[error("order store refused the request: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    /// Text safe to show the buyer. Provider and store details stay in the logs.
    pub fn buyer_message(&self) -> &'static str {
        match self {
            GatewayError::Config(ConfigError::UnsupportedCurrency(_)) => {
                "Komerci only accepts payments in Brazilian Real."
            }
            GatewayError::Config(_) => "Komerci is not available for this order.",
            GatewayError::Provider(err) if err.is_retryable() => {
                "Could not reach Komerci. Please try again in a few moments."
            }
            GatewayError::Provider(_) => {
                "Komerci could not start this payment. Please choose another payment method."
            }
            GatewayError::Store(_) => "We could not prepare your order for payment. Please try again.",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(ConfigError::UnsupportedCurrency(_)) => "unsupported_currency",
            GatewayError::Config(ConfigError::Disabled) => "gateway_disabled",
            GatewayError::Config(_) => "gateway_misconfigured",
            GatewayError::Provider(ProviderError::Network(_)) => "provider_unavailable",
            GatewayError::Provider(ProviderError::Rejected(_)) => "provider_rejected",
            GatewayError::Provider(ProviderError::MalformedResponse(_)) => "provider_malformed_response",
            GatewayError::Store(_) => "order_store_unavailable",
        }
    }
}
