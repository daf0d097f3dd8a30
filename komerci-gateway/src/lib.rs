pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod mailer;
pub mod observe;
pub mod payment_handlers;
pub mod reconcile;
pub mod reference;
pub mod store;
pub mod token;
pub mod verifier;

pub use app::{build_router, AppState};
pub use error::{ConfigError, DecodeError, GatewayError, ProviderError, StoreError, VerificationError};
pub use gateway::{GatewayListing, KomerciGateway, NotificationReply, RedirectInstruction, Refusal};
pub use reconcile::{IgnoreReason, Outcome, Reconciler, RejectReason};
pub use reference::{InvoiceReference, OrderId};
pub use store::{Order, OrderStatus, OrderStore};
