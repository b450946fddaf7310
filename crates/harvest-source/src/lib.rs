pub mod client;
pub mod collector;
pub mod credentials;
pub mod detail;
pub mod enrich;
pub mod error;
pub mod invoker;
pub mod login;
pub mod query;
pub mod session;
pub mod signer;
pub mod wire;

pub use client::{SourceClient, SourceSettings};
pub use collector::{CollectedPage, CollectorState, PageCollector};
pub use credentials::{read_cache, CachedCredentials, CredentialSource, CredentialStore};
pub use enrich::EnrichmentPool;
pub use error::{CredentialError, SourceError};
pub use login::{LoginBroker, LoginRequest};
pub use query::{ListQuery, OrderFilter, TimeRange};
pub use session::SourceSession;
pub use signer::{IdentityHeaderSigner, RequestSigner, SigningContext};
