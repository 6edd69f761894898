pub mod database;
pub mod engine;
pub mod error;
pub mod jwt;
pub mod key_set;
pub mod memory;
pub mod provider;
pub mod recipients;
pub mod remote_client;
pub mod settings_sync;
pub mod store;
pub mod token_manager;

pub use database::Database;
pub use engine::{FederationEngine, ProviderLinks, SettingsUpdate, TokenPolicy};
pub use error::FederationError;
pub use jwt::{InvalidToken, JwtVerifier, VerifiedClaims};
pub use key_set::{Clock, KeySetCache, KeySetSource, SystemClock};
pub use memory::InMemoryStore;
pub use provider::ProviderClient;
pub use recipients::{RecipientSuggestionAggregator, SuggestionQuery};
pub use remote_client::{RemoteResourceClient, RemoteResources};
pub use settings_sync::{scope_for_role, OrganisationRole, SettingsSynchronizer};
pub use store::{
    CredentialStore, FederationStore, OrganisationStore, RecipientStore, StoreHealth, UserStore,
};
pub use token_manager::{TokenLifecycleManager, TokenRefresher};
