//! Domain models for the federation engine.

pub mod credential;
pub mod recipient;
pub mod remote;
pub mod settings;
pub mod user;

pub use credential::{ProviderCredential, TokenResponse};
pub use recipient::{is_valid_email, PaginatedSuggestions, RecipientSuggestion};
pub use remote::{
    NewConfigRecord, RemoteConfigRecord, RemoteDirectoryUser, RemoteOrganisation,
    RemoteUserPreferences, RemoteUserProfile, SETTINGS_BUNDLE_IDENTIFIER,
};
pub use settings::{LocalOrganisationSettings, SettingsBundle, SettingsField, SettingsPatch};
pub use user::LocalUser;
