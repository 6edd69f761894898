//! Two-way synchronisation of organisation settings with the provider's
//! `settings-bundle` config record.
//!
//! Pull fills unset local fields from the provider. Push writes the local
//! values out, scoped by the organisation's place in the hierarchy: every
//! organisation owns its branding, only a root organisation owns document
//! policy.

use std::sync::Arc;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::remote_client::RemoteResources;
use super::store::OrganisationStore;
use super::token_manager::TokenLifecycleManager;
use super::FederationError;
use crate::models::{
    is_valid_email, LocalOrganisationSettings, NewConfigRecord, RemoteConfigRecord,
    RemoteOrganisation, RemoteUserPreferences, RemoteUserProfile, SettingsBundle, SettingsField,
    SettingsPatch, SETTINGS_BUNDLE_IDENTIFIER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrganisationRole {
    Root,
    NonRoot,
}

impl OrganisationRole {
    pub fn of(organisation: &RemoteOrganisation) -> Self {
        if organisation.is_root() {
            OrganisationRole::Root
        } else {
            OrganisationRole::NonRoot
        }
    }
}

/// Fields an organisation with the given role may write to its record.
pub fn scope_for_role(role: OrganisationRole) -> &'static [SettingsField] {
    match role {
        OrganisationRole::Root => &SettingsField::ALL,
        OrganisationRole::NonRoot => &SettingsField::BRANDING,
    }
}

/// Outbound bundle: every in-scope field, `null` when unset locally.
pub fn build_payload(
    settings: &LocalOrganisationSettings,
    scope: &[SettingsField],
) -> Map<String, Value> {
    scope
        .iter()
        .map(|field| (field.wire_name().to_string(), settings.field_value(*field)))
        .collect()
}

/// Everything the provider told us that can feed local settings.
#[derive(Debug, Clone, Copy)]
pub struct RemoteSettingsView<'a> {
    pub profile: &'a RemoteUserProfile,
    pub preferences: &'a RemoteUserPreferences,
    pub bundle: Option<&'a SettingsBundle>,
}

/// First defined, non-blank candidate, but only for an unset local field.
fn fill_text(local: &Option<String>, candidates: &[Option<&String>]) -> Option<String> {
    if local.is_some() {
        return None;
    }
    candidates
        .iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
        .map(|value| value.to_string())
}

fn fill_flag(local: Option<bool>, remote: Option<bool>) -> Option<bool> {
    match local {
        Some(_) => None,
        None => remote,
    }
}

/// Field-level diff to apply locally after a pull.
///
/// Only unset local fields are filled. Precedence between sources is config
/// record, then user preferences, then the organisation profile. The logo is
/// the one field that may replace a value, and only a value previously
/// derived from the organisation avatar.
pub fn compute_pull_diff(
    local: &LocalOrganisationSettings,
    remote: &RemoteSettingsView<'_>,
) -> SettingsPatch {
    let empty = SettingsBundle::default();
    let bundle = remote.bundle.unwrap_or(&empty);
    let preferences = remote.preferences;
    let organisation = remote.profile.organisation.as_ref();

    let mut patch = SettingsPatch {
        document_language: fill_text(
            &local.document_language,
            &[bundle.document_language.as_ref(), preferences.language.as_ref()],
        ),
        document_timezone: fill_text(
            &local.document_timezone,
            &[bundle.document_timezone.as_ref(), preferences.timezone.as_ref()],
        ),
        document_date_format: fill_text(
            &local.document_date_format,
            &[
                bundle.document_date_format.as_ref(),
                preferences.date_format.as_ref(),
            ],
        ),
        document_visibility: fill_text(
            &local.document_visibility,
            &[bundle.document_visibility.as_ref()],
        ),
        typed_signature_enabled: fill_flag(
            local.typed_signature_enabled,
            bundle.typed_signature_enabled,
        ),
        upload_signature_enabled: fill_flag(
            local.upload_signature_enabled,
            bundle.upload_signature_enabled,
        ),
        draw_signature_enabled: fill_flag(
            local.draw_signature_enabled,
            bundle.draw_signature_enabled,
        ),
        include_sender_details: fill_flag(
            local.include_sender_details,
            bundle.include_sender_details,
        ),
        include_signing_certificate: fill_flag(
            local.include_signing_certificate,
            bundle.include_signing_certificate,
        ),
        include_audit_log: fill_flag(local.include_audit_log, bundle.include_audit_log),
        email_reply_to: fill_text(&local.email_reply_to, &[bundle.email_reply_to.as_ref()])
            .filter(|email| is_valid_email(email)),
        branding_enabled: fill_flag(local.branding_enabled, bundle.branding_enabled),
        branding_company_details: fill_text(
            &local.branding_company_details,
            &[
                bundle.branding_company_details.as_ref(),
                organisation.and_then(|o| o.name.as_ref()),
            ],
        ),
        ..Default::default()
    };

    let logo_replaceable = local.branding_logo.is_none() || local.branding_logo_derived;
    if logo_replaceable {
        let candidate = non_blank(bundle.branding_logo.as_ref())
            .map(|logo| (logo, false))
            .or_else(|| {
                non_blank(organisation.and_then(|o| o.avatar.as_ref())).map(|logo| (logo, true))
            })
            .filter(|(logo, _)| local.branding_logo.as_ref() != Some(*logo));
        if let Some((logo, derived)) = candidate {
            patch.branding_logo = Some(logo.clone());
            patch.branding_logo_derived = Some(derived);
        }
    }

    keep_one_signature_type(local, patch)
}

fn non_blank(value: Option<&String>) -> Option<&String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Drop the signature flags from the patch if applying them would leave no
/// signature type enabled. Unset flags count as enabled.
fn keep_one_signature_type(
    local: &LocalOrganisationSettings,
    mut patch: SettingsPatch,
) -> SettingsPatch {
    let effective = |patched: Option<bool>, current: Option<bool>| {
        patched.or(current).unwrap_or(true)
    };

    let any_enabled = effective(patch.typed_signature_enabled, local.typed_signature_enabled)
        || effective(patch.upload_signature_enabled, local.upload_signature_enabled)
        || effective(patch.draw_signature_enabled, local.draw_signature_enabled);

    if !any_enabled {
        tracing::warn!(
            org_id = %local.org_id,
            "Remote settings would disable every signature type, keeping local signature settings"
        );
        patch.typed_signature_enabled = None;
        patch.upload_signature_enabled = None;
        patch.draw_signature_enabled = None;
    }
    patch
}

/// The organisation's own record, else its parent's (read fallback only).
fn select_readable_record<'a>(
    records: &'a [RemoteConfigRecord],
    organisation: Option<&RemoteOrganisation>,
) -> Option<&'a RemoteConfigRecord> {
    match organisation {
        Some(org) => records
            .iter()
            .find(|r| r.organisation_id == org.id)
            .or_else(|| {
                org.parent_id
                    .as_ref()
                    .and_then(|parent| records.iter().find(|r| &r.organisation_id == parent))
            }),
        None => records.first(),
    }
}

pub struct SettingsSynchronizer {
    tokens: Arc<TokenLifecycleManager>,
    remote: Option<Arc<dyn RemoteResources>>,
    organisations: Arc<dyn OrganisationStore>,
}

impl SettingsSynchronizer {
    pub fn new(
        tokens: Arc<TokenLifecycleManager>,
        remote: Option<Arc<dyn RemoteResources>>,
        organisations: Arc<dyn OrganisationStore>,
    ) -> Self {
        Self {
            tokens,
            remote,
            organisations,
        }
    }

    /// Pull provider settings into the user's organisation. Never fails;
    /// returns whether the local row is now in sync.
    #[tracing::instrument(skip(self))]
    pub async fn sync_remote_to_local(&self, user_id: Uuid) -> bool {
        match self.pull(user_id).await {
            Ok(changed) => {
                tracing::debug!(user_id = %user_id, changed, "Settings pull complete");
                true
            }
            Err(e) => {
                log_soft_failure("pull", user_id, &e);
                false
            }
        }
    }

    /// Push the organisation's local settings to the provider. Never fails;
    /// returns whether the provider accepted the write.
    #[tracing::instrument(skip(self, settings), fields(org_id = %settings.org_id))]
    pub async fn sync_local_to_remote(
        &self,
        user_id: Uuid,
        settings: &LocalOrganisationSettings,
    ) -> bool {
        match self.push(user_id, settings).await {
            Ok(()) => true,
            Err(e) => {
                log_soft_failure("push", user_id, &e);
                false
            }
        }
    }

    async fn remote_context(
        &self,
        user_id: Uuid,
    ) -> Result<(&Arc<dyn RemoteResources>, String, RemoteUserProfile), FederationError> {
        let remote = self.remote.as_ref().ok_or(FederationError::NotConfigured)?;
        let token = self.tokens.resolve_access_token(user_id).await?;
        let profile = remote
            .current_user(&token)
            .await?
            .ok_or(FederationError::RemoteRejected { status: 404 })?;
        Ok((remote, token, profile))
    }

    async fn pull(&self, user_id: Uuid) -> Result<bool, FederationError> {
        let (remote, token, profile) = self.remote_context(user_id).await?;

        let (preferences, records) = futures::try_join!(
            remote.user_preferences(&token),
            remote.list_configs(&token, SETTINGS_BUNDLE_IDENTIFIER),
        )?;

        let org_id = self
            .organisations
            .find_organisation_for_user(user_id)
            .await?
            .ok_or(FederationError::NoOrganisation)?;
        let local = self
            .organisations
            .find_settings(org_id)
            .await?
            .unwrap_or_else(|| LocalOrganisationSettings::empty(org_id));

        let bundle = select_readable_record(&records, profile.organisation.as_ref()).and_then(
            |record| {
                let bundle = SettingsBundle::from_payload(&record.payload);
                if bundle.is_none() {
                    tracing::warn!(record_id = %record.id, "Ignoring unreadable settings bundle");
                }
                bundle
            },
        );

        let view = RemoteSettingsView {
            profile: &profile,
            preferences: &preferences,
            bundle: bundle.as_ref(),
        };
        let patch = compute_pull_diff(&local, &view);
        if patch.is_empty() {
            return Ok(false);
        }

        // The diff was taken against a snapshot; the write re-checks each
        // field so a concurrent local edit wins.
        self.organisations.fill_unset_settings(org_id, &patch).await?;
        tracing::info!(
            user_id = %user_id,
            org_id = %org_id,
            fields = patch.columns().len(),
            "Applied remote settings"
        );
        Ok(true)
    }

    async fn push(
        &self,
        user_id: Uuid,
        settings: &LocalOrganisationSettings,
    ) -> Result<(), FederationError> {
        let (remote, token, profile) = self.remote_context(user_id).await?;
        let organisation = profile
            .organisation
            .as_ref()
            .ok_or(FederationError::NoOrganisation)?;

        let role = OrganisationRole::of(organisation);
        let payload = Value::Object(build_payload(settings, scope_for_role(role)));

        // Only the organisation's own record; an inherited parent record is
        // never written.
        let own_record = remote
            .list_configs(&token, SETTINGS_BUNDLE_IDENTIFIER)
            .await?
            .into_iter()
            .find(|r| r.organisation_id == organisation.id);

        match own_record {
            Some(record) => remote.update_config(&token, &record.id, &payload).await?,
            None => {
                remote
                    .create_config(
                        &token,
                        &NewConfigRecord {
                            organisation_id: organisation.id.clone(),
                            identifier: SETTINGS_BUNDLE_IDENTIFIER.to_string(),
                            payload,
                        },
                    )
                    .await?
            }
        }

        tracing::info!(
            user_id = %user_id,
            remote_org_id = %organisation.id,
            role = ?role,
            "Pushed settings to provider"
        );
        Ok(())
    }
}

fn log_soft_failure(direction: &str, user_id: Uuid, error: &FederationError) {
    match error {
        FederationError::Database(_) | FederationError::Internal(_) => {
            tracing::error!(user_id = %user_id, error = %error, "Settings {} failed", direction)
        }
        _ => tracing::warn!(user_id = %user_id, error = %error, "Settings {} skipped", direction),
    }
}
