//! Organisation settings: the local row, the remote settings bundle and the
//! patch type that moves values between them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// Settings fields that take part in federation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SettingsField {
    BrandingEnabled,
    BrandingLogo,
    BrandingCompanyDetails,
    DocumentLanguage,
    DocumentTimezone,
    DocumentDateFormat,
    DocumentVisibility,
    TypedSignatureEnabled,
    UploadSignatureEnabled,
    DrawSignatureEnabled,
    IncludeSenderDetails,
    IncludeSigningCertificate,
    IncludeAuditLog,
    EmailReplyTo,
}

impl SettingsField {
    pub const ALL: [SettingsField; 14] = [
        SettingsField::BrandingEnabled,
        SettingsField::BrandingLogo,
        SettingsField::BrandingCompanyDetails,
        SettingsField::DocumentLanguage,
        SettingsField::DocumentTimezone,
        SettingsField::DocumentDateFormat,
        SettingsField::DocumentVisibility,
        SettingsField::TypedSignatureEnabled,
        SettingsField::UploadSignatureEnabled,
        SettingsField::DrawSignatureEnabled,
        SettingsField::IncludeSenderDetails,
        SettingsField::IncludeSigningCertificate,
        SettingsField::IncludeAuditLog,
        SettingsField::EmailReplyTo,
    ];

    pub const BRANDING: [SettingsField; 3] = [
        SettingsField::BrandingEnabled,
        SettingsField::BrandingLogo,
        SettingsField::BrandingCompanyDetails,
    ];

    /// Key used in the remote settings bundle.
    pub fn wire_name(&self) -> &'static str {
        match self {
            SettingsField::BrandingEnabled => "brandingEnabled",
            SettingsField::BrandingLogo => "brandingLogo",
            SettingsField::BrandingCompanyDetails => "brandingCompanyDetails",
            SettingsField::DocumentLanguage => "documentLanguage",
            SettingsField::DocumentTimezone => "documentTimezone",
            SettingsField::DocumentDateFormat => "documentDateFormat",
            SettingsField::DocumentVisibility => "documentVisibility",
            SettingsField::TypedSignatureEnabled => "typedSignatureEnabled",
            SettingsField::UploadSignatureEnabled => "uploadSignatureEnabled",
            SettingsField::DrawSignatureEnabled => "drawSignatureEnabled",
            SettingsField::IncludeSenderDetails => "includeSenderDetails",
            SettingsField::IncludeSigningCertificate => "includeSigningCertificate",
            SettingsField::IncludeAuditLog => "includeAuditLog",
            SettingsField::EmailReplyTo => "emailReplyTo",
        }
    }

    /// Column in `organisation_settings`.
    pub fn column(&self) -> &'static str {
        match self {
            SettingsField::BrandingEnabled => "branding_enabled",
            SettingsField::BrandingLogo => "branding_logo",
            SettingsField::BrandingCompanyDetails => "branding_company_details",
            SettingsField::DocumentLanguage => "document_language",
            SettingsField::DocumentTimezone => "document_timezone",
            SettingsField::DocumentDateFormat => "document_date_format",
            SettingsField::DocumentVisibility => "document_visibility",
            SettingsField::TypedSignatureEnabled => "typed_signature_enabled",
            SettingsField::UploadSignatureEnabled => "upload_signature_enabled",
            SettingsField::DrawSignatureEnabled => "draw_signature_enabled",
            SettingsField::IncludeSenderDetails => "include_sender_details",
            SettingsField::IncludeSigningCertificate => "include_signing_certificate",
            SettingsField::IncludeAuditLog => "include_audit_log",
            SettingsField::EmailReplyTo => "email_reply_to",
        }
    }

    pub fn is_branding(&self) -> bool {
        Self::BRANDING.contains(self)
    }
}

/// Authoritative local settings row for one organisation.
///
/// `None` means "unset"; pull sync only ever fills unset fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, FromRow)]
pub struct LocalOrganisationSettings {
    pub org_id: Uuid,
    pub document_language: Option<String>,
    pub document_timezone: Option<String>,
    pub document_date_format: Option<String>,
    pub document_visibility: Option<String>,
    pub typed_signature_enabled: Option<bool>,
    pub upload_signature_enabled: Option<bool>,
    pub draw_signature_enabled: Option<bool>,
    pub include_sender_details: Option<bool>,
    pub include_signing_certificate: Option<bool>,
    pub include_audit_log: Option<bool>,
    pub email_reply_to: Option<String>,
    pub branding_enabled: Option<bool>,
    pub branding_logo: Option<String>,
    /// Set when `branding_logo` was defaulted from the provider organisation
    /// avatar rather than chosen by a local administrator.
    pub branding_logo_derived: bool,
    pub branding_company_details: Option<String>,
    /// Local only, never federated.
    pub ui_theme: Option<String>,
    pub updated_utc: Option<DateTime<Utc>>,
}

impl LocalOrganisationSettings {
    pub fn empty(org_id: Uuid) -> Self {
        Self {
            org_id,
            ..Default::default()
        }
    }

    /// JSON value of a federated field, `null` when unset.
    pub fn field_value(&self, field: SettingsField) -> Value {
        match field {
            SettingsField::BrandingEnabled => json!(self.branding_enabled),
            SettingsField::BrandingLogo => json!(self.branding_logo),
            SettingsField::BrandingCompanyDetails => json!(self.branding_company_details),
            SettingsField::DocumentLanguage => json!(self.document_language),
            SettingsField::DocumentTimezone => json!(self.document_timezone),
            SettingsField::DocumentDateFormat => json!(self.document_date_format),
            SettingsField::DocumentVisibility => json!(self.document_visibility),
            SettingsField::TypedSignatureEnabled => json!(self.typed_signature_enabled),
            SettingsField::UploadSignatureEnabled => json!(self.upload_signature_enabled),
            SettingsField::DrawSignatureEnabled => json!(self.draw_signature_enabled),
            SettingsField::IncludeSenderDetails => json!(self.include_sender_details),
            SettingsField::IncludeSigningCertificate => json!(self.include_signing_certificate),
            SettingsField::IncludeAuditLog => json!(self.include_audit_log),
            SettingsField::EmailReplyTo => json!(self.email_reply_to),
        }
    }
}

/// Typed view of the remote `settings-bundle` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsBundle {
    pub branding_enabled: Option<bool>,
    pub branding_logo: Option<String>,
    pub branding_company_details: Option<String>,
    pub document_language: Option<String>,
    pub document_timezone: Option<String>,
    pub document_date_format: Option<String>,
    pub document_visibility: Option<String>,
    pub typed_signature_enabled: Option<bool>,
    pub upload_signature_enabled: Option<bool>,
    pub draw_signature_enabled: Option<bool>,
    pub include_sender_details: Option<bool>,
    pub include_signing_certificate: Option<bool>,
    pub include_audit_log: Option<bool>,
    pub email_reply_to: Option<String>,
}

impl SettingsBundle {
    /// Parse a remote payload. Fields with the wrong type make the whole
    /// payload unusable and yield `None`.
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

/// Column value bound when a patch is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchValue {
    Text(String),
    Flag(bool),
}

/// A set of field assignments against one organisation's settings row.
///
/// Used both for the pull diff and for local administrator updates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    #[validate(length(min = 2, max = 16))]
    pub document_language: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub document_timezone: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub document_date_format: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub document_visibility: Option<String>,
    pub typed_signature_enabled: Option<bool>,
    pub upload_signature_enabled: Option<bool>,
    pub draw_signature_enabled: Option<bool>,
    pub include_sender_details: Option<bool>,
    pub include_signing_certificate: Option<bool>,
    pub include_audit_log: Option<bool>,
    #[validate(email(message = "Invalid reply-to email"))]
    pub email_reply_to: Option<String>,
    pub branding_enabled: Option<bool>,
    #[validate(length(max = 2048))]
    pub branding_logo: Option<String>,
    #[serde(skip)]
    pub branding_logo_derived: Option<bool>,
    #[validate(length(max = 1024))]
    pub branding_company_details: Option<String>,
    #[validate(length(max = 32))]
    pub ui_theme: Option<String>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.columns().is_empty()
    }

    /// Assignments as (column, value) pairs, in a stable order.
    pub fn columns(&self) -> Vec<(&'static str, PatchValue)> {
        let text = |column: &'static str, value: &Option<String>| {
            value
                .as_ref()
                .map(|v| (column, PatchValue::Text(v.clone())))
        };
        let flag =
            |column: &'static str, value: &Option<bool>| value.map(|v| (column, PatchValue::Flag(v)));

        [
            text("document_language", &self.document_language),
            text("document_timezone", &self.document_timezone),
            text("document_date_format", &self.document_date_format),
            text("document_visibility", &self.document_visibility),
            flag("typed_signature_enabled", &self.typed_signature_enabled),
            flag("upload_signature_enabled", &self.upload_signature_enabled),
            flag("draw_signature_enabled", &self.draw_signature_enabled),
            flag("include_sender_details", &self.include_sender_details),
            flag("include_signing_certificate", &self.include_signing_certificate),
            flag("include_audit_log", &self.include_audit_log),
            text("email_reply_to", &self.email_reply_to),
            flag("branding_enabled", &self.branding_enabled),
            text("branding_logo", &self.branding_logo),
            flag("branding_logo_derived", &self.branding_logo_derived),
            text("branding_company_details", &self.branding_company_details),
            text("ui_theme", &self.ui_theme),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Apply the assignments to an in-memory row.
    pub fn apply_to(&self, settings: &mut LocalOrganisationSettings) {
        fn set<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if let Some(v) = value {
                *target = Some(v.clone());
            }
        }

        set(&mut settings.document_language, &self.document_language);
        set(&mut settings.document_timezone, &self.document_timezone);
        set(&mut settings.document_date_format, &self.document_date_format);
        set(&mut settings.document_visibility, &self.document_visibility);
        set(&mut settings.typed_signature_enabled, &self.typed_signature_enabled);
        set(&mut settings.upload_signature_enabled, &self.upload_signature_enabled);
        set(&mut settings.draw_signature_enabled, &self.draw_signature_enabled);
        set(&mut settings.include_sender_details, &self.include_sender_details);
        set(
            &mut settings.include_signing_certificate,
            &self.include_signing_certificate,
        );
        set(&mut settings.include_audit_log, &self.include_audit_log);
        set(&mut settings.email_reply_to, &self.email_reply_to);
        set(&mut settings.branding_enabled, &self.branding_enabled);
        set(&mut settings.branding_logo, &self.branding_logo);
        if let Some(derived) = self.branding_logo_derived {
            settings.branding_logo_derived = derived;
        }
        set(
            &mut settings.branding_company_details,
            &self.branding_company_details,
        );
        set(&mut settings.ui_theme, &self.ui_theme);
        settings.updated_utc = Some(Utc::now());
    }

    /// Apply the assignments only where the row still has no value. A logo
    /// replaces a missing or derived one. Signature flags are dropped if the
    /// result would disable every signature type, unset counting as enabled.
    pub fn fill_unset_in(&self, settings: &mut LocalOrganisationSettings) {
        fn fill<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
            if target.is_none() {
                target.clone_from(value);
            }
        }

        fill(&mut settings.document_language, &self.document_language);
        fill(&mut settings.document_timezone, &self.document_timezone);
        fill(&mut settings.document_date_format, &self.document_date_format);
        fill(&mut settings.document_visibility, &self.document_visibility);
        fill(&mut settings.include_sender_details, &self.include_sender_details);
        fill(
            &mut settings.include_signing_certificate,
            &self.include_signing_certificate,
        );
        fill(&mut settings.include_audit_log, &self.include_audit_log);
        fill(&mut settings.email_reply_to, &self.email_reply_to);
        fill(&mut settings.branding_enabled, &self.branding_enabled);
        fill(
            &mut settings.branding_company_details,
            &self.branding_company_details,
        );
        fill(&mut settings.ui_theme, &self.ui_theme);

        let logo_replaceable = settings.branding_logo.is_none() || settings.branding_logo_derived;
        if logo_replaceable && self.branding_logo.is_some() {
            settings.branding_logo.clone_from(&self.branding_logo);
            if let Some(derived) = self.branding_logo_derived {
                settings.branding_logo_derived = derived;
            }
        }

        let enabled = |current: Option<bool>, patched: Option<bool>| {
            current.or(patched).unwrap_or(true)
        };
        let any_enabled = enabled(settings.typed_signature_enabled, self.typed_signature_enabled)
            || enabled(settings.upload_signature_enabled, self.upload_signature_enabled)
            || enabled(settings.draw_signature_enabled, self.draw_signature_enabled);
        if any_enabled {
            fill(&mut settings.typed_signature_enabled, &self.typed_signature_enabled);
            fill(&mut settings.upload_signature_enabled, &self.upload_signature_enabled);
            fill(&mut settings.draw_signature_enabled, &self.draw_signature_enabled);
        }

        settings.updated_utc = Some(Utc::now());
    }

    /// Local edits to the logo are administrator choices, never derived.
    pub fn mark_logo_user_set(mut self) -> Self {
        if self.branding_logo.is_some() {
            self.branding_logo_derived = Some(false);
        }
        self
    }
}
