use tracing::{debug, warn};

use crate::{
    api::{AdminApi, AdminClient},
    config::{AdminPolicy, Settings},
};

/// Why a sender was let in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Grant {
    /// The admin API says the account is linked to this SSO provider.
    SsoProvider(String),
    /// The sender is listed by name.
    Identity,
}

/// Decides whether `sender` may manage invitations. SSO rules are checked
/// first (only when an admin access token is configured), then the listed
/// identities.
pub async fn authorize(http: &reqwest::Client, settings: &Settings, sender: &str) -> Option<Grant> {
    if let Some(access) = &settings.admin_api {
        let admin = AdminClient::new(http, access);
        if let Some(provider) = delegated_grant(&admin, &settings.admins, sender).await {
            return Some(Grant::SsoProvider(provider));
        }
    }

    if settings.admins.has_identity(sender) {
        return Some(Grant::Identity);
    }

    None
}

/// Looks the sender up once and returns the first linked provider that one
/// of the `sso:` rules accepts. Lookup failures only mean "not via SSO".
pub async fn delegated_grant<A>(admin: &A, policy: &AdminPolicy, sender: &str) -> Option<String>
where
    A: AdminApi + Sync,
{
    let accepted: Vec<&str> = policy.sso_providers().collect();
    if accepted.is_empty() {
        return None;
    }

    match admin.auth_providers(sender).await {
        Ok(linked) => {
            debug!(sender = %sender, linked = ?linked, "checked sso providers");
            linked
                .into_iter()
                .find(|p| accepted.contains(&p.as_str()))
        }
        Err(e) => {
            warn!(sender = %sender, error = %e, "admin API lookup failed, falling back to the admin list");
            None
        }
    }
}
