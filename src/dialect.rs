//! The two flavours of the registration service's token API.
//!
//! Older installs (`legacy_mr = true`) serve the token endpoints from the
//! root of `reg_url`, expect `MM.DD.YYYY` dates and disable tokens with a
//! `PUT`. Current installs live under `/api`, use ISO dates and `PATCH`.

use chrono::NaiveDate;
use reqwest::Method;
use serde_json::{json, Value};
use std::fmt;

/// The request that disables a token.
#[derive(Clone, Debug, PartialEq)]
pub struct RevokeRequest {
    pub method: Method,
    pub body: Value,
}

pub trait ApiDialect: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// Root of the token endpoints, derived from the configured `reg_url`.
    fn base_url(&self, reg_url: &str) -> String;

    fn format_expiration(&self, date: NaiveDate) -> String;

    fn revoke_request(&self) -> RevokeRequest;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Legacy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Current;

static LEGACY: Legacy = Legacy;
static CURRENT: Current = Current;

pub fn for_legacy_flag(legacy: bool) -> &'static dyn ApiDialect {
    if legacy {
        &LEGACY
    } else {
        &CURRENT
    }
}

impl ApiDialect for Legacy {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn base_url(&self, reg_url: &str) -> String {
        reg_url.to_string()
    }

    fn format_expiration(&self, date: NaiveDate) -> String {
        date.format("%m.%d.%Y").to_string()
    }

    fn revoke_request(&self) -> RevokeRequest {
        RevokeRequest {
            method: Method::PUT,
            body: json!({ "disable": true }),
        }
    }
}

impl ApiDialect for Current {
    fn name(&self) -> &'static str {
        "current"
    }

    fn base_url(&self, reg_url: &str) -> String {
        format!("{}/api", reg_url)
    }

    fn format_expiration(&self, date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    fn revoke_request(&self) -> RevokeRequest {
        RevokeRequest {
            method: Method::PATCH,
            body: json!({ "disabled": true }),
        }
    }
}
