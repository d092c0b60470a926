//! Clients for the platform's internal SSO.

mod admin;
mod client;

pub use admin::{
    AdminUser, ExternalIdentityDirectory, SsoAdminClient, EXTERNAL_ID_ATTRIBUTE,
};
pub use client::{SsoClient, SsoUser};
