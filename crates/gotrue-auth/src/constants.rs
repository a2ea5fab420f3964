//! GoTrue endpoint paths and defaults

use std::time::Duration;

/// Token endpoint; the grant is selected with `?grant_type=`
pub const TOKEN_PATH: &str = "/auth/v1/token";

/// Authorization endpoint for external identity providers
pub const AUTHORIZE_PATH: &str = "/auth/v1/authorize";

/// Current user lookup for an access token
pub const USER_PATH: &str = "/auth/v1/user";

/// Server-side session revocation
pub const LOGOUT_PATH: &str = "/auth/v1/logout";

/// Header carrying the project's public (anon) key on every request
pub const API_KEY_HEADER: &str = "apikey";

/// Refresh sessions that expire within this margin.
pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::from_secs(300);

/// Callback `type` marking a password-recovery sign-in
pub const RECOVERY_CALLBACK_TYPE: &str = "recovery";
