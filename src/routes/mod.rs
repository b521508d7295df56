pub mod cache;
pub mod health;
pub mod rate_limit;

use crate::{AppState, error::AppError, limiter::{CallerClass, CallerIdentity}};

/// Mutating admin calls need an admin token once tokens can be verified at
/// all. Without a JWT secret every caller is anonymous and the check is off.
pub(crate) fn require_admin(state: &AppState, caller: &CallerIdentity) -> Result<(), AppError> {
    if state.config.jwt_secret.is_some() && caller.class != CallerClass::Admin {
        tracing::warn!(caller = %caller.key, "admin route refused");
        return Err(AppError::Forbidden);
    }
    Ok(())
}
