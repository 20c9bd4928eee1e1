use crate::{token::TokenClaims, Error};

/// Checks that verified `claims` grant `required_permission`.
///
/// Permissions are matched literally, `get:actors` does not imply or match `get:*`.
pub fn authorize(claims: &TokenClaims, required_permission: &str) -> Result<(), Error> {
    let permissions = claims
        .permissions
        .as_ref()
        .ok_or(Error::MissingPermissionsClaim)?;
    if !permissions.contains(required_permission) {
        return Err(Error::MissingPermission {
            required: required_permission.to_string(),
        });
    }
    Ok(())
}
