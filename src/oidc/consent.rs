//
// Consent ledger (§4.4): persists a user/client scope grant so a later
// `/authorize` for the same (user, client, scope-subset) skips the
// consent page.
//
use crate::db::models::Consent;
use crate::db::DbConn;
use crate::error::Error;

/// Records the grant; the client is expected to re-submit `/authorize`
/// itself once this returns, now that a covering consent exists.
pub async fn record(user_id: &str, client_id: &str, granted_scopes: &str, conn: &DbConn) -> Result<(), Error> {
    Consent::grant(user_id, client_id, granted_scopes, conn).await
}
