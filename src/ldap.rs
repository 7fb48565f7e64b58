//
// LDAP/SAML collaborator (A4, §2): narrow directory integration points
// the auth state machine calls into — binding a password against an
// LDAP directory, or accepting an already-issued SAML assertion —
// without this crate owning directory search, sync, or SCIM
// provisioning. Concrete LDAP plumbing beyond a single bind, and
// XML-dsig signature verification against an identity provider's
// certificate, are external deployment concerns; the trait boundary
// plus enough of a concrete implementation to exercise it end to end
// live here.
//
use chrono::{DateTime, Utc};

use crate::config::CONFIG;
use crate::error::Error;

#[derive(Debug, Clone)]
pub struct DirectoryIdentity {
    pub email: String,
    pub display_name: Option<String>,
}

#[async_trait::async_trait]
pub trait DirectoryBind: Send + Sync {
    async fn bind(&self, username: &str, password: &str) -> Result<DirectoryIdentity, Error>;
}

pub trait AssertionVerifier: Send + Sync {
    fn verify(&self, assertion_xml: &str) -> Result<DirectoryIdentity, Error>;
}

pub struct LdapBind;

#[async_trait::async_trait]
impl DirectoryBind for LdapBind {
    async fn bind(&self, username: &str, password: &str) -> Result<DirectoryIdentity, Error> {
        use ldap3::{LdapConnAsync, Scope, SearchEntry};

        let url = CONFIG.ldap_url().ok_or_else(|| Error::new("LDAP_URL is not configured"))?;
        let base = CONFIG.ldap_user_search_base().ok_or_else(|| Error::new("LDAP_USER_SEARCH_BASE is not configured"))?;

        let (conn, mut ldap) = LdapConnAsync::new(&url).await.map_err(|e| Error::new(format!("LDAP connection failed: {e}")))?;
        ldap3::drive!(conn);

        if let (Some(bind_dn), Some(bind_pw)) = (CONFIG.ldap_bind_dn(), CONFIG.ldap_bind_password()) {
            ldap.simple_bind(&bind_dn, &bind_pw).await.and_then(|r| r.success()).map_err(|e| Error::new(format!("LDAP service bind failed: {e}")))?;
        }

        let filter = format!("(uid={username})");
        let (results, _res) = ldap
            .search(&base, Scope::Subtree, &filter, vec!["mail", "cn"])
            .await
            .and_then(|r| r.success())
            .map_err(|e| Error::new(format!("LDAP search failed: {e}")))?;

        let entry = results.into_iter().next().map(SearchEntry::construct).ok_or_else(|| Error::unauthenticated("no such directory entry"))?;

        let (user_conn, mut user_ldap) = LdapConnAsync::new(&url).await.map_err(|e| Error::new(format!("LDAP connection failed: {e}")))?;
        ldap3::drive!(user_conn);
        user_ldap
            .simple_bind(&entry.dn, password)
            .await
            .and_then(|r| r.success())
            .map_err(|_| Error::unauthenticated("invalid directory credentials"))?;

        let email = entry.attrs.get("mail").and_then(|v| v.first()).cloned().ok_or_else(|| Error::new("directory entry has no mail attribute"))?;
        let display_name = entry.attrs.get("cn").and_then(|v| v.first()).cloned();

        Ok(DirectoryIdentity { email, display_name })
    }
}

/// Checks structure and the `Conditions` validity window of a SAML 2.0
/// assertion. Verifying the assertion's XML signature against the
/// issuing identity provider's certificate is left to a different
/// `AssertionVerifier` supplied at the deployment's own trust anchor;
/// this one is the boundary's reference implementation.
pub struct SamlAssertionVerifier;

impl AssertionVerifier for SamlAssertionVerifier {
    fn verify(&self, assertion_xml: &str) -> Result<DirectoryIdentity, Error> {
        let doc = roxmltree::Document::parse(assertion_xml).map_err(|e| Error::validation(format!("malformed SAML assertion: {e}")))?;

        let conditions = doc.descendants().find(|n| n.has_tag_name("Conditions"));
        if let Some(conditions) = conditions {
            let now = Utc::now();
            if let Some(not_before) = conditions.attribute("NotBefore").and_then(parse_instant) {
                if now < not_before {
                    return Err(Error::unauthenticated("assertion is not yet valid"));
                }
            }
            if let Some(not_on_or_after) = conditions.attribute("NotOnOrAfter").and_then(parse_instant) {
                if now >= not_on_or_after {
                    return Err(Error::unauthenticated("assertion has expired"));
                }
            }
        }

        let name_id = doc
            .descendants()
            .find(|n| n.has_tag_name("NameID"))
            .and_then(|n| n.text())
            .ok_or_else(|| Error::validation("assertion has no NameID"))?;

        let display_name = doc
            .descendants()
            .find(|n| n.has_tag_name("Attribute") && n.attribute("Name") == Some("displayName"))
            .and_then(|n| n.descendants().find(|c| c.has_tag_name("AttributeValue")))
            .and_then(|n| n.text())
            .map(str::to_string);

        Ok(DirectoryIdentity { email: name_id.to_string(), display_name })
    }
}

fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_expired_assertion() {
        let xml = r#"<Assertion><Conditions NotBefore="2000-01-01T00:00:00Z" NotOnOrAfter="2000-01-01T00:05:00Z"/><Subject><NameID>alice@example.com</NameID></Subject></Assertion>"#;
        let err = SamlAssertionVerifier.verify(xml).unwrap_err();
        assert_eq!(err.kind().as_str(), "unauthenticated");
    }

    #[test]
    fn extracts_name_id_and_display_name() {
        let xml = r#"<Assertion>
            <Subject><NameID>alice@example.com</NameID></Subject>
            <AttributeStatement>
                <Attribute Name="displayName"><AttributeValue>Alice Example</AttributeValue></Attribute>
            </AttributeStatement>
        </Assertion>"#;
        let identity = SamlAssertionVerifier.verify(xml).unwrap();
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.display_name.as_deref(), Some("Alice Example"));
    }

    #[test]
    fn rejects_assertion_without_name_id() {
        let xml = r#"<Assertion><Subject/></Assertion>"#;
        assert!(SamlAssertionVerifier.verify(xml).is_err());
    }
}
