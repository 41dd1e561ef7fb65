use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, LdapError};
use tracing::debug;

use crate::auth::AuthError;

/// LDAP result code for a bind with wrong credentials.
const INVALID_CREDENTIALS: u32 = 49;

/// The external identity directory: verifies one set of credentials.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError>;
}

/// Active Directory over LDAP, authenticated with a simple bind as
/// `user@domain`.
#[derive(Debug, Clone)]
pub struct LdapDirectory {
    url: String,
    domain: String,
    connect_timeout: Duration,
}

impl LdapDirectory {
    pub fn new(url: impl Into<String>, base_dn: &str, connect_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            domain: domain_from_base_dn(base_dn),
            connect_timeout,
        }
    }

    fn principal(&self, username: &str) -> String {
        if username.contains('@') || self.domain.is_empty() {
            username.to_owned()
        } else {
            format!("{username}@{}", self.domain)
        }
    }
}

#[async_trait]
impl IdentityDirectory for LdapDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError> {
        // An empty password would be an unauthenticated bind, which succeeds.
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::Rejected);
        }

        let settings = LdapConnSettings::new().set_conn_timeout(self.connect_timeout);
        let (conn, mut ldap) = LdapConnAsync::with_settings(settings, &self.url)
            .await
            .map_err(unavailable)?;
        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                debug!(error = %err, "ldap connection closed with error");
            }
        });

        let outcome = ldap
            .simple_bind(&self.principal(username), password)
            .await
            .map_err(unavailable)?
            .success();
        if let Err(err) = ldap.unbind().await {
            debug!(error = %err, "ldap unbind failed");
        }

        match outcome {
            Ok(_) => Ok(()),
            Err(LdapError::LdapResult { result }) if result.rc == INVALID_CREDENTIALS => {
                Err(AuthError::Rejected)
            }
            Err(err) => Err(unavailable(err)),
        }
    }
}

fn unavailable(err: LdapError) -> AuthError {
    AuthError::DirectoryUnavailable(err.to_string())
}

/// `OU=Users,dc=example,dc=org` becomes `example.org`.
fn domain_from_base_dn(base_dn: &str) -> String {
    base_dn
        .split(',')
        .filter_map(|part| part.trim().split_once('='))
        .filter(|(key, _)| key.trim().eq_ignore_ascii_case("dc"))
        .map(|(_, value)| value.trim())
        .collect::<Vec<_>>()
        .join(".")
}

/// Fixed credential table for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: HashMap<String, String>,
    unreachable: bool,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(username.into(), password.into());
        self
    }

    /// A directory that fails every call as if the network were down.
    pub fn unreachable() -> Self {
        Self {
            users: HashMap::new(),
            unreachable: true,
        }
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthError> {
        if self.unreachable {
            return Err(AuthError::DirectoryUnavailable(
                "static directory marked unreachable".into(),
            ));
        }
        match self.users.get(username) {
            Some(expected) if !password.is_empty() && expected == password => Ok(()),
            _ => Err(AuthError::Rejected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Answers the first bind on a fresh connection with `result_code`, then
    /// waits for the client to unbind and hang up.
    async fn directory_answering(result_code: u8) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let n = socket.read(&mut buf).await.unwrap();
            let request = &buf[..n];

            // LDAPMessage ::= SEQUENCE { messageID INTEGER, ... }
            let mut pos = 2;
            if request[1] & 0x80 != 0 {
                pos += usize::from(request[1] & 0x7f);
            }
            assert_eq!(request[pos], 0x02);
            let id_len = usize::from(request[pos + 1]);
            let id = &request[pos + 2..pos + 2 + id_len];

            let mut body = vec![0x02, id_len as u8];
            body.extend_from_slice(id);
            // BindResponse: resultCode, empty matchedDN, empty diagnosticMessage.
            body.extend_from_slice(&[0x61, 0x07, 0x0a, 0x01, result_code, 0x04, 0x00, 0x04, 0x00]);
            let mut message = vec![0x30, body.len() as u8];
            message.extend(body);
            socket.write_all(&message).await.unwrap();

            let _ = socket.read(&mut buf).await;
        });
        format!("ldap://{addr}")
    }

    fn ldap_at(url: String) -> LdapDirectory {
        LdapDirectory::new(url, "OU=Users,dc=test,dc=local", Duration::from_secs(2))
    }

    #[tokio::test]
    async fn accepted_bind_authenticates() {
        let directory = ldap_at(directory_answering(0).await);
        directory.authenticate("ripley", "nostromo").await.unwrap();
    }

    #[tokio::test]
    async fn invalid_credentials_code_is_a_rejection() {
        let directory = ldap_at(directory_answering(49).await);
        let err = directory.authenticate("ripley", "mother").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected));
    }

    #[tokio::test]
    async fn other_bind_failures_mean_unavailable() {
        // 52: unavailable
        let directory = ldap_at(directory_answering(52).await);
        let err = directory.authenticate("ripley", "nostromo").await.unwrap_err();
        assert!(matches!(err, AuthError::DirectoryUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn domain_is_built_from_dc_components() {
        assert_eq!(
            domain_from_base_dn("OU=Users,dc=alien,dc=moon,dc=mine"),
            "alien.moon.mine"
        );
        assert_eq!(domain_from_base_dn("DC=corp, DC=local"), "corp.local");
        assert_eq!(domain_from_base_dn("OU=Users"), "");
    }

    #[test]
    fn principal_appends_domain_once() {
        let directory = LdapDirectory::new(
            "ldap://localhost:389",
            "OU=Users,dc=alien,dc=moon,dc=mine",
            Duration::from_secs(1),
        );
        assert_eq!(directory.principal("ripley"), "ripley@alien.moon.mine");
        assert_eq!(directory.principal("ash@weyland.corp"), "ash@weyland.corp");
    }

    #[tokio::test]
    async fn empty_password_never_reaches_the_server() {
        // Port 9 is discard; a network attempt would surface as unavailable.
        let directory = LdapDirectory::new("ldap://127.0.0.1:9", "dc=test", Duration::from_millis(200));
        let err = directory.authenticate("ripley", "").await.unwrap_err();
        assert!(matches!(err, AuthError::Rejected));
    }

    #[tokio::test]
    async fn unreachable_server_is_not_a_rejection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let directory = LdapDirectory::new(
            format!("ldap://127.0.0.1:{port}"),
            "dc=test",
            Duration::from_millis(500),
        );
        let err = directory.authenticate("ripley", "secret").await.unwrap_err();
        assert!(matches!(err, AuthError::DirectoryUnavailable(_)));
    }

    #[tokio::test]
    async fn static_directory_checks_credentials() {
        let directory = StaticDirectory::new().with_user("ripley", "nostromo");
        assert!(directory.authenticate("ripley", "nostromo").await.is_ok());
        assert!(matches!(
            directory.authenticate("ripley", "wrong").await,
            Err(AuthError::Rejected)
        ));
        assert!(matches!(
            directory.authenticate("dallas", "nostromo").await,
            Err(AuthError::Rejected)
        ));
        assert!(matches!(
            StaticDirectory::unreachable()
                .authenticate("ripley", "nostromo")
                .await,
            Err(AuthError::DirectoryUnavailable(_))
        ));
    }
}
