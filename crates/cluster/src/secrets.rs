//! Declared replication sources and credentials.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use replicant_agent::{ClusterSpec, InstanceIndex, MYSQL_PORT, SourceEndpoint};
use tracing::debug;

use crate::error::SecretError;

/// Key holding the external source's hostname.
pub const PRIMARY_HOST_KEY: &str = "PRIMARY_HOST";

/// Key holding the external source's port.
pub const PRIMARY_PORT_KEY: &str = "PRIMARY_PORT";

/// Key holding the user to replicate as.
pub const PRIMARY_USER_KEY: &str = "PRIMARY_USER";

/// Key holding that user's password.
pub const PRIMARY_PASSWORD_KEY: &str = "PRIMARY_PASSWORD";

/// Key in the credentials secret holding the replication account's password.
pub const REPLICATION_PASSWORD_KEY: &str = "REPLICATION_PASSWORD";

/// Account replicas use to replicate from cluster members.
pub const REPLICATION_USER: &str = "replicant-repl";

/// Decoded contents of one secret.
pub type SecretData = HashMap<String, String>;

/// Read access to secrets in the cluster's namespace.
#[async_trait]
pub trait SecretSource: Send + Sync + 'static {
    /// Returns the contents of secret `name` in `namespace`.
    async fn get(&self, namespace: &str, name: &str) -> Result<SecretData, SecretError>;
}

/// Secrets held in memory.
#[derive(Clone, Debug, Default)]
pub struct StaticSecrets {
    secrets: HashMap<(String, String), SecretData>,
}

impl StaticSecrets {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces secret `name` in `namespace`.
    pub fn insert(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        data: SecretData,
    ) {
        self.secrets.insert((namespace.into(), name.into()), data);
    }
}

#[async_trait]
impl SecretSource for StaticSecrets {
    async fn get(&self, namespace: &str, name: &str) -> Result<SecretData, SecretError> {
        self.secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| SecretError::NotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

/// Connection options for an intermediate primary's external source.
#[derive(Clone, Eq, PartialEq)]
pub struct IntermediatePrimaryOptions {
    /// Source hostname
    pub host: String,
    /// Source port
    pub port: u16,
    /// User to replicate as
    pub user: String,
    /// Password for `user`
    pub password: String,
}

impl IntermediatePrimaryOptions {
    /// Parses the `PRIMARY_*` keys of secret `name`. The port defaults to
    /// the MySQL port when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if a required key is missing or the port is invalid.
    pub fn from_secret_data(name: &str, data: &SecretData) -> Result<Self, SecretError> {
        let required = |key: &'static str| {
            data.get(key).cloned().ok_or_else(|| SecretError::MissingKey {
                name: name.to_string(),
                key,
            })
        };

        let port = match data.get(PRIMARY_PORT_KEY) {
            None => MYSQL_PORT,
            Some(value) => value
                .trim()
                .parse::<u16>()
                .ok()
                .filter(|port| *port != 0)
                .ok_or_else(|| SecretError::InvalidPort {
                    name: name.to_string(),
                    value: value.clone(),
                })?,
        };

        Ok(Self {
            host: required(PRIMARY_HOST_KEY)?,
            port,
            user: required(PRIMARY_USER_KEY)?,
            password: required(PRIMARY_PASSWORD_KEY)?,
        })
    }

    /// The endpoint replication is configured with.
    #[must_use]
    pub fn endpoint(&self) -> SourceEndpoint {
        SourceEndpoint::new(
            self.host.clone(),
            self.port,
            self.user.clone(),
            self.password.clone(),
        )
    }
}

impl fmt::Debug for IntermediatePrimaryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntermediatePrimaryOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// What the cluster should look like, read fresh from its secrets each pass.
#[derive(Clone, Debug)]
pub struct Intent {
    /// External source the primary must replicate from, in intermediate mode.
    pub declared_source: Option<SourceEndpoint>,
    replication_password: String,
}

impl Intent {
    /// Creates an intent directly.
    #[must_use]
    pub fn new(declared_source: Option<SourceEndpoint>, replication_password: impl Into<String>) -> Self {
        Self {
            declared_source,
            replication_password: replication_password.into(),
        }
    }

    /// Reads the credentials secret and, in intermediate mode, the
    /// replication source secret of `cluster`.
    ///
    /// # Errors
    ///
    /// Returns an error if a secret is missing or malformed.
    pub async fn load<S>(secrets: &S, cluster: &ClusterSpec) -> Result<Self, SecretError>
    where
        S: SecretSource + ?Sized,
    {
        let credentials = secrets
            .get(&cluster.namespace, &cluster.credentials_secret)
            .await?;
        let replication_password = credentials
            .get(REPLICATION_PASSWORD_KEY)
            .cloned()
            .ok_or_else(|| SecretError::MissingKey {
                name: cluster.credentials_secret.clone(),
                key: REPLICATION_PASSWORD_KEY,
            })?;

        let declared_source = match &cluster.replication_source_secret {
            Some(name) => {
                let data = secrets.get(&cluster.namespace, name).await?;
                let options = IntermediatePrimaryOptions::from_secret_data(name, &data)?;
                debug!("cluster {} declares source {:?}", cluster, options);
                Some(options.endpoint())
            }
            None => None,
        };

        Ok(Self {
            declared_source,
            replication_password,
        })
    }

    /// Endpoint members use to replicate from (or clone) member `index`.
    #[must_use]
    pub fn member_source(&self, cluster: &ClusterSpec, index: InstanceIndex) -> SourceEndpoint {
        SourceEndpoint::new(
            cluster.pod_hostname(index),
            MYSQL_PORT,
            REPLICATION_USER,
            self.replication_password.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn source_secret(port: Option<&str>) -> SecretData {
        let mut data = SecretData::new();
        data.insert(PRIMARY_HOST_KEY.to_string(), "upstream".to_string());
        data.insert(PRIMARY_USER_KEY.to_string(), "root".to_string());
        data.insert(PRIMARY_PASSWORD_KEY.to_string(), "hunter2".to_string());
        if let Some(port) = port {
            data.insert(PRIMARY_PORT_KEY.to_string(), port.to_string());
        }
        data
    }

    #[test]
    fn test_parse_source_secret() {
        let options =
            IntermediatePrimaryOptions::from_secret_data("src", &source_secret(Some("3307")))
                .unwrap();
        assert_eq!(options.host, "upstream");
        assert_eq!(options.port, 3307);
        assert!(!format!("{options:?}").contains("hunter2"));

        let options =
            IntermediatePrimaryOptions::from_secret_data("src", &source_secret(None)).unwrap();
        assert_eq!(options.port, MYSQL_PORT);
    }

    #[test]
    fn test_invalid_source_secret() {
        assert_matches!(
            IntermediatePrimaryOptions::from_secret_data("src", &source_secret(Some("70000"))),
            Err(SecretError::InvalidPort { value, .. }) if value == "70000"
        );

        let mut data = source_secret(None);
        data.remove(PRIMARY_USER_KEY);
        assert_matches!(
            IntermediatePrimaryOptions::from_secret_data("src", &data),
            Err(SecretError::MissingKey { key: PRIMARY_USER_KEY, .. })
        );
    }

    #[tokio::test]
    async fn test_load_intent() {
        let cluster = ClusterSpec::new("foo", "single", 1).with_replication_source("src");
        let mut secrets = StaticSecrets::new();
        secrets.insert(
            "foo",
            cluster.credentials_secret.clone(),
            SecretData::from([(REPLICATION_PASSWORD_KEY.to_string(), "pw".to_string())]),
        );

        assert_matches!(
            Intent::load(&secrets, &cluster).await,
            Err(SecretError::NotFound { name, .. }) if name == "src"
        );

        secrets.insert("foo", "src", source_secret(None));
        let intent = Intent::load(&secrets, &cluster).await.unwrap();
        assert!(intent.declared_source.is_some());

        let member = intent.member_source(&cluster, 0);
        assert_eq!(member.host, cluster.pod_hostname(0));
        assert_eq!(member.user, REPLICATION_USER);
        assert_eq!(member.password, "pw");
    }
}
