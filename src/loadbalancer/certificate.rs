use std::collections::BTreeMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::{
    error::{Error, Result},
    logger,
    model::{CertBundle, ServiceRequest},
};

use super::spec::{ssl_ports, ANNOTATION_LOAD_BALANCER_TLS_SECRET};

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

const CERT_DIGEST_LEN: usize = 16;

/// Read access to orchestrator secrets.
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Entries of the secret, or `None` when it does not exist.
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>>;
}

#[async_trait]
impl<S> SecretReader for std::sync::Arc<S>
where
    S: SecretReader + ?Sized,
{
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        (**self).read_secret(namespace, name).await
    }
}

/// Secrets held in memory, keyed by `namespace/name`.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets(pub BTreeMap<String, BTreeMap<String, String>>);

#[async_trait]
impl SecretReader for StaticSecrets {
    async fn read_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        Ok(self.0.get(&format!("{namespace}/{name}")).map(|data| {
            data.iter()
                .map(|(k, v)| (k.clone(), v.as_bytes().to_vec()))
                .collect()
        }))
    }
}

/// Name of the cloud certificate for the given material. Changing any part
/// of the material changes the name.
pub fn certificate_name(public_certificate: &str, private_key: &str, ca: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(public_certificate.as_bytes());
    hasher.update(private_key.as_bytes());
    if let Some(ca) = ca {
        hasher.update(ca.as_bytes());
    }

    let digest = hex::encode(hasher.finalize());
    format!("cert-{}", &digest[..CERT_DIGEST_LEN])
}

/// Splits `"[namespace/]name"`, defaulting the namespace.
pub fn parse_secret_ref(value: &str, default_namespace: &str) -> Result<(String, String)> {
    let value = value.trim();

    let (namespace, name) = match value.split_once('/') {
        Some((namespace, name)) => (namespace, name),
        None => (default_namespace, value),
    };

    if namespace.is_empty() || name.is_empty() || name.contains('/') {
        return Err(Error::InvalidConfig(format!(
            "invalid secret reference {value:?}, expected [namespace/]name"
        )));
    }

    Ok((namespace.to_string(), name.to_string()))
}

fn entry(data: &BTreeMap<String, Vec<u8>>, key: &str, secret: &str) -> Result<Option<String>> {
    match data.get(key) {
        None => Ok(None),
        Some(bytes) if bytes.is_empty() => Ok(None),
        Some(bytes) => String::from_utf8(bytes.clone()).map(Some).map_err(|_| {
            Error::InvalidCertificate(format!("secret {secret}: {key} is not valid PEM text"))
        }),
    }
}

/// Turns TLS secrets into [`CertBundle`]s.
#[derive(Debug, Clone)]
pub struct CertificateStore<S> {
    reader: S,
}

impl<S: SecretReader> CertificateStore<S> {
    pub fn new(reader: S) -> Self {
        Self { reader }
    }

    pub async fn load(&self, namespace: &str, name: &str) -> Result<CertBundle> {
        let secret = format!("{namespace}/{name}");

        let data = self
            .reader
            .read_secret(namespace, name)
            .await?
            .ok_or_else(|| Error::CertificateUnavailable(format!("secret {secret} not found")))?;

        let public_certificate = entry(&data, TLS_CERT_KEY, &secret)?.ok_or_else(|| {
            Error::InvalidCertificate(format!("secret {secret} has no {TLS_CERT_KEY}"))
        })?;
        let private_key = entry(&data, TLS_PRIVATE_KEY_KEY, &secret)?.ok_or_else(|| {
            Error::InvalidCertificate(format!("secret {secret} has no {TLS_PRIVATE_KEY_KEY}"))
        })?;
        let ca_certificate = entry(&data, CA_CERT_KEY, &secret)?;

        let certificate_name =
            certificate_name(&public_certificate, &private_key, ca_certificate.as_deref());

        logger!(debug, "secret {secret} maps to certificate {certificate_name}");

        Ok(CertBundle {
            certificate_name,
            public_certificate,
            private_key,
            ca_certificate,
        })
    }

    /// Certificate for the service's SSL ports; `None` when it has none.
    pub async fn certificate_for(&self, svc: &ServiceRequest) -> Result<Option<CertBundle>> {
        if ssl_ports(svc)?.is_empty() {
            return Ok(None);
        }

        let reference = svc
            .annotation(ANNOTATION_LOAD_BALANCER_TLS_SECRET)
            .ok_or_else(|| {
                Error::InvalidConfig(format!(
                    "service {}: SSL ports require {ANNOTATION_LOAD_BALANCER_TLS_SECRET}",
                    svc.key()
                ))
            })?;

        let (namespace, name) = parse_secret_ref(reference, &svc.namespace)?;

        self.load(&namespace, &name).await.map(Some)
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    use indoc::indoc;
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::error::ErrorKind;

    use mock::MockSecrets;

    fn tls(entries: &[(&str, &str)]) -> Option<BTreeMap<String, Vec<u8>>> {
        Some(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        )
    }

    fn ssl_service() -> ServiceRequest {
        serde_yaml::from_str(indoc! {
            "
            name: web
            namespace: shop
            uid: abc
            sessionAffinity: None
            ports:
            - protocol: TCP
              port: 443
              nodePort: 30443
            annotations:
              service.beta.kubernetes.io/oci-load-balancer-ssl-ports: '443'
              service.beta.kubernetes.io/oci-load-balancer-tls-secret: web-tls
            "
        })
        .unwrap()
    }

    #[rstest]
    #[case("web-tls", ("shop", "web-tls"))]
    #[case("infra/wildcard", ("infra", "wildcard"))]
    #[case(" infra/wildcard ", ("infra", "wildcard"))]
    fn secret_reference(#[case] value: &str, #[case] expected: (&str, &str)) {
        let (namespace, name) = parse_secret_ref(value, "shop").unwrap();

        assert_eq!((namespace.as_str(), name.as_str()), expected);
    }

    #[rstest]
    #[case("")]
    #[case("/name")]
    #[case("ns/")]
    #[case("a/b/c")]
    fn invalid_secret_reference(#[case] value: &str) {
        assert!(parse_secret_ref(value, "shop").is_err());
    }

    #[test]
    fn name_follows_material() {
        let a = certificate_name("CERT", "KEY", None);

        assert_eq!(a, certificate_name("CERT", "KEY", None));
        assert_ne!(a, certificate_name("CERT2", "KEY", None));
        assert_ne!(a, certificate_name("CERT", "KEY", Some("CA")));
        assert!(a.starts_with("cert-"));
        assert_eq!(a.len(), "cert-".len() + 16);
    }

    #[tokio::test]
    async fn bundle_from_secret_in_service_namespace() {
        let mut reader = MockSecrets::new();
        reader
            .expect_read_secret()
            .with(eq("shop"), eq("web-tls"))
            .times(1)
            .returning(|_, _| {
                Ok(tls(&[
                    ("tls.crt", "CERT"),
                    ("tls.key", "KEY"),
                    ("ca.crt", "CA"),
                ]))
            });

        let store = CertificateStore::new(reader);

        let bundle = store.certificate_for(&ssl_service()).await.unwrap().unwrap();

        assert_eq!(bundle.public_certificate, "CERT");
        assert_eq!(bundle.private_key, "KEY");
        assert_eq!(bundle.ca_certificate.as_deref(), Some("CA"));
        assert_eq!(
            bundle.certificate_name,
            certificate_name("CERT", "KEY", Some("CA"))
        );
    }

    #[tokio::test]
    async fn missing_secret_is_unavailable() {
        let mut reader = MockSecrets::new();
        reader.expect_read_secret().returning(|_, _| Ok(None));

        let err = CertificateStore::new(reader)
            .certificate_for(&ssl_service())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::CertificateUnavailable);
    }

    #[tokio::test]
    async fn missing_key_is_invalid() {
        let mut reader = MockSecrets::new();
        reader
            .expect_read_secret()
            .returning(|_, _| Ok(tls(&[("tls.crt", "CERT")])));

        let err = CertificateStore::new(reader)
            .certificate_for(&ssl_service())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidCertificate);
    }

    #[tokio::test]
    async fn no_ssl_ports_reads_nothing() {
        let mut svc = ssl_service();
        svc.annotations.clear();

        let mut reader = MockSecrets::new();
        reader.expect_read_secret().never();

        let actual = CertificateStore::new(reader)
            .certificate_for(&svc)
            .await
            .unwrap();

        assert_eq!(actual, None);
    }

    #[tokio::test]
    async fn static_secrets() {
        let secrets = StaticSecrets(BTreeMap::from([(
            "shop/web-tls".to_string(),
            BTreeMap::from([
                ("tls.crt".to_string(), "CERT".to_string()),
                ("tls.key".to_string(), "KEY".to_string()),
            ]),
        )]));

        let bundle = CertificateStore::new(secrets)
            .load("shop", "web-tls")
            .await
            .unwrap();

        assert_eq!(bundle.certificate_name, certificate_name("CERT", "KEY", None));
    }
}
