//! TXT lookups against real DNS.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;

use tessera_membership::{LookupError, TxtResolver};

/// [`TxtResolver`] backed by the system resolver configuration (`/etc/resolv.conf`).
pub struct HickoryTxtResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryTxtResolver {
    pub fn from_system_conf() -> Result<Self, ResolveError> {
        Ok(Self {
            resolver: TokioAsyncResolver::tokio_from_system_conf()?,
        })
    }

    pub fn new(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl TxtResolver for HickoryTxtResolver {
    async fn lookup_txt(&self, host: &str) -> Result<Vec<String>, LookupError> {
        match self.resolver.txt_lookup(host).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|txt| {
                    // a record may be split into several character-strings
                    txt.txt_data()
                        .iter()
                        .map(|part| String::from_utf8_lossy(part))
                        .collect::<String>()
                })
                .collect()),
            Err(e) => classify(host, e),
        }
    }
}

fn classify(host: &str, err: ResolveError) -> Result<Vec<String>, LookupError> {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound { response_code, .. } => match *response_code {
            ResponseCode::NXDomain => Err(LookupError::NoSuchHost(host.to_string())),
            // the name exists but publishes no TXT data
            ResponseCode::NoError => Ok(Vec::new()),
            other => Err(LookupError::Failed(format!("{host}: {other}"))),
        },
        _ => Err(LookupError::Failed(err.to_string())),
    }
}
