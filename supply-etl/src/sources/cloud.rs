//! Object-store wiring for remote input and output locations.
//!
//! The session resolves `s3://bucket/...` URLs through an object store registered
//! per bucket. Credentials come from the standard AWS environment variables
//! (or the instance role), read by `AmazonS3Builder::from_env`.

use crate::error::{EtlError, Result};
use datafusion::prelude::SessionContext;
use object_store::{ObjectStore, RetryConfig};
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

#[cfg(feature = "s3")]
use object_store::aws::AmazonS3Builder;

fn parse_url(location: &str) -> Result<Url> {
    Url::parse(location).map_err(|e| EtlError::DataSource {
        source_type: "object_store".to_string(),
        message: format!("Invalid object store URL '{location}': {e}"),
        source: Some(Box::new(e)),
    })
}

#[cfg_attr(not(feature = "s3"), allow(dead_code))]
fn retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        retry_timeout: std::time::Duration::from_secs(30),
        ..Default::default()
    }
}

/// Builds an object store for the bucket named in `location`.
#[instrument]
pub fn object_store_for(location: &str) -> Result<Arc<dyn ObjectStore>> {
    let url = parse_url(location)?;
    let bucket = url.host_str().filter(|b| !b.is_empty()).ok_or_else(|| {
        EtlError::Configuration(format!("Object store URL '{location}' has no bucket"))
    })?;

    match url.scheme() {
        #[cfg(feature = "s3")]
        "s3" | "s3a" => {
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_retry(retry_config())
                .build()
                .map_err(|e| EtlError::DataSource {
                    source_type: "S3".to_string(),
                    message: format!("Failed to create S3 client for bucket '{bucket}': {e}"),
                    source: Some(Box::new(e)),
                })?;
            Ok(Arc::new(store))
        }
        scheme => Err(EtlError::Configuration(format!(
            "Unsupported object store scheme '{scheme}' for bucket '{bucket}'"
        ))),
    }
}

/// Registers the object store serving `location` with the session.
pub fn register_object_store(ctx: &SessionContext, location: &str) -> Result<()> {
    let url = parse_url(location)?;
    let store = object_store_for(location)?;

    let mut root = url.clone();
    root.set_path("");
    ctx.runtime_env()
        .object_store_registry
        .register_store(&root, store);

    debug!(store.url = %root, "Registered object store");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_url_without_bucket() {
        assert!(object_store_for("s3:///raw/sales/").is_err());
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let err = object_store_for("ftp://bucket/raw/").unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
    }
}
