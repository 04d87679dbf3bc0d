use crate::config::S3Config;
use crate::error::IndexerError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::Client as S3Client;
use tracing::{debug, info, instrument, warn};

/// An object seen in a bucket listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub size_bytes: i64,
}

/// One page of a bucket listing
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ListedObject>,
    /// Token for the next page; `None` on the last page
    pub next_token: Option<String>,
}

/// Paginated enumeration of a bucket's contents
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectLister: Send + Sync {
    /// Fetch the page following `continuation_token`, or the first page
    async fn list_page(
        &self,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage, IndexerError>;
}

/// S3 (or S3-compatible) bucket holding archived segments.
///
/// Read-only from the indexer's point of view, apart from creating the bucket
/// at startup when it does not exist yet.
pub struct S3Bucket {
    client: S3Client,
    bucket: String,
    page_size: i32,
}

impl S3Bucket {
    /// Create a new bucket client
    pub async fn new(config: &S3Config) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        // Static credentials for MinIO deployments
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "recording-indexer",
            ));
        }

        let aws_config = loader.load().await;
        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            endpoint = ?config.endpoint_url,
            "S3 client initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            page_size: config.page_size,
        })
    }

    /// Make sure the bucket exists, creating it if it does not
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    pub async fn ensure_bucket(&self) -> Result<()> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                debug!("Bucket exists");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Bucket not reachable, attempting to create it");

                self.client
                    .create_bucket()
                    .bucket(&self.bucket)
                    .send()
                    .await
                    .with_context(|| format!("Failed to create bucket {}", self.bucket))?;

                info!("Bucket created");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ObjectLister for S3Bucket {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn list_page(
        &self,
        continuation_token: Option<String>,
    ) -> Result<ObjectPage, IndexerError> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .max_keys(self.page_size)
            .set_continuation_token(continuation_token)
            .send()
            .await
            .map_err(|e| IndexerError::Listing {
                bucket: self.bucket.clone(),
                reason: e.to_string(),
            })?;

        let objects: Vec<ListedObject> = response
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ListedObject {
                    key: key.to_string(),
                    size_bytes: obj.size().unwrap_or(0),
                })
            })
            .collect();

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(String::from)
        } else {
            None
        };

        debug!(
            objects = objects.len(),
            truncated = next_token.is_some(),
            "Fetched listing page"
        );

        Ok(ObjectPage {
            objects,
            next_token,
        })
    }
}
