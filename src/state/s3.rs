//! S3 state backend.
//!
//! Keys are `<prefix>/<project>/<environment>/state.json` and a sibling
//! `state.lock`, so several stacks can share one bucket.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::{STATE_VERSION, StackState};

const STATE_KEY: &str = "state.json";
const LOCK_KEY: &str = "state.lock";

/// S3-backed state store.
#[derive(Debug, Clone)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    prefix: String,
}

/// Normalizes a key prefix to either empty or `a/b/`.
fn normalize_prefix<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    parts
        .into_iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .map(|p| format!("{p}/"))
        .collect()
}

impl S3StateStore {
    /// Creates a store using credentials from the environment.
    pub async fn new(
        bucket: &str,
        prefix: Option<&str>,
        region: Option<&str>,
        project: &str,
        environment: &str,
    ) -> Self {
        let loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        let loader = match region {
            Some(region) => loader.region(aws_config::Region::new(region.to_string())),
            None => loader,
        };
        let client = Client::new(&loader.load().await);
        Self::with_client(client, bucket, prefix, project, environment)
    }

    /// Creates a store from an existing client.
    #[must_use]
    pub fn with_client(
        client: Client,
        bucket: &str,
        prefix: Option<&str>,
        project: &str,
        environment: &str,
    ) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
            prefix: normalize_prefix([prefix.unwrap_or_default(), project, environment]),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{file}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        let response = match result {
            Ok(response) => response,
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    return Ok(None);
                }
                return Err(StateError::s3(format!("get {key}: {service_err}")).into());
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StateError::s3(format!("read {key}: {e}")))?;
        let content = String::from_utf8(bytes.to_vec()).map_err(|e| StateError::Corrupted {
            message: format!("Invalid UTF-8 in {key}: {e}"),
        })?;
        Ok(Some(content))
    }

    async fn put_object(&self, key: &str, content: String, if_absent: bool) -> Result<()> {
        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(content.into_bytes()))
            .content_type("application/json");
        let request = if if_absent {
            request.if_none_match("*")
        } else {
            request
        };

        request
            .send()
            .await
            .map_err(|e| StateError::s3(format!("put {key}: {e}")))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StateError::s3(format!("delete {key}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self) -> Result<Option<StackState>> {
        let key = self.key(STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        let Some(json) = self.get_object(&key).await? else {
            debug!("No state found in S3");
            return Ok(None);
        };

        let state: StackState = serde_json::from_str(&json).map_err(|e| StateError::Corrupted {
            message: format!("Failed to parse state: {e}"),
        })?;
        if state.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: state.version,
            }
            .into());
        }

        info!("Loaded state for {}/{}", state.project, state.environment);
        Ok(Some(state))
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        let key = self.key(STATE_KEY);
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.put_object(&key, content, false).await?;
        info!("Saved state to s3://{}/{key}", self.bucket);
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        info!("Deleting state under s3://{}/{}", self.bucket, self.prefix);
        self.delete_object(&self.key(STATE_KEY)).await?;
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn acquire_lock(&self, holder: &str, operation: &str) -> Result<LockInfo> {
        let key = self.key(LOCK_KEY);

        if let Some(content) = self.get_object(&key).await? {
            let existing = LockInfo::from_json(&content)?;
            existing.ensure_expired()?;
            warn!(holder = %existing.holder, "Taking over expired state lock");
            self.delete_object(&key).await?;
        }

        let lock = LockInfo::new(holder).for_operation(operation);
        self.put_object(&key, lock.to_json()?, true)
            .await
            .map_err(|e| StateError::LockFailed {
                message: e.to_string(),
            })?;

        info!(lock_id = %lock.lock_id, "Acquired state lock");
        Ok(lock)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let key = self.key(LOCK_KEY);
        if let Some(content) = self.get_object(&key).await? {
            let existing = LockInfo::from_json(&content)?;
            if existing.lock_id == lock_id {
                self.delete_object(&key).await?;
                info!("Released state lock {lock_id}");
            } else {
                debug!("Lock id mismatch: expected {lock_id}, found {}", existing.lock_id);
            }
        }
        Ok(())
    }

    async fn force_unlock(&self) -> Result<()> {
        warn!("Force-removing state lock in s3://{}", self.bucket);
        self.delete_object(&self.key(LOCK_KEY)).await
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        match self.get_object(&self.key(LOCK_KEY)).await? {
            Some(content) => Ok(Some(LockInfo::from_json(&content)?)),
            None => Ok(None),
        }
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }

    fn location(&self) -> String {
        format!("s3://{}/{}{STATE_KEY}", self.bucket, self.prefix)
    }
}
