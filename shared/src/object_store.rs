//! Typed gateway over the object store used by every service.
//!
//! The trait keeps the rest of the pipeline independent of the AWS SDK so the
//! intake handler and worker can be exercised against the in-memory
//! implementation in tests.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;

use crate::error::StoreError;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object's bytes. Missing keys map to [`StoreError::NoSuchKey`].
    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn put_bytes(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Existence probe. Both 404 and 403 responses mean "not visible" under
    /// the legacy ACL convention and return `false`.
    async fn head(&self, bucket: &str, key: &str) -> Result<bool, StoreError>;

    /// Server-side copy; destination bucket defaults to the source bucket.
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_key: &str,
        dst_bucket: Option<&str>,
    ) -> Result<(), StoreError>;

    async fn download_file(&self, bucket: &str, key: &str, path: &Path)
        -> Result<(), StoreError>;

    async fn upload_file(&self, path: &Path, bucket: &str, key: &str) -> Result<(), StoreError>;

    /// Presigned PUT URL for a key, valid for `expires`.
    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<String, StoreError>;
}

#[async_trait]
impl<T: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<T> {
    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        (**self).get_bytes(bucket, key).await
    }

    async fn put_bytes(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        (**self).put_bytes(bucket, key, body).await
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        (**self).head(bucket, key).await
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_key: &str,
        dst_bucket: Option<&str>,
    ) -> Result<(), StoreError> {
        (**self).copy(src_bucket, src_key, dst_key, dst_bucket).await
    }

    async fn download_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<(), StoreError> {
        (**self).download_file(bucket, key, path).await
    }

    async fn upload_file(&self, path: &Path, bucket: &str, key: &str) -> Result<(), StoreError> {
        (**self).upload_file(path, bucket, key).await
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<String, StoreError> {
        (**self).presign_put(bucket, key, expires).await
    }
}

/// S3-backed implementation.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

impl S3ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    /// Builds a store from the ambient AWS environment configuration.
    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(aws_sdk_s3::Client::new(&config))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        let resp = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                if err
                    .as_service_error()
                    .map(|e| e.is_no_such_key())
                    .unwrap_or(false)
                {
                    StoreError::NoSuchKey {
                        bucket: bucket.to_string(),
                        key: key.to_string(),
                    }
                } else {
                    StoreError::Transport(err.to_string())
                }
            })?;
        let data = resp
            .body
            .collect()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(data.into_bytes().to_vec())
    }

    async fn put_bytes(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(())
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        match self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let status = err.raw_response().map(|resp| resp.status().as_u16());
                if matches!(status, Some(404) | Some(403)) {
                    Ok(false)
                } else {
                    Err(StoreError::Transport(err.to_string()))
                }
            }
        }
    }

    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_key: &str,
        dst_bucket: Option<&str>,
    ) -> Result<(), StoreError> {
        self.client
            .copy_object()
            .copy_source(format!("{src_bucket}/{src_key}"))
            .bucket(dst_bucket.unwrap_or(src_bucket))
            .key(dst_key)
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(())
    }

    async fn download_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<(), StoreError> {
        let bytes = self.get_bytes(bucket, key).await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        Ok(())
    }

    async fn upload_file(&self, path: &Path, bucket: &str, key: &str) -> Result<(), StoreError> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(())
    }

    async fn presign_put(
        &self,
        bucket: &str,
        key: &str,
        expires: Duration,
    ) -> Result<String, StoreError> {
        let config = PresigningConfig::expires_in(expires)
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        let request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|err| StoreError::Transport(err.to_string()))?;
        Ok(request.uri().to_string())
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryObjectStore;

#[cfg(any(test, feature = "test-util"))]
mod memory {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::ObjectStore;
    use crate::error::StoreError;

    /// In-memory object store for tests and local smoke runs.
    #[derive(Default)]
    pub struct MemoryObjectStore {
        objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    }

    impl MemoryObjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Vec<u8>>) {
            self.objects
                .lock()
                .unwrap()
                .insert((bucket.to_string(), key.to_string()), body.into());
        }

        pub fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
            self.objects
                .lock()
                .unwrap()
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
        }

        pub fn contains(&self, bucket: &str, key: &str) -> bool {
            self.get(bucket, key).is_some()
        }

        /// All keys currently stored in a bucket, sorted.
        pub fn keys(&self, bucket: &str) -> Vec<String> {
            self.objects
                .lock()
                .unwrap()
                .keys()
                .filter(|(b, _)| b == bucket)
                .map(|(_, k)| k.clone())
                .collect()
        }
    }


    #[async_trait]
    impl ObjectStore for MemoryObjectStore {
        async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
            self.get(bucket, key).ok_or_else(|| StoreError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }

        async fn put_bytes(
            &self,
            bucket: &str,
            key: &str,
            body: Vec<u8>,
        ) -> Result<(), StoreError> {
            self.insert(bucket, key, body);
            Ok(())
        }

        async fn head(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
            Ok(self.contains(bucket, key))
        }

        async fn copy(
            &self,
            src_bucket: &str,
            src_key: &str,
            dst_key: &str,
            dst_bucket: Option<&str>,
        ) -> Result<(), StoreError> {
            let body = self.get_bytes(src_bucket, src_key).await?;
            self.insert(dst_bucket.unwrap_or(src_bucket), dst_key, body);
            Ok(())
        }

        async fn download_file(
            &self,
            bucket: &str,
            key: &str,
            path: &Path,
        ) -> Result<(), StoreError> {
            let bytes = self.get_bytes(bucket, key).await?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, bytes).await?;
            Ok(())
        }

        async fn upload_file(
            &self,
            path: &Path,
            bucket: &str,
            key: &str,
        ) -> Result<(), StoreError> {
            let body = tokio::fs::read(path).await?;
            self.insert(bucket, key, body);
            Ok(())
        }

        async fn presign_put(
            &self,
            bucket: &str,
            key: &str,
            _expires: Duration,
        ) -> Result<String, StoreError> {
            Ok(format!("https://{bucket}.example.test/{key}?signature=stub"))
        }
    }
}
