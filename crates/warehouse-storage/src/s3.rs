use crate::attributes::{AttributeCache, Metadata, ObjectAttributes};
use crate::keys;
use crate::traits::{Bucket, Cubby, CubbyOptions, Service, StorageError, StorageResult};
use crate::transfer::RawObject;
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    BucketLocationConstraint, CreateBucketConfiguration, MetadataDirective, ObjectCannedAcl,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::time::Duration;
use warehouse_core::{S3Settings, ServiceKind};

/// Region that must not be sent as a bucket location constraint.
const DEFAULT_REGION: &str = "us-east-1";

/// Longest expiry S3 accepts for a presigned URL.
const MAX_PRESIGN_EXPIRY: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn provider_error<E, R>(err: SdkError<E, R>) -> StorageError
where
    aws_sdk_s3::Error: From<SdkError<E, R>>,
{
    StorageError::provider(aws_sdk_s3::Error::from(err))
}

/// `CopySource` header value for `bucket/key`.
fn copy_source(bucket: &str, key: &str) -> String {
    format!("{}/{}", bucket, urlencoding::encode(key))
}

/// Drop the query string of a presigned URL, leaving the bare object URL.
fn strip_signature(url: &str) -> &str {
    url.split_once('?').map_or(url, |(base, _)| base)
}

/// A prefix listing also matches longer keys; only an exact hit counts.
fn listing_contains<'a>(keys: impl IntoIterator<Item = &'a str>, key: &str) -> bool {
    keys.into_iter().any(|listed| listed == key)
}

fn metadata_from(raw: Option<&HashMap<String, String>>) -> Metadata {
    raw.map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn metadata_to(metadata: &Metadata) -> Option<HashMap<String, String>> {
    if metadata.is_empty() {
        return None;
    }
    Some(metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// S3 storage service
#[derive(Clone, Debug)]
pub struct S3Service {
    client: Client,
    default_location: Option<String>,
}

impl S3Service {
    /// Create a new S3Service instance
    ///
    /// # Arguments
    /// * `settings` - Endpoint and static credentials; absent credentials fall
    ///   back to the AWS provider chain
    /// * `default_location` - Region used when a bucket names none
    pub async fn new(
        settings: &S3Settings,
        default_location: Option<String>,
    ) -> StorageResult<Self> {
        let region = default_location
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let region_provider = RegionProviderChain::first_try(Region::new(region));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config);

        if let (Some(id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                None,
                None,
                "warehouse",
            ));
        }

        let config = loader.load().await;

        // S3-compatible providers (MinIO, etc.) need path-style addressing.
        let client = match settings.endpoint {
            Some(ref endpoint) => {
                let s3_config = aws_sdk_s3::config::Builder::from(&config)
                    .endpoint_url(endpoint)
                    .force_path_style(true)
                    .build();
                Client::from_conf(s3_config)
            }
            None => Client::new(&config),
        };

        tracing::debug!(
            endpoint = ?settings.endpoint,
            default_location = ?default_location,
            "S3 client configured"
        );

        Ok(S3Service::from_client(client, default_location))
    }

    pub fn from_client(client: Client, default_location: Option<String>) -> Self {
        S3Service {
            client,
            default_location,
        }
    }

    /// Client bound to `location`, reusing the service client when the region matches.
    fn client_for(&self, location: &str) -> Client {
        let config = self.client.config();
        if config.region().map(|r| r.as_ref()) == Some(location) {
            return self.client.clone();
        }
        Client::from_conf(
            config
                .to_builder()
                .region(Region::new(location.to_string()))
                .build(),
        )
    }

    pub async fn open_bucket(&self, name: &str, location: Option<&str>) -> StorageResult<S3Bucket> {
        keys::validate_bucket_name(name)?;
        let location = self.resolve_location(location)?.unwrap_or_default();
        let bucket = S3Bucket::handle(self.client_for(&location), name, &location);
        bucket.create().await?;
        Ok(bucket)
    }
}

impl Display for S3Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}://", self.id())
    }
}

#[async_trait]
impl Service for S3Service {
    fn id(&self) -> &str {
        ServiceKind::S3.id()
    }

    fn default_location(&self) -> Option<&str> {
        self.default_location.as_deref()
    }

    fn requires_location(&self) -> bool {
        ServiceKind::S3.requires_location()
    }

    async fn bucket(&self, name: &str, location: Option<&str>) -> StorageResult<Box<dyn Bucket>> {
        Ok(Box::new(self.open_bucket(name, location).await?))
    }
}

/// An S3 bucket in one region
#[derive(Clone, Debug)]
pub struct S3Bucket {
    client: Client,
    name: String,
    location: String,
}

impl S3Bucket {
    pub(crate) fn handle(client: Client, name: &str, location: &str) -> Self {
        S3Bucket {
            client,
            name: name.to_string(),
            location: location.to_string(),
        }
    }

    /// Create the bucket, treating "already exists" as success.
    async fn create(&self) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(&self.name);
        if !self.location.is_empty() && self.location != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.location.as_str()))
                    .build(),
            );
        }

        match request.send().await {
            Ok(_) => {
                tracing::info!(bucket = %self.name, location = %self.location, "S3 bucket created");
                Ok(())
            }
            Err(e) => match e.as_service_error() {
                Some(err)
                    if err.is_bucket_already_owned_by_you() || err.is_bucket_already_exists() =>
                {
                    tracing::debug!(bucket = %self.name, "S3 bucket already exists");
                    Ok(())
                }
                _ => {
                    tracing::error!(
                        error = %e,
                        bucket = %self.name,
                        location = %self.location,
                        "S3 bucket creation failed"
                    );
                    Err(provider_error(e))
                }
            },
        }
    }

    pub fn open_cubby(&self, key: &str, options: CubbyOptions) -> StorageResult<S3Cubby> {
        keys::validate_key(key)?;
        Ok(S3Cubby {
            bucket: self.clone(),
            key: key.to_string(),
            content_type: options.content_type,
            acl: options.acl,
            cache: AttributeCache::default(),
        })
    }
}

impl PartialEq for S3Bucket {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for S3Bucket {}

impl Display for S3Bucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.address())
    }
}

#[async_trait]
impl Bucket for S3Bucket {
    fn service_id(&self) -> &str {
        ServiceKind::S3.id()
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn location(&self) -> &str {
        &self.location
    }

    async fn cubby(&self, key: &str, options: CubbyOptions) -> StorageResult<Box<dyn Cubby>> {
        Ok(Box::new(self.open_cubby(key, options)?))
    }

    async fn delete(&self) -> StorageResult<()> {
        let start = std::time::Instant::now();

        self.client
            .delete_bucket()
            .bucket(&self.name)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.name,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 bucket delete failed"
                );
                provider_error(e)
            })?;

        tracing::info!(
            bucket = %self.name,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 bucket delete successful"
        );

        Ok(())
    }

    async fn list(
        &self,
        prefix: Option<&str>,
        max_keys: Option<usize>,
    ) -> StorageResult<Vec<Box<dyn Cubby>>> {
        let limit = max_keys.unwrap_or(usize::MAX);
        let mut cubbies: Vec<Box<dyn Cubby>> = Vec::new();
        let mut continuation: Option<String> = None;

        while cubbies.len() < limit {
            let page_size = i32::try_from(limit - cubbies.len()).unwrap_or(i32::MAX).min(1000);
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.name)
                .set_prefix(prefix.map(String::from))
                .max_keys(page_size)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(provider_error)?;

            for object in response.contents() {
                if let Some(key) = object.key() {
                    cubbies.push(Box::new(self.open_cubby(key, CubbyOptions::default())?));
                }
            }

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        cubbies.truncate(limit);
        Ok(cubbies)
    }
}

/// An object in an S3 bucket
#[derive(Clone, Debug)]
pub struct S3Cubby {
    bucket: S3Bucket,
    key: String,
    content_type: Option<String>,
    acl: Option<String>,
    cache: AttributeCache,
}

impl S3Cubby {
    fn canned_acl(&self) -> Option<ObjectCannedAcl> {
        self.acl.as_deref().map(ObjectCannedAcl::from)
    }

    fn not_found(&self) -> StorageError {
        StorageError::NotFound(self.address().to_string())
    }
}

impl PartialEq for S3Cubby {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for S3Cubby {}

impl Display for S3Cubby {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[async_trait]
impl Cubby for S3Cubby {
    fn service_id(&self) -> &str {
        ServiceKind::S3.id()
    }

    fn bucket_name(&self) -> &str {
        &self.bucket.name
    }

    fn location(&self) -> &str {
        &self.bucket.location
    }

    fn key(&self) -> &str {
        &self.key
    }

    fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    fn acl(&self) -> Option<&str> {
        self.acl.as_deref()
    }

    fn cache(&self) -> &AttributeCache {
        &self.cache
    }

    fn cache_mut(&mut self) -> &mut AttributeCache {
        &mut self.cache
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn exists(&self) -> StorageResult<bool> {
        let response = self
            .bucket
            .client
            .list_objects_v2()
            .bucket(&self.bucket.name)
            .prefix(&self.key)
            .max_keys(1)
            .send()
            .await
            .map_err(provider_error)?;

        Ok(listing_contains(
            response.contents().iter().filter_map(|o| o.key()),
            &self.key,
        ))
    }

    async fn delete(&mut self) -> StorageResult<bool> {
        let start = std::time::Instant::now();

        self.bucket
            .client
            .delete_object()
            .bucket(&self.bucket.name)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket.name,
                    key = %self.key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 delete failed"
                );
                provider_error(e)
            })?;
        self.cache.invalidate();

        tracing::info!(
            bucket = %self.bucket.name,
            key = %self.key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 delete successful"
        );

        Ok(!self.exists().await?)
    }

    async fn url(&self, expiration: Option<Duration>) -> StorageResult<String> {
        let presigning_config = PresigningConfig::builder()
            .expires_in(expiration.unwrap_or(MAX_PRESIGN_EXPIRY))
            .build()
            .map_err(StorageError::provider)?;

        let presigned_request = self
            .bucket
            .client
            .get_object()
            .bucket(&self.bucket.name)
            .key(&self.key)
            .presigned(presigning_config)
            .await
            .map_err(provider_error)?;

        let url = presigned_request.uri();
        Ok(match expiration {
            Some(_) => url.to_string(),
            None => strip_signature(url).to_string(),
        })
    }

    async fn refresh(&mut self) -> StorageResult<()> {
        let response = self
            .bucket
            .client
            .head_object()
            .bucket(&self.bucket.name)
            .key(&self.key)
            .send()
            .await;

        let head = match response {
            Ok(head) => head,
            Err(e) => {
                if e.as_service_error().is_some_and(|err| err.is_not_found()) {
                    return Err(self.not_found());
                }
                return Err(provider_error(e));
            }
        };

        let size = head.content_length().unwrap_or(0).max(0) as u64;
        let attributes = ObjectAttributes {
            content_type: head.content_type().map(String::from),
            content_encoding: head.content_encoding().map(String::from),
            metadata: metadata_from(head.metadata()),
        };
        self.cache.store(size, attributes);
        Ok(())
    }

    async fn put_object(
        &mut self,
        body: Bytes,
        attributes: &ObjectAttributes,
    ) -> StorageResult<()> {
        let size = body.len();
        let start = std::time::Instant::now();

        self.bucket
            .client
            .put_object()
            .bucket(&self.bucket.name)
            .key(&self.key)
            .body(ByteStream::from(body))
            .set_content_type(attributes.content_type.clone())
            .set_content_encoding(attributes.content_encoding.clone())
            .set_metadata(metadata_to(&attributes.metadata))
            .set_acl(self.canned_acl())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket.name,
                    key = %self.key,
                    size_bytes = size,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 store failed"
                );
                provider_error(e)
            })?;

        tracing::info!(
            bucket = %self.bucket.name,
            key = %self.key,
            size_bytes = size,
            content_encoding = ?attributes.content_encoding,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 store successful"
        );

        Ok(())
    }

    async fn get_object(&mut self) -> StorageResult<RawObject> {
        let start = std::time::Instant::now();

        let response = match self
            .bucket
            .client
            .get_object()
            .bucket(&self.bucket.name)
            .key(&self.key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().is_some_and(|err| err.is_no_such_key()) {
                    return Err(self.not_found());
                }
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket.name,
                    key = %self.key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "S3 retrieve failed"
                );
                return Err(provider_error(e));
            }
        };

        let content_encoding = response.content_encoding().map(String::from);
        let body = response
            .body
            .collect()
            .await
            .map_err(StorageError::provider)?
            .into_bytes();

        tracing::info!(
            bucket = %self.bucket.name,
            key = %self.key,
            size_bytes = body.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 retrieve successful"
        );

        Ok(RawObject {
            body,
            content_encoding,
        })
    }

    async fn replace_attributes(&mut self, attributes: &ObjectAttributes) -> StorageResult<()> {
        // S3 attributes are immutable; copying the object onto itself with a
        // REPLACE directive is the only way to rewrite them.
        self.bucket
            .client
            .copy_object()
            .bucket(&self.bucket.name)
            .key(&self.key)
            .copy_source(copy_source(&self.bucket.name, &self.key))
            .metadata_directive(MetadataDirective::Replace)
            .set_content_type(attributes.content_type.clone())
            .set_content_encoding(attributes.content_encoding.clone())
            .set_metadata(metadata_to(&attributes.metadata))
            .set_acl(self.canned_acl())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket.name,
                    key = %self.key,
                    "S3 attribute rewrite failed"
                );
                provider_error(e)
            })?;

        tracing::debug!(bucket = %self.bucket.name, key = %self.key, "S3 attributes replaced");
        Ok(())
    }

    async fn sibling(&self, key: &str) -> StorageResult<Box<dyn Cubby>> {
        let options = CubbyOptions {
            content_type: None,
            acl: self.acl.clone(),
        };
        Ok(Box::new(self.bucket.open_cubby(key, options)?))
    }

    async fn copy_into(&self, dest: &dyn Cubby) -> StorageResult<()> {
        let dest = dest
            .as_any()
            .downcast_ref::<S3Cubby>()
            .ok_or_else(|| StorageError::CrossBackendCopy {
                from: self.address().to_string(),
                to: dest.address().to_string(),
            })?;

        let start = std::time::Instant::now();

        dest.bucket
            .client
            .copy_object()
            .bucket(&dest.bucket.name)
            .key(&dest.key)
            .copy_source(copy_source(&self.bucket.name, &self.key))
            .set_acl(dest.canned_acl())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    from_bucket = %self.bucket.name,
                    from_key = %self.key,
                    to_bucket = %dest.bucket.name,
                    to_key = %dest.key,
                    "S3 copy failed"
                );
                provider_error(e)
            })?;

        tracing::info!(
            from_bucket = %self.bucket.name,
            from_key = %self.key,
            to_bucket = %dest.bucket.name,
            to_key = %dest.key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 copy successful"
        );

        Ok(())
    }
}

#[cfg(all(test, feature = "storage-s3"))]
mod tests {
    use super::*;

    fn offline_client() -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(DEFAULT_REGION))
            .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "test"))
            .build();
        Client::from_conf(config)
    }

    #[test]
    fn test_copy_source_encodes_key() {
        assert_eq!(copy_source("media", "a b/c.txt"), "media/a%20b%2Fc.txt");
    }

    #[test]
    fn test_strip_signature() {
        assert_eq!(
            strip_signature("https://b.s3.amazonaws.com/k?X-Amz-Signature=abc"),
            "https://b.s3.amazonaws.com/k"
        );
        assert_eq!(strip_signature("https://b/k"), "https://b/k");
    }

    #[test]
    fn test_prefix_listing_needs_exact_key() {
        assert!(!listing_contains(["photos/a.png"], "photos/a"));
        assert!(listing_contains(["photos/a", "photos/a.png"], "photos/a"));
        assert!(!listing_contains(std::iter::empty(), "photos/a"));
    }

    #[test]
    fn test_empty_metadata_is_not_sent() {
        assert_eq!(metadata_to(&Metadata::new()), None);

        let mut metadata = Metadata::new();
        metadata.insert("author".to_string(), "ada".to_string());
        let sent = metadata_to(&metadata).unwrap();
        assert_eq!(metadata_from(Some(&sent)), metadata);
        assert!(metadata_from(None).is_empty());
    }

    #[test]
    fn test_location_is_required() {
        let service = S3Service::from_client(offline_client(), None);
        assert!(matches!(
            service.resolve_location(None),
            Err(StorageError::MissingLocation { .. })
        ));

        let service = S3Service::from_client(offline_client(), Some("eu-west-1".to_string()));
        assert_eq!(
            service.resolve_location(None).unwrap().as_deref(),
            Some("eu-west-1")
        );
    }

    #[test]
    fn test_cubby_identity() {
        let bucket = S3Bucket::handle(offline_client(), "media", "eu-west-1");
        let a = bucket.open_cubby("docs/report.pdf", CubbyOptions::default()).unwrap();
        let b = bucket
            .open_cubby("docs/report.pdf", CubbyOptions::default().acl("private"))
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.to_string(), "s3://eu-west-1/media/docs/report.pdf");
        assert_eq!(a.extension(), "pdf");
        assert!(bucket.open_cubby("../escape", CubbyOptions::default()).is_err());
    }

    #[tokio::test]
    async fn test_url_with_and_without_expiration() {
        let bucket = S3Bucket::handle(offline_client(), "media", DEFAULT_REGION);
        let cubby = bucket.open_cubby("a.txt", CubbyOptions::default()).unwrap();

        let signed = cubby.url(Some(Duration::from_secs(60))).await.unwrap();
        assert!(signed.contains("X-Amz-Signature="));

        let bare = cubby.url(None).await.unwrap();
        assert!(!bare.contains('?'));
        assert!(bare.ends_with("/a.txt"));
    }

    #[cfg(feature = "storage-local")]
    #[tokio::test]
    async fn test_copy_between_backends_is_rejected() {
        use crate::local::{BaseUrlGenerator, LocalService};
        use crate::transfer::{CopyTarget, Source};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let local = LocalService::new(
            dir.path(),
            Arc::new(BaseUrlGenerator::new("http://localhost:5000/static/")),
            None,
        )
        .await
        .unwrap();
        let mut local_cubby = local
            .open_bucket("media", None)
            .await
            .unwrap()
            .open_cubby("a.txt", CubbyOptions::default())
            .await
            .unwrap();
        local_cubby.store(Source::from(&b"data"[..])).await.unwrap();

        let bucket = S3Bucket::handle(offline_client(), "media", DEFAULT_REGION);
        let s3_cubby = bucket.open_cubby("a.txt", CubbyOptions::default()).unwrap();

        let result = local_cubby.copy_to(CopyTarget::Cubby(&s3_cubby)).await;
        assert!(matches!(result, Err(StorageError::CrossBackendCopy { .. })));
        let result = s3_cubby.copy_to(CopyTarget::Cubby(&local_cubby)).await;
        assert!(matches!(result, Err(StorageError::CrossBackendCopy { .. })));

        // Backends also refuse foreign handles passed straight to copy_into.
        let result = local_cubby.copy_into(&s3_cubby).await;
        assert!(matches!(result, Err(StorageError::CrossBackendCopy { .. })));
        let result = s3_cubby.copy_into(&local_cubby).await;
        assert!(matches!(result, Err(StorageError::CrossBackendCopy { .. })));

        assert_eq!(local_cubby.retrieve().await.unwrap(), Bytes::from_static(b"data"));
    }
}
