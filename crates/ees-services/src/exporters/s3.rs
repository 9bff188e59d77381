//! Amazon S3 transport for `*s3_json_map`
//!
//! Every event becomes one object `<s3FolderPath>/<extra data>.json` in the
//! `s3BucketID` bucket. `export_path`, when set, overrides the endpoint.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use ees_core::config::{opts, EventExporterCfg};
use ees_core::{EesError, EesResult};
use uuid::Uuid;

use super::broker::{BrokerConnection, BrokerConnector};

const DEFAULT_BUCKET: &str = "cgrates_cdrs";

pub struct S3Connector;

#[async_trait]
impl BrokerConnector for S3Connector {
    async fn connect(&self, cfg: &EventExporterCfg) -> EesResult<Box<dyn BrokerConnection>> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = cfg.opts.get_str(opts::AWS_REGION) {
            loader = loader.region(Region::new(region));
        }
        if let (Some(key), Some(secret)) = (
            cfg.opts.get_str(opts::AWS_KEY),
            cfg.opts.get_str(opts::AWS_SECRET),
        ) {
            loader = loader.credentials_provider(Credentials::new(
                key,
                secret,
                cfg.opts.get_str(opts::AWS_TOKEN),
                None,
                "cgr-ees",
            ));
        }
        if !cfg.export_path.is_empty() {
            loader = loader.endpoint_url(&cfg.export_path);
        }
        let sdk_config = loader.load().await;

        Ok(Box::new(S3Connection {
            client: Client::new(&sdk_config),
            bucket: cfg
                .opts
                .get_str(opts::S3_BUCKET_ID)
                .unwrap_or_else(|| DEFAULT_BUCKET.to_string()),
            folder: cfg.opts.get_str(opts::S3_FOLDER_PATH).unwrap_or_default(),
        }))
    }
}

struct S3Connection {
    client: Client,
    bucket: String,
    folder: String,
}

impl S3Connection {
    fn object_key(&self, key: Option<&str>) -> String {
        let name = key
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.folder.is_empty() {
            format!("{}.json", name)
        } else {
            format!("{}/{}.json", self.folder.trim_end_matches('/'), name)
        }
    }
}

#[async_trait]
impl BrokerConnection for S3Connection {
    async fn publish(&self, body: &[u8], key: Option<&str>) -> EesResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .body(ByteStream::from(body.to_vec()))
            .send()
            .await
            .map_err(|e| EesError::Export(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> EesResult<()> {
        Ok(())
    }
}
