//! Request DTOs for the exporter operations
//!
//! Field names follow the rating engine wire format. Each request is
//! validated before it is turned into the service arguments.

use ees_core::models::{ArchiveEventsArgs, EventWithOpts, ReplayFailedPostsArgs, ResetMetricsArgs};
use ees_core::EesError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use validator::{Validate, ValidationErrors};

/// Request to render events through a file exporter into a zip
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ArchiveEventsRequest {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "ExporterID", default)]
    #[validate(length(min = 1))]
    pub exporter_id: String,

    #[serde(rename = "APIOpts", default)]
    pub api_opts: HashMap<String, Value>,

    #[serde(rename = "Events", default)]
    pub events: Vec<EventWithOpts>,
}

impl From<ArchiveEventsRequest> for ArchiveEventsArgs {
    fn from(req: ArchiveEventsRequest) -> Self {
        Self {
            tenant: req.tenant,
            exporter_id: req.exporter_id,
            api_opts: req.api_opts,
            events: req.events,
        }
    }
}

/// Request to reset the metrics of one exporter
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ResetMetricsRequest {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "ID", default)]
    #[validate(length(min = 1))]
    pub id: String,

    #[serde(rename = "APIOpts", default)]
    pub api_opts: HashMap<String, Value>,
}

impl From<ResetMetricsRequest> for ResetMetricsArgs {
    fn from(req: ResetMetricsRequest) -> Self {
        Self {
            tenant: req.tenant,
            id: req.id,
            api_opts: req.api_opts,
        }
    }
}

/// Request to replay failed-post files
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
pub struct ReplayFailedPostsRequest {
    #[serde(rename = "SourcePath", default)]
    #[validate(length(min = 1))]
    pub source_path: String,

    #[serde(rename = "FailedPath", default)]
    pub failed_path: String,

    #[serde(rename = "Modules", default)]
    pub modules: Vec<String>,
}

impl From<ReplayFailedPostsRequest> for ReplayFailedPostsArgs {
    fn from(req: ReplayFailedPostsRequest) -> Self {
        Self {
            source_path: req.source_path,
            failed_path: req.failed_path,
            modules: req.modules,
        }
    }
}

/// `MANDATORY_IE_MISSING: [Field1 Field2]` from the failed field names
pub fn validation_error(errors: &ValidationErrors) -> EesError {
    let mut fields: Vec<String> = errors
        .field_errors()
        .keys()
        .map(|k| wire_name(k).to_string())
        .collect();
    fields.sort_unstable();
    EesError::Validation(format!("MANDATORY_IE_MISSING: [{}]", fields.join(" ")))
}

fn wire_name(field: &str) -> &str {
    match field {
        "exporter_id" => "ExporterID",
        "id" => "ID",
        "source_path" => "SourcePath",
        other => other,
    }
}

/// Validate a request and convert it into service arguments
pub fn validated<R, A>(req: R) -> Result<A, EesError>
where
    R: Validate + Into<A>,
{
    req.validate().map_err(|e| validation_error(&e))?;
    Ok(req.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_request_requires_source() {
        let err = validated::<_, ReplayFailedPostsArgs>(ReplayFailedPostsRequest::default()).unwrap_err();
        assert_eq!(err.to_string(), "MANDATORY_IE_MISSING: [SourcePath]");

        let args: ReplayFailedPostsArgs = validated(ReplayFailedPostsRequest {
            source_path: "/var/spool/cgrates/failed_posts".to_string(),
            failed_path: "*none".to_string(),
            modules: vec!["EEs".to_string()],
        })
        .unwrap();
        assert_eq!(args.failed_path, "*none");
        assert_eq!(args.modules, vec!["EEs".to_string()]);
    }

    #[test]
    fn test_reset_request_wire_names() {
        let req: ResetMetricsRequest =
            serde_json::from_str(r#"{"Tenant":"cgrates.org","ID":"csv1"}"#).unwrap();
        let args: ResetMetricsArgs = validated(req).unwrap();
        assert_eq!(args.id, "csv1");

        let err = validated::<_, ResetMetricsArgs>(ResetMetricsRequest::default()).unwrap_err();
        assert!(matches!(err, EesError::Validation(_)));
    }
}
