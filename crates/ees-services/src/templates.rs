//! Field templating
//!
//! Evaluates `FcTemplate`s against a data provider into an ordered
//! projection. Template values are `;`-separated parts, each either a
//! constant or a `~`-prefixed path into one of the provider namespaces:
//!
//! - `*req.<field>`: event fields
//! - `*opts.<option>`: event API options
//! - `*dc.<metric>`: metrics of the exporter, e.g. `*dc.NumberOfEvents`

use ees_core::config::FcTemplate;
use ees_core::models::{value_to_string, CgrEvent, MetricsData, OrderedMap};
use ees_core::traits::{DataProvider, FieldProjector, FilterService};
use ees_core::{EesError, EesResult};
use serde_json::Value;
use std::sync::Arc;

pub const META_REQ: &str = "*req";
pub const META_OPTS: &str = "*opts";
pub const META_DC: &str = "*dc";

pub const META_VARIABLE: &str = "*variable";
pub const META_COMPOSED: &str = "*composed";
pub const META_CONSTANT: &str = "*constant";
pub const META_FILLER: &str = "*filler";

pub const META_LEFT: &str = "*left";
pub const META_RIGHT: &str = "*right";
pub const META_ZERO_LEFT: &str = "*zeroleft";

/// Output path prefixes stripped from template paths
const PATH_PREFIXES: [&str; 3] = ["*exp.", "*hdr.", "*trl."];

/// Data provider over an event and, optionally, exporter metrics
pub struct EventDataProvider<'a> {
    event: Option<&'a CgrEvent>,
    metrics: Option<MetricsData>,
}

impl<'a> EventDataProvider<'a> {
    pub fn new(event: &'a CgrEvent) -> Self {
        Self {
            event: Some(event),
            metrics: None,
        }
    }

    /// Provider exposing only the `*dc` namespace, used for headers and trailers
    pub fn metrics_only(metrics: MetricsData) -> Self {
        Self {
            event: None,
            metrics: Some(metrics),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsData) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl DataProvider for EventDataProvider<'_> {
    fn field_as_value(&self, path: &str) -> Option<Value> {
        let (namespace, key) = path.split_once('.')?;
        match namespace {
            META_REQ => lookup(&self.event?.event, key),
            META_OPTS => lookup(&self.event?.api_opts, key),
            META_DC => self.metrics.as_ref()?.field(key),
            _ => None,
        }
    }
}

/// Direct key first, then a dotted walk into nested objects
fn lookup(map: &std::collections::HashMap<String, Value>, key: &str) -> Option<Value> {
    if let Some(value) = map.get(key) {
        return Some(value.clone());
    }
    let mut parts = key.split('.');
    let mut current = map.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current.clone())
}

/// Default `FieldProjector`
#[derive(Clone)]
pub struct TemplateEngine {
    filters: Arc<dyn FilterService>,
}

impl TemplateEngine {
    pub fn new(filters: Arc<dyn FilterService>) -> Self {
        Self { filters }
    }

    /// Value of a `*variable`/`*composed` template, `None` if a reference is missing
    ///
    /// A single part keeps its JSON type; several parts are concatenated.
    fn compose(value: &str, dp: &dyn DataProvider) -> Option<Value> {
        let parts: Vec<&str> = value.split(';').collect();
        let resolve = |part: &str| match part.strip_prefix('~') {
            Some(path) => dp.field_as_value(path),
            None => Some(Value::String(part.to_string())),
        };

        if parts.len() == 1 {
            return resolve(parts[0]);
        }
        let mut out = String::new();
        for part in parts {
            out.push_str(&value_to_string(&resolve(part)?));
        }
        Some(Value::String(out))
    }
}

impl FieldProjector for TemplateEngine {
    fn project(
        &self,
        tenant: &str,
        fields: &[FcTemplate],
        dp: &dyn DataProvider,
    ) -> EesResult<OrderedMap> {
        let mut out = OrderedMap::new();

        for field in fields {
            if !field.filters.is_empty() && !self.filters.pass(tenant, &field.filters, dp)? {
                continue;
            }

            let value = match field.field_type.as_str() {
                META_CONSTANT => Some(Value::String(field.value.clone())),
                META_FILLER => Some(Value::String(String::new())),
                META_VARIABLE | META_COMPOSED => Self::compose(&field.value, dp),
                other => {
                    return Err(EesError::Template(format!("unsupported type: <{}>", other)));
                }
            };
            let Some(mut value) = value else {
                if field.mandatory {
                    return Err(EesError::MandatoryFieldMissing(field.tag().to_string()));
                }
                continue;
            };

            if field.mandatory && value_to_string(&value).is_empty() {
                return Err(EesError::MandatoryFieldMissing(field.tag().to_string()));
            }
            if field.width > 0 {
                let formatted = fmt_field_width(
                    field.tag(),
                    &value_to_string(&value),
                    field.width,
                    &field.strip,
                    &field.padding,
                    field.mandatory,
                )?;
                value = Value::String(formatted);
            }

            let key = output_key(&field.path);
            match out.get_mut(&key) {
                Some(existing) if field.field_type == META_COMPOSED => {
                    let joined = value_to_string(existing) + &value_to_string(&value);
                    *existing = Value::String(joined);
                }
                _ => {
                    out.insert(key, value);
                }
            }

            if field.blocker {
                break;
            }
        }
        Ok(out)
    }
}

/// Key of a template in the projection: the path without its output prefix
pub fn output_key(path: &str) -> String {
    PATH_PREFIXES
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))
        .unwrap_or(path)
        .to_string()
}

/// Fit a value to a fixed width
///
/// Longer values are cut according to `strip` (`*left` keeps the end,
/// `*right` keeps the start) and rejected without it; shorter values are
/// padded according to `padding` (`*left`, `*right`, `*zeroleft`).
pub fn fmt_field_width(
    field_id: &str,
    value: &str,
    width: usize,
    strip: &str,
    padding: &str,
    mandatory: bool,
) -> EesResult<String> {
    if mandatory && value.is_empty() {
        return Err(EesError::MandatoryFieldMissing(field_id.to_string()));
    }
    let len = value.chars().count();
    if width == 0 || len == width {
        return Ok(value.to_string());
    }

    if len > width {
        return match strip {
            META_RIGHT => Ok(value.chars().take(width).collect()),
            META_LEFT => Ok(value.chars().skip(len - width).collect()),
            _ => Err(EesError::Template(format!(
                "source field <{}> has invalid length {}, field width {}",
                field_id, len, width
            ))),
        };
    }

    let fill = width - len;
    let out = match padding {
        META_LEFT => format!("{}{}", " ".repeat(fill), value),
        META_RIGHT => format!("{}{}", value, " ".repeat(fill)),
        META_ZERO_LEFT => format!("{}{}", "0".repeat(fill), value),
        _ => value.to_string(),
    };
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::InlineFilterS;
    use ees_core::models::ExporterMetrics;
    use proptest::prelude::*;
    use serde_json::json;

    fn engine() -> TemplateEngine {
        TemplateEngine::new(Arc::new(InlineFilterS::default()))
    }

    fn event() -> CgrEvent {
        CgrEvent::new("cgrates.org", "ev1")
            .with_field("Account", "1001")
            .with_field("Cost", 1.5)
            .with_field("Extra", json!({"Nested": "x"}))
            .with_opt("*context", "*ees")
    }

    #[test]
    fn test_project_keeps_order_and_types() {
        let ev = event();
        let dp = EventDataProvider::new(&ev);
        let fields = vec![
            FcTemplate::variable("*exp.Cost", "~*req.Cost"),
            FcTemplate::variable("*exp.Account", "~*req.Account"),
            FcTemplate::constant("*exp.Source", "EEs"),
        ];

        let out = engine().project("cgrates.org", &fields, &dp).unwrap();
        let keys: Vec<_> = out.keys().cloned().collect();
        assert_eq!(keys, vec!["Cost", "Account", "Source"]);
        assert_eq!(out["Cost"], json!(1.5));
        assert_eq!(out["Source"], json!("EEs"));
    }

    #[test]
    fn test_multi_part_and_nested_values() {
        let ev = event();
        let dp = EventDataProvider::new(&ev);
        let fields = vec![
            FcTemplate::variable("*exp.Label", "acc_;~*req.Account;_;~*opts.*context"),
            FcTemplate::variable("*exp.Nested", "~*req.Extra.Nested"),
        ];

        let out = engine().project("cgrates.org", &fields, &dp).unwrap();
        assert_eq!(out["Label"], json!("acc_1001_*ees"));
        assert_eq!(out["Nested"], json!("x"));
    }

    #[test]
    fn test_composed_appends() {
        let ev = event();
        let dp = EventDataProvider::new(&ev);
        let mut second = FcTemplate::variable("*exp.Id", "~*req.Account");
        second.field_type = META_COMPOSED.to_string();
        let fields = vec![FcTemplate::constant("*exp.Id", "ID-"), second];

        let out = engine().project("cgrates.org", &fields, &dp).unwrap();
        assert_eq!(out["Id"], json!("ID-1001"));
    }

    #[test]
    fn test_missing_values() {
        let ev = event();
        let dp = EventDataProvider::new(&ev);

        let optional = vec![FcTemplate::variable("*exp.Subject", "~*req.Subject")];
        assert!(engine().project("cgrates.org", &optional, &dp).unwrap().is_empty());

        let mut mandatory = FcTemplate::variable("*exp.Subject", "~*req.Subject");
        mandatory.mandatory = true;
        let err = engine().project("cgrates.org", &[mandatory], &dp).unwrap_err();
        assert_eq!(err.to_string(), "MANDATORY_IE_MISSING: [*exp.Subject]");
    }

    #[test]
    fn test_field_filters_and_blocker() {
        let ev = event();
        let dp = EventDataProvider::new(&ev);
        let mut skipped = FcTemplate::constant("*exp.Skipped", "x");
        skipped.filters = vec!["*string:~*req.Account:1002".to_string()];
        let mut blocker = FcTemplate::constant("*exp.Last", "y");
        blocker.blocker = true;
        let fields = vec![skipped, blocker, FcTemplate::constant("*exp.Never", "z")];

        let out = engine().project("cgrates.org", &fields, &dp).unwrap();
        let keys: Vec<_> = out.keys().cloned().collect();
        assert_eq!(keys, vec!["Last"]);
    }

    #[test]
    fn test_bad_field_filter_errors() {
        let ev = event();
        let dp = EventDataProvider::new(&ev);
        let mut field = FcTemplate::variable("*exp.Account", "~*req.Account");
        field.filters = vec!["*wrong-type".to_string()];

        let err = engine().project("cgrates.org", &[field], &dp).unwrap_err();
        assert_eq!(err.to_string(), "inline parse error for string: <*wrong-type>");
    }

    #[test]
    fn test_unsupported_field_type() {
        let ev = event();
        let dp = EventDataProvider::new(&ev);
        let mut field = FcTemplate::variable("*exp.Account", "~*req.Account");
        field.field_type = "*usage_difference".to_string();

        let err = engine().project("cgrates.org", &[field], &dp).unwrap_err();
        assert_eq!(err.to_string(), "unsupported type: <*usage_difference>");
    }

    #[test]
    fn test_dc_namespace() {
        let metrics = ExporterMetrics::default();
        metrics.increment_events();
        metrics.increment_events();
        let dp = EventDataProvider::metrics_only(metrics.snapshot());
        let fields = vec![FcTemplate::variable("*trl.Events", "~*dc.NumberOfEvents")];

        let out = engine().project("", &fields, &dp).unwrap();
        assert_eq!(out["Events"], json!(2));
        assert_eq!(dp.field_as_value("*req.Account"), None);
    }

    #[test]
    fn test_fixed_width_field() {
        let ev = event();
        let dp = EventDataProvider::new(&ev);
        let mut field = FcTemplate::variable("*exp.Account", "~*req.Account");
        field.width = 8;
        field.padding = META_ZERO_LEFT.to_string();
        let mut filler = FcTemplate::variable("*exp.Filler", "");
        filler.field_type = META_FILLER.to_string();
        filler.width = 3;
        filler.padding = META_RIGHT.to_string();

        let out = engine().project("cgrates.org", &[field, filler], &dp).unwrap();
        assert_eq!(out["Account"], json!("00001001"));
        assert_eq!(out["Filler"], json!("   "));
    }

    #[test]
    fn test_fmt_field_width() {
        assert_eq!(fmt_field_width("f", "abc", 0, "", "", false).unwrap(), "abc");
        assert_eq!(fmt_field_width("f", "abc", 5, "", META_LEFT, false).unwrap(), "  abc");
        assert_eq!(fmt_field_width("f", "abc", 5, "", META_RIGHT, false).unwrap(), "abc  ");
        assert_eq!(fmt_field_width("f", "12", 5, "", META_ZERO_LEFT, false).unwrap(), "00012");
        assert_eq!(fmt_field_width("f", "abcdef", 3, META_RIGHT, "", false).unwrap(), "abc");
        assert_eq!(fmt_field_width("f", "abcdef", 3, META_LEFT, "", false).unwrap(), "def");
        assert!(fmt_field_width("f", "abcdef", 3, "", "", false).is_err());
        assert!(matches!(
            fmt_field_width("f", "", 3, "", "", true),
            Err(EesError::MandatoryFieldMissing(_))
        ));
    }

    #[test]
    fn test_output_key() {
        assert_eq!(output_key("*exp.Account"), "Account");
        assert_eq!(output_key("*hdr.Version"), "Version");
        assert_eq!(output_key("*trl.Total"), "Total");
        assert_eq!(output_key("Account"), "Account");
    }

    proptest! {
        #[test]
        fn prop_padded_width_is_exact(value in "[a-z0-9]{0,12}", width in 1usize..16) {
            let strip = META_RIGHT;
            for padding in [META_LEFT, META_RIGHT, META_ZERO_LEFT] {
                let out = fmt_field_width("f", &value, width, strip, padding, false).unwrap();
                prop_assert_eq!(out.chars().count(), width);
            }
        }

        #[test]
        fn prop_stripped_value_is_substring(value in "[a-z]{1,20}", width in 1usize..20) {
            let right = fmt_field_width("f", &value, width, META_RIGHT, META_RIGHT, false).unwrap();
            let left = fmt_field_width("f", &value, width, META_LEFT, META_LEFT, false).unwrap();
            prop_assert!(value.starts_with(right.trim_end()));
            prop_assert!(value.ends_with(left.trim_start()));
        }
    }
}
