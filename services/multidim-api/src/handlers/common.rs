//! Query parsing and error rendering shared by the dataset handlers.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

use dataset_reader::{DatasetIdentifier, EngineKind, SliceSelection};
use multidim_common::{MultidimError, MultidimResult};

/// Error body: `{"detail": "..."}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// A request failure carrying the status derived from the error kind.
#[derive(Debug)]
pub struct ApiError(pub MultidimError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.0.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<MultidimError> for ApiError {
    fn from(err: MultidimError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.0.is_client_error() {
            warn!(status = status.as_u16(), error = %self.0, "Rejected request");
        } else {
            error!(status = status.as_u16(), error = %self.0, "Request failed");
        }

        let body = ErrorBody {
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Dataset query parameters.
///
/// Parsed from raw key/value pairs because `sel` may repeat.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DatasetQuery {
    pub url: Option<String>,
    pub group: Option<String>,
    pub multiscale: Option<bool>,
    pub multiscale_level: Option<String>,
    pub engine: Option<EngineKind>,
    pub decode_times: Option<bool>,
    pub variable: Option<String>,
    pub bins: Option<usize>,
    /// `dim=index` entries.
    pub sel: Vec<String>,
}

impl DatasetQuery {
    pub fn from_pairs(pairs: Vec<(String, String)>) -> MultidimResult<Self> {
        let mut query = Self::default();

        for (key, value) in pairs {
            match key.as_str() {
                "url" => query.url = non_empty(value),
                "group" => query.group = non_empty(value),
                "multiscale" => query.multiscale = Some(parse_bool("multiscale", &value)?),
                "multiscale_level" => query.multiscale_level = non_empty(value),
                "engine" => {
                    if let Some(engine) = non_empty(value) {
                        query.engine = Some(engine.parse()?);
                    }
                }
                "decode_times" => query.decode_times = Some(parse_bool("decode_times", &value)?),
                "variable" => query.variable = non_empty(value),
                "bins" => {
                    let bins = value.trim().parse::<usize>().map_err(|_| {
                        MultidimError::invalid_parameter("bins", format!("expected a positive integer, got '{}'", value))
                    })?;
                    query.bins = Some(bins);
                }
                "sel" => query.sel.push(value),
                // Unknown parameters are ignored
                _ => {}
            }
        }

        Ok(query)
    }

    /// Build the dataset identifier; `url` is required.
    pub fn identifier(&self) -> MultidimResult<DatasetIdentifier> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| MultidimError::invalid_parameter("url", "missing required parameter"))?;

        let mut id = DatasetIdentifier::new(url);
        if let Some(group) = &self.group {
            id = id.with_group(group.clone());
        }
        if let Some(multiscale) = self.multiscale {
            id = id.with_multiscale(multiscale);
        }
        if let Some(level) = &self.multiscale_level {
            id = id.with_multiscale_level(level.clone());
        }
        if let Some(engine) = self.engine {
            id = id.with_engine(engine);
        }
        if let Some(decode_times) = self.decode_times {
            id = id.with_decode_times(decode_times);
        }
        Ok(id)
    }

    pub fn selection(&self) -> MultidimResult<SliceSelection> {
        SliceSelection::parse(self.sel.iter().map(String::as_str))
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(param: &str, value: &str) -> MultidimResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(MultidimError::invalid_parameter(
            param,
            format!("expected a boolean, got '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_parse_full_query() {
        let query = DatasetQuery::from_pairs(pairs(&[
            ("url", "s3://bucket/data.zarr"),
            ("group", "surface"),
            ("multiscale", "true"),
            ("multiscale_level", "2"),
            ("engine", "zarr"),
            ("decode_times", "false"),
            ("variable", "tas"),
            ("bins", "20"),
            ("sel", "time=3"),
            ("sel", "level=1"),
        ]))
        .unwrap();

        assert_eq!(query.bins, Some(20));
        assert_eq!(query.variable.as_deref(), Some("tas"));
        assert_eq!(query.sel, vec!["time=3", "level=1"]);

        let id = query.identifier().unwrap();
        assert_eq!(id.uri(), "s3://bucket/data.zarr");
        assert_eq!(id.group(), Some("surface"));
        assert!(id.multiscale());
        assert_eq!(id.multiscale_level(), Some("2"));
        assert_eq!(id.engine(), Some(EngineKind::Zarr));
        assert!(!id.decode_times());

        let selection = query.selection().unwrap();
        assert_eq!(selection.index_for("time"), 3);
        assert_eq!(selection.index_for("level"), 1);
    }

    #[test]
    fn test_missing_url() {
        let query = DatasetQuery::from_pairs(pairs(&[("group", "surface")])).unwrap();
        let err = query.identifier().unwrap_err();
        assert!(matches!(err, MultidimError::InvalidParameter { ref param, .. } if param == "url"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(DatasetQuery::from_pairs(pairs(&[("bins", "ten")])).is_err());
        assert!(DatasetQuery::from_pairs(pairs(&[("multiscale", "maybe")])).is_err());
        assert!(DatasetQuery::from_pairs(pairs(&[("engine", "grib")])).is_err());

        let query = DatasetQuery::from_pairs(pairs(&[("sel", "time")])).unwrap();
        assert!(query.selection().is_err());
    }

    #[test]
    fn test_blank_values_ignored() {
        let query = DatasetQuery::from_pairs(pairs(&[("url", "memory://x.zarr"), ("group", " "), ("engine", "")])).unwrap();
        assert_eq!(query.group, None);
        assert_eq!(query.engine, None);
    }

    #[test]
    fn test_error_status() {
        assert_eq!(
            ApiError(MultidimError::variable_not_found("x", &[])).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(MultidimError::UpstreamTimeout(30)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
