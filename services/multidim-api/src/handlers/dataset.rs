//! Dataset handlers: variables, metadata and histograms.

use axum::{
    extract::{Extension, Query},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use dataset_reader::{DatasetMetadata, HistogramResult};
use multidim_common::{MultidimError, MultidimResult};

use super::common::{ApiError, DatasetQuery};
use crate::metrics::RequestTimer;
use crate::state::AppState;

/// One histogram bucket as returned to clients.
#[derive(Debug, Serialize)]
pub struct BucketBody {
    pub bucket: [f64; 2],
    pub value: u64,
}

impl BucketBody {
    pub fn from_result(result: &HistogramResult) -> Vec<Self> {
        result
            .buckets
            .iter()
            .map(|b| Self {
                bucket: [b.lower, b.upper],
                value: b.count,
            })
            .collect()
    }
}

/// GET /variables - Data variable names of a dataset
#[instrument(skip_all)]
pub async fn variables_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let timer = RequestTimer::start("variables");
    let result = variables(&state, pairs).await;
    respond(timer, result.map(Json))
}

/// GET /info - Dataset metadata
#[instrument(skip_all)]
pub async fn info_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let timer = RequestTimer::start("info");
    let result = info(&state, pairs).await;
    respond(timer, result.map(|metadata| Json(metadata.as_ref().clone())))
}

/// GET /histogram - Value histogram of one variable
#[instrument(skip_all)]
pub async fn histogram_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let timer = RequestTimer::start("histogram");
    let result = histogram(&state, pairs).await;
    respond(timer, result.map(Json))
}

async fn variables(state: &AppState, pairs: Vec<(String, String)>) -> MultidimResult<Vec<String>> {
    let id = DatasetQuery::from_pairs(pairs)?.identifier()?;
    state.service.list_variables(&id).await
}

async fn info(state: &AppState, pairs: Vec<(String, String)>) -> MultidimResult<Arc<DatasetMetadata>> {
    let id = DatasetQuery::from_pairs(pairs)?.identifier()?;
    state.service.metadata(&id).await
}

async fn histogram(state: &AppState, pairs: Vec<(String, String)>) -> MultidimResult<Vec<BucketBody>> {
    let query = DatasetQuery::from_pairs(pairs)?;
    let id = query.identifier()?;
    let variable = query
        .variable
        .as_deref()
        .ok_or_else(|| MultidimError::invalid_parameter("variable", "missing required parameter"))?;

    let mut options = state.service.histogram_options();
    if let Some(bins) = query.bins {
        options.bins = bins;
    }
    options.selection = query.selection()?;

    let result = state.service.histogram(&id, variable, &options).await?;
    debug!(variable, buckets = result.buckets.len(), "Histogram computed");
    Ok(BucketBody::from_result(&result))
}

fn respond<T: IntoResponse>(timer: RequestTimer, result: MultidimResult<T>) -> Response {
    let response = match result {
        Ok(body) => body.into_response(),
        Err(err) => ApiError(err).into_response(),
    };
    timer.finish(response.status().as_u16());
    response
}
