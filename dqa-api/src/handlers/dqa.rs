use axum::extract::rejection::JsonRejection;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use dqa_common::pipeline::{Acknowledgement, Pipeline};

#[derive(Serialize, Deserialize, Debug)]
pub struct DqaErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

/// Run the pipeline for one event posted as JSON.
///
/// Indicator failures still answer 200 with the acknowledgement; a body that is not JSON or
/// cannot be normalized is rejected with 422.
pub async fn post_process_dqa(
    State(pipeline): State<Pipeline>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Acknowledgement>, (StatusCode, Json<DqaErrorResponse>)> {
    let Json(payload) = payload.map_err(rejected_body)?;
    debug!("received payload: {:?}", payload);

    let report = pipeline.process_value(payload).await.map_err(|e| {
        warn!("rejecting dqa request: {}", e);
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(DqaErrorResponse {
                error: e.to_string(),
                field: e.field().map(str::to_owned),
            }),
        )
    })?;

    Ok(Json(report.acknowledgement()))
}

fn rejected_body(rejection: JsonRejection) -> (StatusCode, Json<DqaErrorResponse>) {
    warn!("rejecting dqa request body: {}", rejection);
    let status = match rejection {
        JsonRejection::JsonSyntaxError(_) | JsonRejection::JsonDataError(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ref other => other.status(),
    };

    (
        status,
        Json(DqaErrorResponse {
            error: rejection.body_text(),
            field: None,
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_json_diff::assert_json_eq;
    use axum::{
        body::Body,
        http::{self, Request, StatusCode},
        Router,
    };
    use dqa_common::catalog::{IndicatorCatalog, IndicatorDefinition};
    use dqa_common::source::Scalar;
    use dqa_common::test_utils::{InMemoryDestination, InMemorySource, TEST_CLINIC_PAYLOAD};
    use http_body_util::BodyExt; // for `collect`
    use serde_json::json;
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    use super::*;
    use crate::handlers::add_routes;

    const MAX_BODY_SIZE: usize = 1_000_000;
    const TX_CURR: &str = "SELECT count(*) FROM tx_curr WHERE mfl_code = :mfl_code";
    const HTS_TESTED: &str = "SELECT count(*) FROM hts WHERE mfl_code = :mfl_code";
    const DUPLICATES: &str =
        "SELECT count(*) FROM dups WHERE mfl_code = :mfl_code AND date <= :reporting_date";

    fn app(source: InMemorySource) -> (Router, Arc<InMemoryDestination>) {
        let catalog = IndicatorCatalog::new(
            vec![
                IndicatorDefinition::new("TX_CURR", TX_CURR),
                IndicatorDefinition::new("HTS_TESTED", HTS_TESTED),
            ],
            DUPLICATES,
        )
        .unwrap();
        let destination = Arc::new(InMemoryDestination::new());
        let pipeline = Pipeline::new(Arc::new(catalog), Arc::new(source), destination.clone());

        (
            add_routes(Router::new(), pipeline, MAX_BODY_SIZE, 10),
            destination,
        )
    }

    fn post(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method(http::Method::POST)
            .uri("/dqa/process_dqa")
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn process_dqa_success() {
        let (app, destination) = app(InMemorySource::new()
            .with_result(TX_CURR, Scalar::Integer(42))
            .with_result(HTS_TESTED, Scalar::Integer(7))
            .with_result(DUPLICATES, Scalar::Integer(3)));

        let response = app.oneshot(post(TEST_CLINIC_PAYLOAD)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_json_eq!(
            body_json(response).await,
            json!({"message": "Processing complete"})
        );
        assert_eq!(destination.metrics().len(), 2);
        assert_eq!(destination.duplicates().len(), 1);
    }

    #[tokio::test]
    async fn process_dqa_partial_failure_still_acknowledges() {
        let (app, destination) = app(InMemorySource::new()
            .with_failure(TX_CURR, "relation tx_curr does not exist")
            .with_result(HTS_TESTED, Scalar::Integer(7))
            .with_result(DUPLICATES, Scalar::Integer(3)));

        let response = app.oneshot(post(TEST_CLINIC_PAYLOAD)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_json_eq!(
            body_json(response).await,
            json!({"message": "Processing complete"})
        );
        let metrics = destination.metrics();
        assert_eq!(metrics.len(), 1);
        assert_eq!(metrics[0].indicator, "HTS_TESTED");
    }

    #[tokio::test]
    async fn process_dqa_legacy_mfl_code_key() {
        let (app, destination) = app(InMemorySource::new()
            .with_result(TX_CURR, Scalar::Integer(42))
            .with_result(HTS_TESTED, Scalar::Integer(7))
            .with_result(DUPLICATES, Scalar::Integer(3)));
        let payload = json!({
            "Facility": "Test Clinic",
            "MFL Code": "101",
            "Docket": "ART",
            "indicator_date": "2024-01-15",
            "Message": "m",
            "log_date": "2024-01-15T10:00:00.000000",
            "dwapi_version": "v1",
        });

        let response = app.oneshot(post(payload.to_string())).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(destination
            .metrics()
            .iter()
            .all(|record| record.mfl_code == 101));
    }

    #[tokio::test]
    async fn process_dqa_missing_field() {
        let (app, destination) = app(InMemorySource::new());

        let response = app
            .oneshot(post(r#"{"Facility": "Test Clinic"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = body_json(response).await;
        assert!(body["field"].is_string());
        assert!(body["error"].is_string());
        assert!(destination.metrics().is_empty());
    }

    #[tokio::test]
    async fn process_dqa_not_an_object() {
        let (app, _) = app(InMemorySource::new());

        let response = app.oneshot(post("[1, 2, 3]")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn process_dqa_not_json() {
        let (app, destination) = app(InMemorySource::new());

        let response = app.oneshot(post("x")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_json(response).await["error"].is_string());
        assert!(destination.metrics().is_empty());
    }

    #[tokio::test]
    async fn process_dqa_missing_content_type() {
        let (app, _) = app(InMemorySource::new());

        let response = app
            .oneshot(
                Request::builder()
                    .method(http::Method::POST)
                    .uri("/dqa/process_dqa")
                    .body(Body::from(TEST_CLINIC_PAYLOAD))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
