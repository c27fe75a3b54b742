use std::convert::Infallible;

use axum::{extract::DefaultBodyLimit, routing, Router};
use tower::limit::ConcurrencyLimitLayer;

use dqa_common::pipeline::Pipeline;

use super::dqa;

pub fn add_routes(
    router: Router,
    pipeline: Pipeline,
    max_body_size: usize,
    concurrency_limit: usize,
) -> Router {
    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No background loop, axum answering is enough
        .route(
            "/dqa/process_dqa",
            routing::post(dqa::post_process_dqa)
                .with_state(pipeline)
                .layer::<_, Infallible>(ConcurrencyLimitLayer::new(concurrency_limit))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
}

pub async fn index() -> &'static str {
    "dqa api"
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use dqa_common::catalog::IndicatorCatalog;
    use dqa_common::test_utils::{InMemoryDestination, InMemorySource};
    use http_body_util::BodyExt; // for `collect`
    use tower::ServiceExt; // for `call`, `oneshot`, and `ready`

    #[tokio::test]
    async fn index() {
        let catalog = IndicatorCatalog::new(Vec::new(), "SELECT 0").unwrap();
        let pipeline = Pipeline::new(
            Arc::new(catalog),
            Arc::new(InMemorySource::new()),
            Arc::new(InMemoryDestination::new()),
        );

        let app = add_routes(Router::new(), pipeline, 1_000_000, 10);

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"dqa api");
    }
}
