pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::planning::handlers as plans;
use crate::settings::handlers as settings;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .route("/health", get(health::health_handler))
        // Session settings
        .route(
            "/api/v1/settings",
            get(settings::handle_get_settings).put(settings::handle_update_settings),
        )
        .route("/api/v1/settings/verify", post(settings::handle_verify))
        // Plans
        .route("/api/v1/plans", post(plans::handle_generate_plans))
        .route("/api/v1/plans/:id", get(plans::handle_download_plan))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::llm_client::{AiProvider, AiRequest, ProviderError, ProviderKind};
    use crate::sheet::SpreadsheetTemplate;
    use crate::state::Providers;

    const BOUNDARY: &str = "planner-test-boundary";

    /// Accepts one key and answers every generation with the same plan.
    struct FakeGemini {
        valid_key: &'static str,
        answer: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AiProvider for FakeGemini {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Gemini
        }

        fn default_model(&self) -> &'static str {
            "fake-default"
        }

        fn probe_models(&self) -> &'static [&'static str] {
            &["fake-large", "fake-small"]
        }

        async fn invoke(&self, model: &str, request: &AiRequest<'_>) -> Result<String, ProviderError> {
            self.prompts
                .lock()
                .unwrap()
                .push(format!("{model}|{}", request.prompt));
            Ok(self.answer.clone())
        }

        async fn probe(&self, model: &str, api_key: &str) -> Result<(), ProviderError> {
            match (model, api_key == self.valid_key) {
                ("fake-small", true) => Ok(()),
                (_, true) => Err(ProviderError::http("Fake", 404, "model not found")),
                (_, false) => Err(ProviderError::http("Fake", 401, "API key not valid")),
            }
        }
    }

    fn plan_json() -> String {
        serde_json::json!({
            "metadata": {"unit_title": "SA4 Toma tu parte"},
            "rows": [{"key_competences": "CCL", "percentage": 1.0, "timing": "Session 1"}],
            "universal_design_notes": ""
        })
        .to_string()
    }

    fn test_state() -> (AppState, Arc<FakeGemini>) {
        let config = Config {
            port: 0,
            rust_log: "info".to_string(),
            template_path: PathBuf::from("unused.xlsx"),
            ai_provider: ProviderKind::Gemini,
            ai_api_key: None,
            book_max_chars: 300_000,
            justification_max_chars: 200_000,
            max_upload_bytes: 1024 * 1024,
            max_stored_results: 10,
            gemini_base_url: None,
            openai_base_url: None,
        };
        let fake = Arc::new(FakeGemini {
            valid_key: "good-key",
            answer: plan_json(),
            prompts: Mutex::new(Vec::new()),
        });
        let providers = Providers {
            gemini: fake.clone(),
            openai: fake.clone(),
        };
        (
            AppState::new(config, providers, SpreadsheetTemplate::blank()),
            fake,
        )
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn put_key(key: &str) -> Request<Body> {
        Request::put("/api/v1/settings")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::json!({ "api_key": key }).to_string()))
            .unwrap()
    }

    fn verify() -> Request<Body> {
        Request::post("/api/v1/settings/verify")
            .body(Body::empty())
            .unwrap()
    }

    fn multipart_body(files: &[(&str, &str, &str)], fields: &[(&str, &str)]) -> Body {
        let mut body = String::new();
        for (name, file_name, content) in files {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
            ));
        }
        for (name, value) in fields {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        Body::from(body)
    }

    fn generate(body: Body) -> Request<Body> {
        Request::post("/api/v1/plans")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(body)
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = test_state();
        let response = build_router(state)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_verify_pins_first_answering_model() {
        let (state, _) = test_state();
        let app = build_router(state);

        let response = app.clone().oneshot(put_key("good-key")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["has_api_key"], true);
        assert_eq!(body["verified"], false);

        let body = json_body(app.clone().oneshot(verify()).await.unwrap()).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["chosen_model"], "fake-small");
        assert_eq!(body["settings"]["verified"], true);

        let response = app
            .oneshot(Request::get("/api/v1/settings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["chosen_model"], "fake-small");
    }

    #[tokio::test]
    async fn test_verify_reports_invalid_credential() {
        let (state, _) = test_state();
        let app = build_router(state);
        app.clone().oneshot(put_key("bad-key")).await.unwrap();

        let body = json_body(app.oneshot(verify()).await.unwrap()).await;
        assert_eq!(body["ok"], false);
        assert_eq!(body["failure"], "invalid_credential");
        assert_eq!(body["settings"]["verified"], false);
    }

    #[tokio::test]
    async fn test_generation_requires_key_and_verification() {
        let (state, _) = test_state();
        let app = build_router(state);

        let body = multipart_body(&[("book", "libro.txt", "B"), ("justification", "j.txt", "J")], &[("units", "SA1")]);
        let response = app.clone().oneshot(generate(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        app.clone().oneshot(put_key("good-key")).await.unwrap();
        let body = multipart_body(&[("book", "libro.txt", "B"), ("justification", "j.txt", "J")], &[("units", "SA1")]);
        let response = app.oneshot(generate(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["error"]["code"], "NOT_VERIFIED");
    }

    #[tokio::test]
    async fn test_generate_and_download() {
        let (state, fake) = test_state();
        let app = build_router(state);
        app.clone().oneshot(put_key("good-key")).await.unwrap();
        app.clone().oneshot(verify()).await.unwrap();

        let body = multipart_body(
            &[
                ("book", "libro.txt", "Contenido del libro"),
                ("justification", "justificacion.txt", "Justificación"),
            ],
            &[("units", "SA4,"), ("subject", "Lengua")],
        );
        let response = app.clone().oneshot(generate(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        assert!(body["failure"].is_null());
        assert_eq!(body["status"]["stage"], "done");
        let result = &body["results"][0];
        assert_eq!(result["file_name"], "Plan_SA4_Lengua.xlsx");

        // generation used the model pinned by verification
        assert!(fake.prompts.lock().unwrap()[0].starts_with("fake-small|"));

        let url = result["download_url"].as_str().unwrap().to_string();
        let response = app
            .oneshot(Request::get(url.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.contains("Plan_SA4_Lengua.xlsx"));
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"PK"));
    }

    #[tokio::test]
    async fn test_unsupported_upload_is_415() {
        let (state, _) = test_state();
        let app = build_router(state);
        app.clone().oneshot(put_key("good-key")).await.unwrap();
        app.clone().oneshot(verify()).await.unwrap();

        let body = multipart_body(
            &[("book", "libro.odt", "x"), ("justification", "j.txt", "J")],
            &[("units", "SA1")],
        );
        let response = app.oneshot(generate(body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json_body(response).await["error"]["code"], "UNSUPPORTED_FORMAT");
    }

    #[tokio::test]
    async fn test_unknown_plan_is_404() {
        let (state, _) = test_state();
        let response = build_router(state)
            .oneshot(
                Request::get(format!("/api/v1/plans/{}", uuid::Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
