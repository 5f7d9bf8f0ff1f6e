use axum::response::IntoResponse;

// Liveness-friendly landing route.
pub async fn root() -> impl IntoResponse {
    "🎯"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn root_answers() {
        let response = root().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
