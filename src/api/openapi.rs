//! OpenAPI document for the portal API.

use utoipa::OpenApi;

use super::handlers::{auth, forms, health, maintenance};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::login::login,
        auth::session::session,
        auth::session::logout,
        auth::password_reset::forgot_password,
        auth::password_reset::verify_reset_token,
        auth::password_reset::reset_password,
        auth::verification::verify_email,
        auth::verification::resend_verification,
        forms::create_form,
        forms::redeem_code,
        maintenance::cleanup,
    ),
    components(schemas(
        health::Health,
        auth::types::LoginRequest,
        auth::types::SessionResponse,
        auth::types::ForgotPasswordRequest,
        auth::types::VerifyResetTokenRequest,
        auth::types::ResetPasswordRequest,
        auth::types::VerifyEmailRequest,
        auth::types::ResendVerificationRequest,
        forms::CreateFormRequest,
        forms::CreateFormResponse,
        forms::RedeemCodeRequest,
        forms::RedeemCodeResponse,
        maintenance::CleanupResponse,
    )),
    tags(
        (name = "zielportal", description = "Zielvereinbarung portal API")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
