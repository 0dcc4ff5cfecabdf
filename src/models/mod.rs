mod api;

pub use api::{
    CsrfTokenResponse, HealthResponse, RateLimitOverview, RateLimitStatusResponse,
    SessionResponse, SignInForm, SignOutForm, SignUpForm,
};
