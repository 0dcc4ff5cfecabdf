mod auth;
mod csrf;
mod health;
mod rate_limits;
mod session;
mod util;

pub use auth::{sign_in, sign_out, sign_up};
pub use csrf::issue_csrf_token;
pub use health::{health_check, readiness_check};
pub use rate_limits::rate_limit_status;
pub use session::current_session;
