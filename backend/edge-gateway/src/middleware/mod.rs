//! Edge Gateway Middleware

pub mod jwt;
pub mod rate_limit;

pub use jwt::{BearerToken, JwtMiddleware, ResolvedClaims, TokenValidator};
pub use rate_limit::{Admission, RateLimitMiddleware, TokenBucket};
