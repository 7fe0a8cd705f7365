use thiserror::Error;

/// Returned by [`CorsMiddlewareBuilder::build`](super::CorsMiddlewareBuilder::build)
/// for configurations browsers would reject.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CorsConfigError {
    #[error("cannot use wildcard origin (*) with credentials; list exact origins instead")]
    WildcardWithCredentials,

    #[error("invalid origin '{origin}': expected scheme://host[:port]")]
    InvalidOriginFormat { origin: String },

    #[error("cannot allow credentials with an empty origin list")]
    EmptyOriginsWithCredentials,
}
