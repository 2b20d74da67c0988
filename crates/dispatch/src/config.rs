//! Application wide settings, fixed before the dispatcher starts serving.
//!
//! [`AppConfig`] is built once (in code through [`crate::DispatcherBuilder`], or deserialized
//! from any serde format) and captured by the dispatcher. Nothing in it is mutated while
//! requests are in flight.

use crate::trust_proxy::TrustProxy;
use serde::Deserialize;

/// Default byte limit of every body parser, 100 KiB.
pub const DEFAULT_BODY_LIMIT: usize = 100 * 1024;

/// Per parser byte limits applied when a parse call does not pass its own limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BodyLimits {
    pub json: usize,
    pub urlencoded: usize,
    pub text: usize,
}

impl Default for BodyLimits {
    fn default() -> Self {
        Self { json: DEFAULT_BODY_LIMIT, urlencoded: DEFAULT_BODY_LIMIT, text: DEFAULT_BODY_LIMIT }
    }
}

impl BodyLimits {
    /// The same limit for every parser.
    pub fn uniform(limit: usize) -> Self {
        Self { json: limit, urlencoded: limit, text: limit }
    }
}

/// The immutable configuration of one application instance.
///
/// # Example
/// ```
/// use micro_dispatch::config::AppConfig;
/// use micro_dispatch::trust_proxy::TrustProxy;
///
/// let config: AppConfig = serde_json::from_str(r#"{"trust_proxy": 1, "body_limits": {"json": 1024}}"#).unwrap();
/// assert!(matches!(config.trust_proxy, TrustProxy::Hops(1)));
/// assert_eq!(config.body_limits.json, 1024);
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub trust_proxy: TrustProxy,
    pub body_limits: BodyLimits,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(!config.trust_proxy.is_enabled());
        assert_eq!(config.body_limits, BodyLimits::uniform(DEFAULT_BODY_LIMIT));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: AppConfig = serde_json::from_str(r#"{"trust_proxy": "10.0.0.1, 10.0.0.2"}"#).unwrap();
        match config.trust_proxy {
            TrustProxy::AddressList(list) => assert_eq!(list, vec!["10.0.0.1".to_owned(), "10.0.0.2".to_owned()]),
            other => panic!("unexpected trust proxy {other:?}"),
        }
        assert_eq!(config.body_limits.text, DEFAULT_BODY_LIMIT);
    }

    #[test]
    fn test_deserialize_limits() {
        let config: AppConfig = serde_json::from_str(r#"{"body_limits": {"text": 16}}"#).unwrap();
        assert_eq!(config.body_limits.text, 16);
        assert_eq!(config.body_limits.json, DEFAULT_BODY_LIMIT);
    }
}
