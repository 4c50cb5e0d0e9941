use std::collections::HashMap;
use std::env;

use crate::error::ResolverError;
use crate::traits::KeyResolver;

const ENV_PREFIX: &str = "env:";

/// Resolves credentials from environment variables
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvResolver;

impl EnvResolver {
    pub fn new() -> Self {
        Self
    }
}

impl KeyResolver for EnvResolver {
    /// "env:API_KEY,API_SECRET" yields both variables keyed by name
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError> {
        let vars = source.trim().strip_prefix(ENV_PREFIX).ok_or_else(|| {
            ResolverError::UnsupportedSource(format!("expected 'env:' prefix, got: {}", source))
        })?;

        let mut resolved = HashMap::new();
        for var in vars.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            let value = env::var(var).map_err(|_| ResolverError::MissingKey(var.to_string()))?;
            resolved.insert(var.to_string(), value);
        }
        if resolved.is_empty() {
            return Err(ResolverError::UnsupportedSource("empty env source".to_string()));
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_env_vars() {
        env::set_var("SQX_RESOLVER_TEST_KEY", "key");
        env::set_var("SQX_RESOLVER_TEST_SECRET", "secret");

        let resolved = EnvResolver::new()
            .resolve("env:SQX_RESOLVER_TEST_KEY, SQX_RESOLVER_TEST_SECRET")
            .unwrap();
        assert_eq!(resolved["SQX_RESOLVER_TEST_KEY"], "key");
        assert_eq!(resolved["SQX_RESOLVER_TEST_SECRET"], "secret");

        env::remove_var("SQX_RESOLVER_TEST_KEY");
        env::remove_var("SQX_RESOLVER_TEST_SECRET");
    }

    #[test]
    fn test_missing_var() {
        assert!(matches!(
            EnvResolver::new().resolve("env:SQX_RESOLVER_TEST_UNSET_12345"),
            Err(ResolverError::MissingKey(_))
        ));
    }

    #[test]
    fn test_unsupported_sources() {
        assert!(matches!(
            EnvResolver::new().resolve("vault:secret/path"),
            Err(ResolverError::UnsupportedSource(_))
        ));
        assert!(EnvResolver::new().resolve("env:").is_err());
        assert!(EnvResolver::new().resolve("env: , ").is_err());
    }
}
