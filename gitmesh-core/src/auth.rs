//! Auth resolver (spec §4.B, §8): map a remote URL to credentials for
//! that host.

use url::Url;

use crate::config::EngineConfig;

/// The result of resolving auth for a URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResolution {
    /// No credentials apply; the request should be made anonymously.
    /// This is always the result for the decentralized backend's pack
    /// push (spec §4.H): authorization flows from the signed state
    /// event, not HTTP credentials.
    Anonymous,
    /// A bearer token to set as `Authorization: Bearer <token>`.
    Bearer(String),
}

/// Resolve credentials for `url` given `config`. Pure function of its
/// inputs (spec §8): the same `(url, config)` pair always yields the
/// same resolution, with no hidden environment or disk state consulted.
pub fn resolve_auth(url: &Url, config: &EngineConfig) -> AuthResolution {
    let Some(host) = url.host_str() else {
        return AuthResolution::Anonymous;
    };
    match config.token_for_host(host) {
        Some(token) => AuthResolution::Bearer(token.to_owned()),
        None => AuthResolution::Anonymous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostToken;

    fn config_with(host: &str, token: &str) -> EngineConfig {
        EngineConfig {
            tokens: vec![HostToken {
                host: host.into(),
                token: token.into(),
            }],
            ..EngineConfig::default()
        }
    }

    #[test]
    fn resolves_matching_host() {
        let cfg = config_with("github.com", "tok123");
        let url = Url::parse("https://github.com/alice/proj.git").unwrap();
        assert_eq!(resolve_auth(&url, &cfg), AuthResolution::Bearer("tok123".into()));
    }

    #[test]
    fn falls_back_to_anonymous_for_unknown_host() {
        let cfg = config_with("github.com", "tok123");
        let url = Url::parse("https://gitlab.com/alice/proj.git").unwrap();
        assert_eq!(resolve_auth(&url, &cfg), AuthResolution::Anonymous);
    }

    #[test]
    fn is_pure_function_of_inputs() {
        let cfg = config_with("github.com", "tok123");
        let url = Url::parse("https://github.com/alice/proj.git").unwrap();
        assert_eq!(resolve_auth(&url, &cfg), resolve_auth(&url, &cfg));
    }
}
