use crate::error::{RelayError, Result};
use std::collections::HashMap;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_PORT: u16 = 8080;

/// Relay configuration, sourced from the environment at startup.
///
/// - `ANTHROPIC_BASE_URL` — upstream base URL
/// - `PORT` — listen port
/// - `MODEL_MAPPING` — `src:dst,...` model-name rewrite table
/// - `MAX_TOKENS_MAPPING` — `model:tokens,...` per-model max-tokens overrides
/// - `MAX_TOKENS` — global max-tokens default
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    pub base_url: String,
    pub models: HashMap<String, String>,
    pub max_tokens: HashMap<String, u64>,
    pub max_tokens_default: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            base_url: DEFAULT_BASE_URL.to_string(),
            models: HashMap::new(),
            max_tokens: HashMap::new(),
            max_tokens_default: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("ANTHROPIC_BASE_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let port = match std::env::var("PORT") {
            Ok(raw) if !raw.is_empty() => raw.parse::<u16>().map_err(|_| {
                RelayError::config(format!("Invalid PORT value '{raw}', expected a port number"))
            })?,
            _ => DEFAULT_PORT,
        };

        let models = parse_model_mapping(&std::env::var("MODEL_MAPPING").unwrap_or_default());
        let max_tokens =
            parse_max_tokens_mapping(&std::env::var("MAX_TOKENS_MAPPING").unwrap_or_default());

        let max_tokens_default = std::env::var("MAX_TOKENS")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .filter(|tokens| *tokens > 0);

        Ok(Self {
            port,
            base_url,
            models,
            max_tokens,
            max_tokens_default,
        })
    }

    /// The upstream endpoint every request is forwarded to.
    pub fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url.trim_end_matches('/'))
    }
}

/// Parse a `source:target,...` model rewrite table. Malformed pairs are skipped.
pub fn parse_model_mapping(raw: &str) -> HashMap<String, String> {
    let mut mapping = HashMap::new();

    for pair in raw.split(',') {
        if let Some((source, target)) = pair.trim().split_once(':') {
            let source = source.trim();
            let target = target.trim();
            if !source.is_empty() && !target.is_empty() {
                mapping.insert(source.to_string(), target.to_string());
            }
        }
    }

    mapping
}

/// Parse a `model:tokens,...` max-tokens table. Malformed pairs and
/// non-positive token counts are skipped.
pub fn parse_max_tokens_mapping(raw: &str) -> HashMap<String, u64> {
    let mut mapping = HashMap::new();

    for pair in raw.split(',') {
        if let Some((model, tokens)) = pair.trim().split_once(':') {
            let model = model.trim();
            if model.is_empty() {
                continue;
            }
            if let Ok(tokens) = tokens.trim().parse::<u64>() {
                if tokens > 0 {
                    mapping.insert(model.to_string(), tokens);
                }
            }
        }
    }

    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_model_mapping_with_whitespace() {
        let mapping = parse_model_mapping(
            "gpt-4 : claude-opus-4-5-20251101 , gpt-3.5-turbo:claude-3-5-haiku-20241022",
        );

        assert_eq!(mapping.len(), 2);
        assert_eq!(
            mapping.get("gpt-4"),
            Some(&"claude-opus-4-5-20251101".to_string())
        );
        assert_eq!(
            mapping.get("gpt-3.5-turbo"),
            Some(&"claude-3-5-haiku-20241022".to_string())
        );
    }

    #[test]
    fn empty_model_mapping_is_empty() {
        assert!(parse_model_mapping("").is_empty());
    }

    #[test]
    fn malformed_model_pairs_are_skipped() {
        let mapping = parse_model_mapping("no-colon,:missing-source,missing-target:,ok:yes");
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("ok"), Some(&"yes".to_string()));
    }

    #[test]
    fn parses_max_tokens_mapping() {
        let mapping =
            parse_max_tokens_mapping("claude-opus-4-5-20251101:16384, claude-3-5-haiku:4096");

        assert_eq!(mapping.get("claude-opus-4-5-20251101"), Some(&16384));
        assert_eq!(mapping.get("claude-3-5-haiku"), Some(&4096));
    }

    #[test]
    fn non_numeric_and_zero_token_counts_are_skipped() {
        let mapping = parse_max_tokens_mapping("a:lots,b:0,c:1024");
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("c"), Some(&1024));
    }

    #[test]
    fn messages_url_trims_trailing_slash() {
        let config = RelayConfig {
            base_url: "https://gateway.internal/".to_string(),
            ..RelayConfig::default()
        };
        assert_eq!(config.messages_url(), "https://gateway.internal/v1/messages");
    }

    #[test]
    fn default_messages_url_points_at_anthropic() {
        let config = RelayConfig::default();
        assert_eq!(config.messages_url(), "https://api.anthropic.com/v1/messages");
    }
}
