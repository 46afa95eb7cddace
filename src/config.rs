use chrono::Duration;
use std::env;
use std::path::{Path, PathBuf};

/// Process-level settings, resolved once at startup from the environment
/// (after `.env` has been loaded).
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub cleaned_dir: PathBuf,
    pub cryptocompare_api_key: Option<String>,
}

impl Settings {
    pub fn from_env() -> Self {
        let output_dir = env::var("CANDLE_OUTPUT_DIR").unwrap_or_else(|_| "all_files".to_string());
        let cleaned_dir =
            env::var("CANDLE_CLEANED_DIR").unwrap_or_else(|_| "cleaned_files".to_string());

        Self {
            output_dir: PathBuf::from(output_dir),
            cleaned_dir: PathBuf::from(cleaned_dir),
            cryptocompare_api_key: env::var("CRYPTOCOMPARE_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
        }
    }
}

/// One token as an exchange trades it: the canonical symbol we file it
/// under, plus the exchange-specific pair symbol.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub token: String,
    pub symbol: String,
}

/// Everything one exchange fetcher needs for a run. Delay ranges are
/// (min, max) seconds; a zero range means no pause.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub output_dir: PathBuf,
    pub tokens: Vec<TokenPair>,
    pub page_size: usize,
    pub interval: Duration,
    pub history_target: usize,
    pub page_delay: (f64, f64),
    pub token_delay: (f64, f64),
}

/// 30 days of 5-minute candles.
const HISTORY_TARGET: usize = 8640;

const CRYPTOCOMPARE_TOKENS: &[&str] = &["MAX"];

/// Tokens whose Binance pair symbol differs from the token symbol keep
/// their canonical name in the output files.
const BINANCE_SYMBOLS: &[(&str, &str)] = &[
    ("BANANAS31", "BANANAS31USDT"),
    ("ETHDYDX", "DYDXUSDT"),
    ("FORM", "FORMUSDT"),
    ("GHST", "GHSTUSDT"),
    ("MLN", "MLNUSDT"),
    ("RED", "REDUSDT"),
    ("WAXP", "WAXPUSDT"),
];

const KUCOIN_TOKENS: &[&str] = &[
    "MEMEFI", "AERGO", "JELLYJELLY", "ZEREBRO", "BABY", "BIGTIME", "BMT", "BNB", "BTC", "DGB",
    "DYDX", "FORTH", "GMT", "GUN", "HIGH", "KDA", "KERNEL", "MAX", "MEME", "MUBARAK", "NEIRO",
    "NIL", "PAXG", "PARTI", "PROM", "PROMPT", "QKC", "STRAX", "TUT", "WCT",
];

impl FetchConfig {
    pub fn cryptocompare(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            tokens: CRYPTOCOMPARE_TOKENS
                .iter()
                .map(|token| TokenPair {
                    token: token.to_string(),
                    symbol: token.to_string(),
                })
                .collect(),
            page_size: 2000,
            interval: Duration::minutes(5),
            history_target: HISTORY_TARGET,
            page_delay: (1.0, 1.0),
            token_delay: (0.0, 0.0),
        }
    }

    pub fn binance(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            tokens: BINANCE_SYMBOLS
                .iter()
                .map(|(token, symbol)| TokenPair {
                    token: token.to_string(),
                    symbol: symbol.to_string(),
                })
                .collect(),
            page_size: 1000,
            interval: Duration::minutes(5),
            history_target: HISTORY_TARGET,
            page_delay: (0.6, 1.2),
            token_delay: (1.2, 2.5),
        }
    }

    pub fn kucoin(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            tokens: KUCOIN_TOKENS
                .iter()
                .map(|token| TokenPair {
                    token: token.to_string(),
                    symbol: format!("{token}-USDT"),
                })
                .collect(),
            page_size: 1500,
            interval: Duration::minutes(5),
            history_target: HISTORY_TARGET,
            page_delay: (0.0, 0.0),
            token_delay: (0.5, 1.5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kucoin_pairs_are_usdt_quoted() {
        let cfg = FetchConfig::kucoin(Path::new("out"));
        assert_eq!(cfg.tokens.len(), 30);
        assert!(cfg.tokens.iter().all(|p| p.symbol == format!("{}-USDT", p.token)));
    }

    #[test]
    fn binance_registry_maps_renamed_tokens() {
        let cfg = FetchConfig::binance(Path::new("out"));
        let dydx = cfg.tokens.iter().find(|p| p.token == "ETHDYDX").unwrap();
        assert_eq!(dydx.symbol, "DYDXUSDT");
    }
}
