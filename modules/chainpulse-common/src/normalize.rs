use std::collections::HashMap;
use std::sync::LazyLock;

/// Canonical name -> variants (tickers, cashtags, case variants).
/// Matching is case-insensitive; the canonical casing is preserved.
const ALIAS_TABLE: &[(&str, &[&str])] = &[
    ("Bitcoin", &["btc", "$btc", "xbt", "bitcoin"]),
    ("Ethereum", &["eth", "$eth", "ether", "ethereum"]),
    ("Solana", &["sol", "$sol", "solana"]),
    ("Dogecoin", &["doge", "$doge", "dogecoin"]),
    ("XRP", &["$xrp", "xrp", "ripple"]),
    ("Cardano", &["ada", "$ada", "cardano"]),
    ("BNB", &["$bnb", "bnb", "binance coin"]),
    ("Tron", &["trx", "$trx", "tron"]),
    ("Polygon", &["matic", "$matic", "pol", "$pol", "polygon"]),
    ("Chainlink", &["link", "$link", "chainlink"]),
    ("Avalanche", &["avax", "$avax", "avalanche"]),
    ("Polkadot", &["dot", "$dot", "polkadot"]),
    ("Litecoin", &["ltc", "$ltc", "litecoin"]),
    ("Shiba Inu", &["shib", "$shib", "shiba inu", "shiba"]),
    ("Tether", &["usdt", "$usdt", "tether"]),
    ("USDC", &["$usdc", "usdc", "usd coin"]),
    ("Sui", &["$sui", "sui"]),
    ("Aptos", &["apt", "$apt", "aptos"]),
    ("Toncoin", &["ton", "$ton", "toncoin"]),
    ("Pepe", &["$pepe", "pepe"]),
];

/// Lowercased variant -> canonical name, built once.
static VARIANT_MAP: LazyLock<HashMap<String, &'static str>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for (canonical, variants) in ALIAS_TABLE {
        map.insert(canonical.to_lowercase(), *canonical);
        for v in *variants {
            map.insert((*v).to_string(), *canonical);
        }
    }
    map
});

/// Canonicalize an entity surface form. Unknown inputs are returned unchanged.
/// Idempotent: `normalize_entity(normalize_entity(x)) == normalize_entity(x)`.
pub fn normalize_entity(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    match VARIANT_MAP.get(trimmed.to_lowercase().as_str()) {
        Some(canonical) => (*canonical).to_string(),
        None => trimmed.to_string(),
    }
}

/// All canonical names in the alias table.
pub fn canonical_names() -> Vec<&'static str> {
    ALIAS_TABLE.iter().map(|(canonical, _)| *canonical).collect()
}

/// Whether the input is already a canonical name (exact casing).
pub fn is_canonical(name: &str) -> bool {
    ALIAS_TABLE.iter().any(|(canonical, _)| *canonical == name)
}
