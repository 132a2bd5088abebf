use crate::peer::types::ServerConfig;
use rand::Rng;

/// Random client-generated identity, 16 hex chars
pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

/// ICE server URL with a `stun:`/`turn:` scheme, picked by `type` when missing
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("turn:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}
