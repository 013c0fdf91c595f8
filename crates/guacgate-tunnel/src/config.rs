// Connection configuration negotiated with (or requested from) the backend.

use std::collections::HashMap;

use crate::error::{GuacError, Result};

/// The protocol and parameter set for one backend connection, as selected by
/// the client's connect request.
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Backend protocol name ("vnc", "rdp", "ssh", ...).
    pub protocol: String,
    /// When set, join this existing backend session instead of creating a
    /// new one.
    pub connection_id: Option<String>,
    /// Named connection parameters (hostname, port, credentials, ...).
    pub parameters: HashMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            connection_id: None,
            parameters: HashMap::new(),
        }
    }

    /// Builds a configuration from raw client-supplied parameters.
    ///
    /// Either `protocol` or `connectionid` (a `$`-prefixed backend session
    /// ID to join) must be present.
    pub fn from_params(mut params: HashMap<String, String>) -> Result<Self> {
        let connection_id = params.remove("connectionid");
        let protocol = params.remove("protocol").unwrap_or_default();
        if protocol.is_empty() && connection_id.is_none() {
            return Err(GuacError::BadRequest(
                "no protocol or connection ID specified".to_string(),
            ));
        }
        Ok(Self {
            protocol,
            connection_id,
            parameters: params,
        })
    }
}

/// Display and media capabilities announced to the backend during the
/// handshake.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub optimal_width: u32,
    pub optimal_height: u32,
    /// Display resolution in DPI. Terminal backends scale fonts by it.
    pub optimal_resolution: u32,
    pub audio_mimetypes: Vec<String>,
    pub video_mimetypes: Vec<String>,
    pub image_mimetypes: Vec<String>,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            optimal_width: 1024,
            optimal_height: 768,
            optimal_resolution: 96,
            audio_mimetypes: Vec::new(),
            video_mimetypes: Vec::new(),
            image_mimetypes: Vec::new(),
        }
    }
}

impl ClientInfo {
    /// Extracts display and media settings from raw client parameters,
    /// falling back to defaults for anything absent or unparsable.
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        let parse_dim = |key: &str, default: u32| {
            params
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        let parse_mimetypes = |key: &str| {
            params
                .get(key)
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            optimal_width: parse_dim("width", defaults.optimal_width),
            optimal_height: parse_dim("height", defaults.optimal_height),
            optimal_resolution: parse_dim("dpi", defaults.optimal_resolution),
            audio_mimetypes: parse_mimetypes("audio"),
            video_mimetypes: parse_mimetypes("video"),
            image_mimetypes: parse_mimetypes("image"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_requires_protocol_or_connection_id() {
        assert!(ConnectionConfig::from_params(HashMap::new()).is_err());

        let mut params = HashMap::new();
        params.insert("connectionid".to_string(), "$abc".to_string());
        let config = ConnectionConfig::from_params(params).unwrap();
        assert_eq!(config.connection_id.as_deref(), Some("$abc"));
    }

    #[test]
    fn test_client_info_from_params() {
        let mut params = HashMap::new();
        params.insert("width".to_string(), "1920".to_string());
        params.insert("height".to_string(), "nonsense".to_string());
        params.insert("audio".to_string(), "audio/L8,audio/L16".to_string());

        let info = ClientInfo::from_params(&params);
        assert_eq!(info.optimal_width, 1920);
        assert_eq!(info.optimal_height, 768);
        assert_eq!(info.optimal_resolution, 96);
        assert_eq!(info.audio_mimetypes, vec!["audio/L8", "audio/L16"]);
        assert!(info.video_mimetypes.is_empty());
    }
}
