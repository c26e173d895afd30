use std::net::{IpAddr, Ipv4Addr};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Maximum concurrent sessions
    pub max_sessions: usize,
    /// Broadcast ticks per second
    pub tick_rate: u32,
    /// Position quantization steps per distance unit
    pub compression_ratio: f32,
    /// Interest radius R: hidden entities become visible inside it
    pub visibility_radius: f32,
    /// Hysteresis margin H: visible entities persist out to R + H
    pub hysteresis_margin: f32,
    /// Seconds between interest evaluation passes
    pub visibility_interval_secs: f32,
    /// Sessions evaluated per frame during a pass; 0 = unlimited
    pub max_visibility_updates: usize,
    /// Seconds between liveness probe rounds
    pub health_check_interval_secs: f32,
    /// Consecutive probe failures before eviction
    pub health_failure_threshold: u32,
    /// Inactive entities pre-allocated per pooled archetype at startup
    pub prewarm_count: usize,
    /// Path to TLS certificate file (if not using self-signed)
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file (if not using self-signed)
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            max_sessions: 256,
            tick_rate: 30,
            compression_ratio: crate::net::codec::DEFAULT_COMPRESSION_RATIO,
            visibility_radius: 70.0,
            hysteresis_margin: 5.0,
            visibility_interval_secs: 0.5,
            max_visibility_updates: 50,
            health_check_interval_secs: 2.0,
            health_failure_threshold: 3,
            prewarm_count: 256,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BIND_ADDRESS") {
            if let Ok(parsed) = addr.parse() {
                config.bind_address = parsed;
            } else {
                tracing::warn!("Invalid BIND_ADDRESS '{}', using default", addr);
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                if parsed > 0 {
                    config.port = parsed;
                } else {
                    tracing::warn!("PORT must be > 0, using default");
                }
            } else {
                tracing::warn!("Invalid PORT '{}', using default", port);
            }
        }

        if let Ok(max_sessions) = std::env::var("MAX_SESSIONS") {
            if let Ok(parsed) = max_sessions.parse::<usize>() {
                if parsed > 0 && parsed <= 10000 {
                    config.max_sessions = parsed;
                } else {
                    tracing::warn!("MAX_SESSIONS must be 1-10000, using default");
                }
            } else {
                tracing::warn!("Invalid MAX_SESSIONS '{}', using default", max_sessions);
            }
        }

        if let Ok(rate) = std::env::var("TICK_RATE") {
            if let Ok(parsed) = rate.parse::<u32>() {
                if parsed > 0 && parsed <= 240 {
                    config.tick_rate = parsed;
                } else {
                    tracing::warn!("TICK_RATE must be 1-240, using default");
                }
            } else {
                tracing::warn!("Invalid TICK_RATE '{}', using default", rate);
            }
        }

        if let Ok(ratio) = std::env::var("COMPRESSION_RATIO") {
            if let Ok(parsed) = ratio.parse::<f32>() {
                if parsed > 0.0 && parsed.is_finite() {
                    config.compression_ratio = parsed;
                } else {
                    tracing::warn!("COMPRESSION_RATIO must be positive, using default");
                }
            } else {
                tracing::warn!("Invalid COMPRESSION_RATIO '{}', using default", ratio);
            }
        }

        if let Ok(radius) = std::env::var("VISIBILITY_RADIUS") {
            if let Ok(parsed) = radius.parse::<f32>() {
                if parsed > 0.0 && parsed.is_finite() {
                    config.visibility_radius = parsed;
                } else {
                    tracing::warn!("VISIBILITY_RADIUS must be positive, using default");
                }
            } else {
                tracing::warn!("Invalid VISIBILITY_RADIUS '{}', using default", radius);
            }
        }

        if let Ok(margin) = std::env::var("HYSTERESIS_MARGIN") {
            if let Ok(parsed) = margin.parse::<f32>() {
                if parsed >= 0.0 && parsed.is_finite() {
                    config.hysteresis_margin = parsed;
                } else {
                    tracing::warn!("HYSTERESIS_MARGIN must be >= 0, using default");
                }
            } else {
                tracing::warn!("Invalid HYSTERESIS_MARGIN '{}', using default", margin);
            }
        }

        if let Ok(updates) = std::env::var("MAX_VISIBILITY_UPDATES") {
            if let Ok(parsed) = updates.parse::<usize>() {
                config.max_visibility_updates = parsed;
            } else {
                tracing::warn!(
                    "Invalid MAX_VISIBILITY_UPDATES '{}', using default",
                    updates
                );
            }
        }

        if let Ok(threshold) = std::env::var("HEALTH_FAILURE_THRESHOLD") {
            if let Ok(parsed) = threshold.parse::<u32>() {
                if parsed > 0 {
                    config.health_failure_threshold = parsed;
                } else {
                    tracing::warn!("HEALTH_FAILURE_THRESHOLD must be > 0, using default");
                }
            } else {
                tracing::warn!(
                    "Invalid HEALTH_FAILURE_THRESHOLD '{}', using default",
                    threshold
                );
            }
        }

        if let Ok(count) = std::env::var("PREWARM_COUNT") {
            if let Ok(parsed) = count.parse::<usize>() {
                config.prewarm_count = parsed;
            } else {
                tracing::warn!("Invalid PREWARM_COUNT '{}', using default", count);
            }
        }

        if let Ok(cert_path) = std::env::var("TLS_CERT_PATH") {
            config.tls_cert_path = Some(cert_path);
        }

        if let Ok(key_path) = std::env::var("TLS_KEY_PATH") {
            config.tls_key_path = Some(key_path);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be at least 1".to_string());
        }
        if self.tick_rate == 0 {
            return Err("tick_rate must be at least 1".to_string());
        }
        if !(self.compression_ratio > 0.0 && self.compression_ratio.is_finite()) {
            return Err("compression_ratio must be a positive finite number".to_string());
        }
        if !(self.visibility_radius > 0.0 && self.visibility_radius.is_finite()) {
            return Err("visibility_radius must be a positive finite number".to_string());
        }
        if !(self.hysteresis_margin >= 0.0 && self.hysteresis_margin.is_finite()) {
            return Err("hysteresis_margin must be a non-negative finite number".to_string());
        }
        if self.visibility_interval_secs <= 0.0 {
            return Err("visibility_interval_secs must be positive".to_string());
        }
        if self.health_check_interval_secs <= 0.0 {
            return Err("health_check_interval_secs must be positive".to_string());
        }
        if self.health_failure_threshold == 0 {
            return Err("health_failure_threshold must be at least 1".to_string());
        }
        Ok(())
    }

    /// Interest evaluation cadence in ticks, at least 1
    pub fn visibility_interval_ticks(&self) -> u64 {
        ((self.visibility_interval_secs * self.tick_rate as f32).round() as u64).max(1)
    }

    /// Probe cadence in ticks, at least 1
    pub fn health_check_interval_ticks(&self) -> u64 {
        ((self.health_check_interval_secs * self.tick_rate as f32).round() as u64).max(1)
    }
}
