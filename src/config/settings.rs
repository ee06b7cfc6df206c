use serde::Deserialize;

/// Top-level configuration settings for the service.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub feed: FeedSettings,
    pub bus: BusSettings,
    pub authz: AuthzSettings,
    pub route_map: RouteMapSettings,
    pub lora: LoraSettings,
    pub log: LogSettings,
}

/// Address the WebSocket adapter binds to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Address of the integration feed (LoRa uplinks and lifecycle events).
/// Unauthenticated, so it binds to loopback unless told otherwise.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeedSettings {
    pub host: String,
    pub port: u16,
}

/// Subject layout of the internal bus.
///
/// Messages are published on `<subject_prefix>.<channel>[.<subtopic>]`;
/// lifecycle events arrive on `events_subject`.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BusSettings {
    pub subject_prefix: String,
    pub events_subject: String,
}

/// Policy service endpoint and per-call deadline.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AuthzSettings {
    pub url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RouteMapSettings {
    pub path: String,
}

/// Metadata key marking an entity as bridged to LoRa.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoraSettings {
    pub metadata_key: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from
/// `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub feed: Option<PartialFeedSettings>,
    pub bus: Option<PartialBusSettings>,
    pub authz: Option<PartialAuthzSettings>,
    pub route_map: Option<PartialRouteMapSettings>,
    pub lora: Option<PartialLoraSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialFeedSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBusSettings {
    pub subject_prefix: Option<String>,
    pub events_subject: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialAuthzSettings {
    pub url: Option<String>,
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialRouteMapSettings {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoraSettings {
    pub metadata_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            feed: FeedSettings {
                host: "127.0.0.1".to_string(),
                port: 8081,
            },
            bus: BusSettings {
                subject_prefix: "channels".to_string(),
                events_subject: "events.things".to_string(),
            },
            authz: AuthzSettings {
                url: "http://127.0.0.1:9000/authorize".to_string(),
                timeout_ms: 5000,
            },
            route_map: RouteMapSettings {
                path: "data/route_map".to_string(),
            },
            lora: LoraSettings {
                metadata_key: "lora".to_string(),
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fills every value missing from `partial` with its default.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();

        Settings {
            server: ServerSettings {
                host: partial
                    .server
                    .as_ref()
                    .and_then(|s| s.host.clone())
                    .unwrap_or(default.server.host),
                port: partial
                    .server
                    .as_ref()
                    .and_then(|s| s.port)
                    .unwrap_or(default.server.port),
            },
            feed: FeedSettings {
                host: partial
                    .feed
                    .as_ref()
                    .and_then(|f| f.host.clone())
                    .unwrap_or(default.feed.host),
                port: partial
                    .feed
                    .as_ref()
                    .and_then(|f| f.port)
                    .unwrap_or(default.feed.port),
            },
            bus: BusSettings {
                subject_prefix: partial
                    .bus
                    .as_ref()
                    .and_then(|b| b.subject_prefix.clone())
                    .unwrap_or(default.bus.subject_prefix),
                events_subject: partial
                    .bus
                    .as_ref()
                    .and_then(|b| b.events_subject.clone())
                    .unwrap_or(default.bus.events_subject),
            },
            authz: AuthzSettings {
                url: partial
                    .authz
                    .as_ref()
                    .and_then(|a| a.url.clone())
                    .unwrap_or(default.authz.url),
                timeout_ms: partial
                    .authz
                    .as_ref()
                    .and_then(|a| a.timeout_ms)
                    .unwrap_or(default.authz.timeout_ms),
            },
            route_map: RouteMapSettings {
                path: partial
                    .route_map
                    .and_then(|r| r.path)
                    .unwrap_or(default.route_map.path),
            },
            lora: LoraSettings {
                metadata_key: partial
                    .lora
                    .and_then(|l| l.metadata_key)
                    .unwrap_or(default.lora.metadata_key),
            },
            log: LogSettings {
                level: partial
                    .log
                    .and_then(|l| l.level)
                    .unwrap_or(default.log.level),
            },
        }
    }

    /// `host:port` the WebSocket adapter binds to.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// `host:port` the integration feed binds to.
    pub fn feed_addr(&self) -> String {
        format!("{}:{}", self.feed.host, self.feed.port)
    }
}
