//! Cross-cutting request shaping and crawl etiquette.
//!
//! Everything here runs before or around a fetch: user-agent rotation,
//! geo-consistent headers, rate limiting, robots.txt policy, honeypot
//! assessment, and acquisition metrics.

pub mod geo;
pub mod honeypot;
pub mod metrics;
pub mod rate_limit;
pub mod robots;
pub mod user_agents;

// Re-export commonly used types
pub use geo::{parse_country_hint, resolve as resolve_geo, GeoProfile, GeoResolver};
pub use honeypot::{assess_link, HoneypotAssessment, HoneypotOptions, LinkCandidate};
pub use metrics::{DomainStats, GlobalStats, MetricsCollector, MetricsSnapshot};
pub use rate_limit::{jittered_delay_with, RateLimiter, RateLimiterConfig};
pub use robots::{
    is_path_allowed, is_url_allowed, parse_robots, RobotsPolicy, RobotsRules, RobotsVerdict,
};
pub use user_agents::{
    client_hints, identify_family, BrowserFamily, RotationStrategy, UaRotator, UaRotatorOptions,
};
