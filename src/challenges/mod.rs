//! WAF and challenge handling.

pub mod detector;
pub mod handler;
pub mod waf;

pub use detector::{LiveChallengeDetection, LiveChallengeDetector, LiveChallengeType};
pub use handler::{
    ChallengeHandler, ChallengeHandlerConfig, ChallengeOutcome, ChallengeResolution,
    ResolutionMethod,
};
pub use waf::{
    detect_waf, format_waf_challenge_type, WafCategory, WafDetection, WafInput, WafProvider,
};
