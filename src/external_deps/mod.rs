//! Integrations with services and processes outside this crate: CAPTCHA
//! solving vendors and the pooled browser the hero engine drives.

pub mod browser;
pub mod captcha;
