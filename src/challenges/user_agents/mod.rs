//! User-Agent profile manager.
//!
//! Responsibilities:
//! - Provide built-in browser header profiles whose `User-Agent` and
//!   `Sec-CH-UA*` client hints agree with each other.
//! - Provide filtered selections based on browser family.
//! - Allow a custom `User-Agent` while dropping hints it would contradict.

use once_cell::sync::Lazy;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::borrow::Cow;

/// Browser families with a built-in profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrowserFamily {
    Chrome,
    Edge,
    Firefox,
}

/// Options to filter/select a profile.
#[derive(Debug, Clone, Default)]
pub struct UserAgentOptions {
    pub custom: Option<String>,
    pub browser: Option<BrowserFamily>,
}

/// Final selected profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAgentProfile {
    pub browser: Option<BrowserFamily>,
    pub user_agent: String,
    /// `(name, value)` pairs for `Sec-CH-UA`, `Sec-CH-UA-Mobile`, `Sec-CH-UA-Platform`.
    pub client_hints: Vec<(&'static str, String)>,
    pub accept: String,
    pub accept_language: String,
    pub accept_encoding: String,
}

impl UserAgentProfile {
    /// Every header of the profile, in the order a browser would send them.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("user-agent", self.user_agent.clone())];
        headers.extend(self.client_hints.iter().cloned());
        headers.push(("accept", self.accept.clone()));
        headers.push(("accept-language", self.accept_language.clone()));
        headers.push(("accept-encoding", self.accept_encoding.clone()));
        headers
    }
}

struct BuiltinProfile {
    browser: BrowserFamily,
    user_agent: &'static str,
    sec_ch_ua: Option<&'static str>,
    platform: &'static str,
    accept: &'static str,
}

const CHROMIUM_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const FIREFOX_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";
const ACCEPT_ENCODING: &str = "gzip, br";

static BUILTIN_PROFILES: Lazy<Vec<BuiltinProfile>> = Lazy::new(|| {
    vec![
        BuiltinProfile {
            browser: BrowserFamily::Chrome,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            sec_ch_ua: Some(r#""Chromium";v="124", "Google Chrome";v="124", "Not-A.Brand";v="99""#),
            platform: "\"Windows\"",
            accept: CHROMIUM_ACCEPT,
        },
        BuiltinProfile {
            browser: BrowserFamily::Chrome,
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
            sec_ch_ua: Some(r#""Chromium";v="124", "Google Chrome";v="124", "Not-A.Brand";v="99""#),
            platform: "\"macOS\"",
            accept: CHROMIUM_ACCEPT,
        },
        BuiltinProfile {
            browser: BrowserFamily::Edge,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
            sec_ch_ua: Some(r#""Chromium";v="124", "Microsoft Edge";v="124", "Not-A.Brand";v="99""#),
            platform: "\"Windows\"",
            accept: CHROMIUM_ACCEPT,
        },
        BuiltinProfile {
            browser: BrowserFamily::Firefox,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
            sec_ch_ua: None,
            platform: "\"Windows\"",
            accept: FIREFOX_ACCEPT,
        },
    ]
});

/// Retrieve a profile using given options.
pub fn get_user_agent_profile(opts: UserAgentOptions) -> Result<UserAgentProfile, UserAgentError> {
    if let Some(custom) = opts.custom {
        return custom_profile(custom);
    }

    let candidates: Vec<&BuiltinProfile> = BUILTIN_PROFILES
        .iter()
        .filter(|profile| opts.browser.is_none_or(|browser| profile.browser == browser))
        .collect();

    let chosen = candidates
        .choose(&mut thread_rng())
        .ok_or(UserAgentError::ProfileNotFound)?;

    Ok(to_profile(chosen))
}

fn to_profile(builtin: &BuiltinProfile) -> UserAgentProfile {
    let client_hints = builtin
        .sec_ch_ua
        .map(|brands| {
            vec![
                ("sec-ch-ua", brands.to_string()),
                ("sec-ch-ua-mobile", "?0".to_string()),
                ("sec-ch-ua-platform", builtin.platform.to_string()),
            ]
        })
        .unwrap_or_default();

    UserAgentProfile {
        browser: Some(builtin.browser),
        user_agent: builtin.user_agent.to_string(),
        client_hints,
        accept: builtin.accept.to_string(),
        accept_language: ACCEPT_LANGUAGE.to_string(),
        accept_encoding: ACCEPT_ENCODING.to_string(),
    }
}

/// A custom agent gets generic headers and no client hints, since any built-in
/// hint set could contradict it.
fn custom_profile(custom: String) -> Result<UserAgentProfile, UserAgentError> {
    if custom.trim().is_empty() {
        return Err(UserAgentError::InvalidOptions(
            "custom user-agent must not be empty".into(),
        ));
    }

    Ok(UserAgentProfile {
        browser: None,
        user_agent: custom,
        client_hints: Vec::new(),
        accept: FIREFOX_ACCEPT.to_string(),
        accept_language: ACCEPT_LANGUAGE.to_string(),
        accept_encoding: ACCEPT_ENCODING.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum UserAgentError {
    #[error("invalid user-agent options: {0}")]
    InvalidOptions(Cow<'static, str>),
    #[error("no matching user-agent profile found")]
    ProfileNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_selection_returns_profile() {
        let profile = get_user_agent_profile(UserAgentOptions::default()).unwrap();
        assert!(profile.user_agent.starts_with("Mozilla/5.0"));
    }

    #[test]
    fn chromium_profiles_carry_matching_hints() {
        for _ in 0..16 {
            let profile = get_user_agent_profile(UserAgentOptions {
                browser: Some(BrowserFamily::Edge),
                ..Default::default()
            })
            .unwrap();
            let brands = &profile.client_hints[0].1;
            assert!(profile.user_agent.contains("Edg/124"));
            assert!(brands.contains("Microsoft Edge"));
        }
    }

    #[test]
    fn firefox_sends_no_client_hints() {
        let profile = get_user_agent_profile(UserAgentOptions {
            browser: Some(BrowserFamily::Firefox),
            ..Default::default()
        })
        .unwrap();
        assert!(profile.client_hints.is_empty());
    }

    #[test]
    fn custom_agent_rejects_blank() {
        let err = get_user_agent_profile(UserAgentOptions {
            custom: Some("  ".into()),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, UserAgentError::InvalidOptions(_)));
    }
}
