//! Provider tags

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of backend kinds the middleware can route to
///
/// Beyond equality and hashing the tag is opaque; each registered
/// [`ServiceFactory`](super::ServiceFactory) reports the one it serves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Google Gemini (official API)
    Google,
    /// Alibaba Qwen
    Alibaba,
    /// Api.Airforce
    Airforce,
    /// Cloudflare Workers AI
    Cloudflare,
    /// DeepInfra
    DeepInfra,
    /// Free community endpoints
    Free,
    /// Cookie-authenticated Gemini
    Cookies,
    /// GPT OSS
    GptOss,
    /// Moonshot Kimi
    Kimi,
    /// Zhipu GLM
    Zhipu,
    /// OIVSCode server 0501
    OiVsCodeSer0501,
    /// OIVSCode server 2
    OiVsCodeSer2,
    /// Chatai
    ChatAi,
    /// Mintlify
    Mintlify,
    /// WeWordle
    WeWordle,
    /// Yqcloud
    YqCloud,
    /// Cohere
    Cohere,
    /// LambdaChat
    Lambda,
}

impl ProviderKind {
    /// Every provider kind, in declaration order
    pub const ALL: [ProviderKind; 18] = [
        Self::Google,
        Self::Alibaba,
        Self::Airforce,
        Self::Cloudflare,
        Self::DeepInfra,
        Self::Free,
        Self::Cookies,
        Self::GptOss,
        Self::Kimi,
        Self::Zhipu,
        Self::OiVsCodeSer0501,
        Self::OiVsCodeSer2,
        Self::ChatAi,
        Self::Mintlify,
        Self::WeWordle,
        Self::YqCloud,
        Self::Cohere,
        Self::Lambda,
    ];

    /// Human-readable name
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Alibaba => "Alibaba",
            Self::Airforce => "Api.Airforce",
            Self::Cloudflare => "Cloudflare AI",
            Self::DeepInfra => "DeepInfra",
            Self::Free => "Free",
            Self::Cookies => "Cookies",
            Self::GptOss => "GPT OSS",
            Self::Kimi => "Kimi",
            Self::Zhipu => "Zhipu",
            Self::OiVsCodeSer0501 => "OIVSCodeSer0501",
            Self::OiVsCodeSer2 => "OIVSCodeSer2",
            Self::ChatAi => "Chatai",
            Self::Mintlify => "Mintlify",
            Self::WeWordle => "WeWordle",
            Self::YqCloud => "Yqcloud",
            Self::Cohere => "Cohere",
            Self::Lambda => "LambdaChat",
        }
    }

    /// Stable key used in configuration files and breaker names
    #[must_use]
    pub fn key(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Alibaba => "alibaba",
            Self::Airforce => "airforce",
            Self::Cloudflare => "cloudflare",
            Self::DeepInfra => "deep_infra",
            Self::Free => "free",
            Self::Cookies => "cookies",
            Self::GptOss => "gpt_oss",
            Self::Kimi => "kimi",
            Self::Zhipu => "zhipu",
            Self::OiVsCodeSer0501 => "oi_vs_code_ser0501",
            Self::OiVsCodeSer2 => "oi_vs_code_ser2",
            Self::ChatAi => "chat_ai",
            Self::Mintlify => "mintlify",
            Self::WeWordle => "we_wordle",
            Self::YqCloud => "yq_cloud",
            Self::Cohere => "cohere",
            Self::Lambda => "lambda",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Returned when a string names no known provider
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Unknown provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderKind {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|kind| {
                kind.key().eq_ignore_ascii_case(needle)
                    || kind.display_name().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| UnknownProvider(s.to_string()))
    }
}
