use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:109.0) Gecko/20100101 Firefox/117.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.5735.199 Safari/537.36",
    "Mozilla/5.0 (Windows NT 11.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Fedora; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.6167.139 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:138.0) Gecko/20100101 Firefox/138.0",
    "Mozilla/5.0 (X11; Linux x86_64; rv:138.0) Gecko/20100101 Firefox/138.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/136.0.0.0 Safari/537.36 Edg/136.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:138.0) Gecko/20100101 Firefox/138.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36 Edg/135.0.0.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:128.0) Gecko/20100101 Firefox/128.0",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/133.0.0.0 Safari/537.36 OPR/118.0.0.0",
    "Mozilla/5.0 (X11; CrOS x86_64 14541.0.0) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/135.0.0.0 Safari/537.36",
];

// (accept-language, navigator.platform)
const PROFILES: &[(&str, &str)] = &[
    ("en-US,en", "Win32"),
    ("en-GB,en", "Linux x86_64"),
    ("ja-JP,ja", "MacIntel"),
    ("fr-FR,fr", "Win32"),
    ("de-DE,de", "Win64"),
    ("ko-KR,ko", "Linux x86_64"),
    ("es-ES,es", "MacIntel"),
    ("it-IT,it", "Win32"),
    ("zh-CN,zh", "Win64"),
    ("pt-BR,pt", "Linux i686"),
    ("nl-NL,nl", "MacIntel"),
    ("pl-PL,pl", "Linux x86_64"),
    ("zh-TW,zh", "Win64"),
];

/// The browser fingerprint presented to the lookup site for one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    pub user_agent: String,
    pub accept_language: String,
    pub platform: String,
}

#[derive(Debug, Clone)]
pub struct IdentityPool {
    user_agents: Vec<String>,
}

impl IdentityPool {
    /// Uses `user_agents` when non-empty, the built-in list otherwise.
    pub fn new(user_agents: &[String]) -> Self {
        let user_agents = if user_agents.is_empty() {
            USER_AGENTS.iter().map(|ua| ua.to_string()).collect()
        } else {
            user_agents.to_vec()
        };
        Self { user_agents }
    }

    pub fn len(&self) -> usize {
        self.user_agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_agents.is_empty()
    }

    /// Picks a user agent and a language/platform profile independently.
    pub fn pick(&self) -> ClientIdentity {
        let mut rng = rand::thread_rng();
        let user_agent = self
            .user_agents
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| USER_AGENTS[0].to_string());
        let (accept_language, platform) = PROFILES.choose(&mut rng).copied().unwrap_or(PROFILES[0]);

        ClientIdentity {
            user_agent,
            accept_language: accept_language.to_string(),
            platform: platform.to_string(),
        }
    }
}

impl Default for IdentityPool {
    fn default() -> Self {
        Self::new(&[])
    }
}
