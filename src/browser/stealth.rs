//! Anti-detection page setup.
//!
//! Booking platforms fingerprint headless Chrome aggressively; every page
//! gets a rotated user agent, a set of evasion scripts registered before any
//! site JavaScript runs, browser-like request headers, and URL blocking for
//! heavyweight resources the extractor never reads.

use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::network::{
    Headers, SetBlockedUrLsParams, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use rand::prelude::IndexedRandom;
use serde_json::json;
use tracing::{debug, trace};

/// Current desktop Chrome user agents, rotated per session.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
];

// Order matters: webdriver removal must run before anything a detector
// script could observe.
const EVASION_SCRIPTS: &[&str] = &[
    WEBDRIVER_JS,
    LANGUAGES_JS,
    PLUGINS_JS,
    CHROME_RUNTIME_JS,
    WEBGL_JS,
    HARDWARE_JS,
];

const WEBDRIVER_JS: &str = r"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => false
    });
";

const LANGUAGES_JS: &str = r"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en', 'pt-BR']
    });
";

const PLUGINS_JS: &str = r"
    const mockPlugins = [
        {
            name: 'Chrome PDF Plugin',
            description: 'Portable Document Format',
            filename: 'internal-pdf-viewer'
        },
        {
            name: 'Chrome PDF Viewer',
            description: '',
            filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai'
        },
        {
            name: 'Native Client',
            description: '',
            filename: 'internal-nacl-plugin'
        }
    ];
    const pluginsProto = Object.getPrototypeOf(navigator.plugins);
    Object.defineProperty(navigator, 'plugins', {
        get: () => {
            const plugins = {};
            mockPlugins.forEach((plugin, i) => {
                plugins[i] = plugin;
                plugins[plugin.name] = plugin;
            });
            Object.setPrototypeOf(plugins, pluginsProto);
            Object.defineProperty(plugins, 'length', { value: mockPlugins.length });
            return plugins;
        }
    });
";

const CHROME_RUNTIME_JS: &str = r"
    if (!window.chrome) {
        window.chrome = {};
    }
    if (!window.chrome.runtime) {
        window.chrome.runtime = {
            connect: () => ({
                onMessage: { addListener: () => {}, removeListener: () => {} },
                postMessage: () => {}
            })
        };
    }
";

const WEBGL_JS: &str = r"
    const getParameterProxyHandler = {
        apply: function(target, ctx, args) {
            const param = (args && args[0]) || null;
            if (param === 37445) {
                return 'Intel Inc.';
            }
            if (param === 37446) {
                return 'Intel Iris OpenGL Engine';
            }
            return Reflect.apply(target, ctx, args);
        }
    };
    if (window.WebGLRenderingContext) {
        const getParameter = WebGLRenderingContext.prototype.getParameter;
        WebGLRenderingContext.prototype.getParameter = new Proxy(getParameter, getParameterProxyHandler);
    }
";

const HARDWARE_JS: &str = r"
    Object.defineProperty(navigator, 'hardwareConcurrency', {
        get: () => 8
    });
";

/// Resource patterns the extractor never needs; blocking them cuts page
/// weight and removes most third-party beacons.
const BLOCKED_URL_PATTERNS: &[&str] = &[
    "*.png",
    "*.jpg",
    "*.jpeg",
    "*.gif",
    "*.webp",
    "*.svg",
    "*.woff",
    "*.woff2",
    "*.ttf",
    "*.mp4",
    "*.webm",
    "*.google-analytics.com/*",
    "*.googletagmanager.com/*",
    "*.doubleclick.net/*",
    "*.facebook.net/*",
    "*.hotjar.com/*",
];

/// Pick a user agent for this browser session.
pub fn pick_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Register evasion scripts, override the user agent, set browser-like
/// headers, and block heavyweight resources on `page`.
///
/// Scripts registered through `Page.addScriptToEvaluateOnNewDocument` run
/// before any document script on every navigation of this page.
pub async fn prepare_page(page: &Page) -> Result<()> {
    debug!("Applying stealth setup to page");

    for source in EVASION_SCRIPTS {
        page.execute(AddScriptToEvaluateOnNewDocumentParams {
            source: (*source).to_string(),
            include_command_line_api: None,
            world_name: None,
            run_immediately: None,
        })
        .await?;
        trace!("Registered evasion script");
    }

    // The real browser UA with the Headless marker stripped fingerprints
    // better than a fully fabricated one.
    let version = page
        .execute(chromiumoxide::cdp::browser_protocol::browser::GetVersionParams {})
        .await?;
    let cleaned_ua = version.user_agent.replace("Headless", "");

    page.execute(SetUserAgentOverrideParams {
        user_agent: cleaned_ua,
        accept_language: Some("en-US,en;q=0.9,pt-BR;q=0.8".to_string()),
        platform: Some("Win32".to_string()),
        user_agent_metadata: None,
    })
    .await?;

    let headers = json!({
        "Accept": "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
        "Accept-Language": "en-US,en;q=0.9,pt-BR;q=0.8",
        "Upgrade-Insecure-Requests": "1",
    });
    page.execute(SetExtraHttpHeadersParams::new(Headers::new(headers)))
        .await?;

    let blocked: Vec<String> = BLOCKED_URL_PATTERNS
        .iter()
        .map(|p| (*p).to_string())
        .collect();
    page.execute(SetBlockedUrLsParams::new(blocked)).await?;

    debug!("Stealth setup complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_agent_pool_is_desktop_chrome() {
        for ua in USER_AGENTS {
            assert!(ua.contains("Chrome/"));
            assert!(!ua.contains("Headless"));
        }
    }

    #[test]
    fn pick_user_agent_draws_from_pool() {
        let ua = pick_user_agent();
        assert!(USER_AGENTS.contains(&ua));
    }
}
