//! Feature contract - auxiliary actions reachable from the prompt surface
//!
//! Features are narrow collaborators: `execute(prompt) -> String`. Some
//! results are sentinel tokens (`"maximize_window"`, `"open_customize"`)
//! that only the display layer interprets; the core returns them verbatim.

use anyhow::Result;
use std::collections::HashMap;
use std::process::Command;
use tracing::info;

/// Sentinel understood by the display layer: expand the chat surface
pub const SENTINEL_MAXIMIZE: &str = "maximize_window";
/// Sentinel understood by the display layer: open the customize dialog
pub const SENTINEL_CUSTOMIZE: &str = "open_customize";

pub trait Feature: Send + Sync {
    fn name(&self) -> &str;

    /// Run the feature with the current prompt text as context
    fn execute(&self, prompt: &str) -> Result<String>;
}

/// Named feature lookup used by the coordinator
pub struct FeatureRegistry {
    features: HashMap<String, Box<dyn Feature>>,
}

impl FeatureRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self {
            features: HashMap::new(),
        };
        registry.add(Box::new(WebSearchFeature));
        registry.add(Box::new(TerminalFeature));
        registry.add(Box::new(FileSearchFeature));
        registry.add(Box::new(MaximizeChatFeature));
        registry.add(Box::new(CustomizeFeature));
        registry
    }

    pub fn add(&mut self, feature: Box<dyn Feature>) {
        self.features.insert(feature.name().to_string(), feature);
    }

    pub fn execute(&self, name: &str, prompt: &str) -> Result<String> {
        let feature = self
            .features
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown feature: {}", name))?;
        info!(feature = name, "executing feature");
        feature.execute(prompt)
    }
}

/// Open a URL with the platform opener, detached from our process
fn open_url(url: &str) -> Result<()> {
    #[cfg(target_os = "macos")]
    let mut cmd = {
        let mut c = Command::new("open");
        c.arg(url);
        c
    };
    #[cfg(target_os = "windows")]
    let mut cmd = {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut cmd = {
        let mut c = Command::new("xdg-open");
        c.arg(url);
        c
    };

    cmd.spawn()?;
    Ok(())
}

/// Build the search URL for a query
fn search_url(query: &str) -> String {
    format!(
        "https://www.google.com/search?q={}",
        urlencoding::encode(query)
    )
}

/// Open the default browser on a web search for the prompt
pub struct WebSearchFeature;

impl Feature for WebSearchFeature {
    fn name(&self) -> &str {
        "web_search"
    }

    fn execute(&self, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Ok("No search query provided".into());
        }
        open_url(&search_url(prompt))?;
        Ok(format!("Searching the web for: {}", prompt))
    }
}

/// Launch a terminal in the prompt's working directory
pub struct TerminalFeature;

impl Feature for TerminalFeature {
    fn name(&self) -> &str {
        "terminal"
    }

    fn execute(&self, _prompt: &str) -> Result<String> {
        #[cfg(target_os = "macos")]
        Command::new("open").args(["-a", "Terminal", "."]).spawn()?;
        #[cfg(target_os = "windows")]
        Command::new("cmd").args(["/C", "start", "cmd"]).spawn()?;
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        Command::new("x-terminal-emulator").spawn()?;

        Ok("Terminal launched".into())
    }
}

/// Placeholder until local file search lands
pub struct FileSearchFeature;

impl Feature for FileSearchFeature {
    fn name(&self) -> &str {
        "file_search"
    }

    fn execute(&self, _prompt: &str) -> Result<String> {
        Ok("File search is not implemented yet".into())
    }
}

/// Asks the display layer to expand the chat surface
pub struct MaximizeChatFeature;

impl Feature for MaximizeChatFeature {
    fn name(&self) -> &str {
        "maximize_chat"
    }

    fn execute(&self, _prompt: &str) -> Result<String> {
        Ok(SENTINEL_MAXIMIZE.into())
    }
}

/// Asks the display layer to open the customize dialog
pub struct CustomizeFeature;

impl Feature for CustomizeFeature {
    fn name(&self) -> &str {
        "customize"
    }

    fn execute(&self, _prompt: &str) -> Result<String> {
        Ok(SENTINEL_CUSTOMIZE.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_returned_verbatim() {
        let registry = FeatureRegistry::with_defaults();
        assert_eq!(
            registry.execute("maximize_chat", "").unwrap(),
            SENTINEL_MAXIMIZE
        );
        assert_eq!(
            registry.execute("customize", "").unwrap(),
            SENTINEL_CUSTOMIZE
        );
    }

    #[test]
    fn test_unknown_feature_is_an_error() {
        let registry = FeatureRegistry::with_defaults();
        assert!(registry.execute("teleport", "").is_err());
    }

    #[test]
    fn test_web_search_rejects_empty_query() {
        let result = WebSearchFeature.execute("   ").unwrap();
        assert_eq!(result, "No search query provided");
    }

    #[test]
    fn test_search_url_escapes_the_query() {
        assert_eq!(
            search_url("what is 2+2?"),
            "https://www.google.com/search?q=what%20is%202%2B2%3F"
        );
        assert_eq!(search_url("plain"), "https://www.google.com/search?q=plain");
    }
}
