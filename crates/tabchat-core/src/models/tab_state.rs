use super::message::Message;

/// Browser tab identifier as handed out by the host.
pub type TabId = i64;

/// Where a tab currently points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TabLocation {
    pub url: String,
    pub host: String,
}

impl TabLocation {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let host = host_of(&url);
        Self { url, host }
    }
}

/// Host component (`name[:port]`) of a URL, or an empty string.
fn host_of(url: &str) -> String {
    let rest = match url.split_once("://") {
        Some((_, rest)) => rest,
        None => return String::new(),
    };
    let authority = rest
        .split(|c| matches!(c, '/' | '?' | '#'))
        .next()
        .unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    host.to_ascii_lowercase()
}

/// Ephemeral conversation scoped to one browser tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabState {
    pub tab_id: TabId,
    pub messages: Vec<Message>,
    /// Global conversation this tab was adopted into or projected from.
    pub conversation_id: Option<String>,
    pub url: String,
    pub host: String,
}

impl TabState {
    pub fn new(tab_id: TabId, location: &TabLocation) -> Self {
        Self {
            tab_id,
            messages: Vec::new(),
            conversation_id: None,
            url: location.url.clone(),
            host: location.host.clone(),
        }
    }

    pub fn location(&self) -> TabLocation {
        TabLocation {
            url: self.url.clone(),
            host: self.host.clone(),
        }
    }

    pub fn matches(&self, location: &TabLocation) -> bool {
        self.url == location.url && self.host == location.host
    }

    /// Forget everything learned on the previous page and move to `location`.
    pub(crate) fn reset_to(&mut self, location: &TabLocation) {
        self.messages.clear();
        self.conversation_id = None;
        self.url = location.url.clone();
        self.host = location.host.clone();
    }
}

/// Input to the navigation watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationSignal {
    Navigated { tab_id: TabId, location: TabLocation },
    Closed { tab_id: TabId },
}

/// Passed to per-tab navigation callbacks after a stale tab was cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabNavigation {
    pub tab_id: TabId,
    pub from: TabLocation,
    pub to: TabLocation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_extraction() {
        assert_eq!(TabLocation::new("https://Example.com/a?b#c").host, "example.com");
        assert_eq!(TabLocation::new("http://user:pw@localhost:8080/x").host, "localhost:8080");
        assert_eq!(TabLocation::new("about:blank").host, "");
    }

    #[test]
    fn test_reset_clears_messages_and_link() {
        let a = TabLocation::new("https://a.test/page");
        let b = TabLocation::new("https://b.test/other");
        let mut state = TabState::new(3, &a);
        state.messages.push(Message::user("hi", None));
        state.conversation_id = Some("conv".into());

        assert!(state.matches(&a));
        assert!(!state.matches(&b));

        state.reset_to(&b);

        assert!(state.messages.is_empty());
        assert_eq!(state.conversation_id, None);
        assert_eq!(state.location(), b);
    }
}
