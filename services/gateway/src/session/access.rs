// Cached credentials and the ACL re-check / token refresh bookkeeping.
use sluice_authz::Identity;
use std::time::Duration;

#[derive(Debug)]
pub(super) struct AccessState {
    pub identity: Option<Identity>,
    // Token the current identity was derived from.
    pub token: Option<String>,
    // Token presented by UpdateToken and not yet acknowledged.
    pub refresh: Option<String>,
    pub refresh_authenticated: bool,
    pub check_in_flight: bool,
    pub first_check: bool,
    pub request_not_checked: bool,
    pub last_check_ms: u64,
}

impl AccessState {
    pub fn new(token: Option<String>) -> Self {
        Self {
            identity: None,
            token: token.filter(|token| !token.is_empty()),
            refresh: None,
            refresh_authenticated: false,
            check_in_flight: false,
            first_check: true,
            request_not_checked: false,
            last_check_ms: 0,
        }
    }

    pub fn is_active_token(&self, token: &str) -> bool {
        self.token.as_deref() == Some(token)
    }

    /// Records a refresh request; false if one is already in flight.
    pub fn begin_refresh(&mut self, token: String) -> bool {
        if self.refresh.is_some() {
            return false;
        }
        self.refresh = Some(token);
        self.refresh_authenticated = false;
        true
    }

    /// Swaps in the refreshed identity; the ack is still owed until the next ACL pass.
    pub fn refresh_verified(&mut self, identity: Identity) {
        self.identity = Some(identity);
        self.token = self.refresh.clone();
        self.refresh_authenticated = true;
    }

    pub fn refresh_acknowledged(&mut self) {
        self.refresh = None;
        self.refresh_authenticated = false;
    }

    /// Whether the wakeup timer should start an ACL re-check.
    pub fn recheck_due(&self, now_ms: u64, retry_timeout: Duration) -> bool {
        if self.check_in_flight {
            return false;
        }
        if self.refresh_authenticated {
            return true;
        }
        self.identity.is_some()
            && self.request_not_checked
            && now_ms.saturating_sub(self.last_check_ms) > retry_timeout.as_millis() as u64
    }

    pub fn start_check(&mut self, now_ms: u64) {
        self.check_in_flight = true;
        self.request_not_checked = false;
        self.last_check_ms = now_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_initial_token_counts_as_absent() {
        assert!(AccessState::new(Some(String::new())).token.is_none());
        assert!(AccessState::new(Some("t".into())).is_active_token("t"));
    }

    #[test]
    fn only_one_refresh_at_a_time() {
        let mut access = AccessState::new(Some("old".into()));
        assert!(access.begin_refresh("new".into()));
        assert!(!access.begin_refresh("newer".into()));

        access.refresh_verified(Identity::new("svc"));
        assert!(access.is_active_token("new"));
        assert!(access.refresh_authenticated);
        access.refresh_acknowledged();
        assert!(access.begin_refresh("newer".into()));
    }

    #[test]
    fn recheck_waits_for_writes_and_timeout() {
        let retry = Duration::from_secs(10);
        let mut access = AccessState::new(Some("t".into()));
        access.identity = Some(Identity::new("svc"));
        access.last_check_ms = 1_000;
        assert!(!access.recheck_due(60_000, retry));

        access.request_not_checked = true;
        assert!(!access.recheck_due(11_000, retry));
        assert!(access.recheck_due(11_001, retry));

        access.start_check(11_001);
        assert!(!access.recheck_due(99_000, retry));
        assert!(!access.request_not_checked);
    }
}
