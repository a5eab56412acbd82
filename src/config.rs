use std::time::Duration;

use crate::redirect::RedirectHandlerOptions;
use crate::retry::RetryHandlerOptions;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientProfile {
    #[default]
    StandardSdk,
    LowLatency,
    BulkTransfer,
}

#[derive(Clone, Debug)]
pub struct ProfileDefaults {
    pub request_timeout: Duration,
    pub max_response_body_bytes: usize,
    pub retry_options: RetryHandlerOptions,
    pub redirect_options: RedirectHandlerOptions,
}

impl ClientProfile {
    pub fn defaults(self) -> ProfileDefaults {
        match self {
            Self::StandardSdk => ProfileDefaults {
                request_timeout: Duration::from_secs(30),
                max_response_body_bytes: 16 * 1024 * 1024,
                retry_options: RetryHandlerOptions::default(),
                redirect_options: RedirectHandlerOptions::default(),
            },
            Self::LowLatency => ProfileDefaults {
                request_timeout: Duration::from_secs(5),
                max_response_body_bytes: 4 * 1024 * 1024,
                retry_options: RetryHandlerOptions::new(1, 1).unwrap_or_default(),
                redirect_options: RedirectHandlerOptions::new(3).unwrap_or_default(),
            },
            Self::BulkTransfer => ProfileDefaults {
                request_timeout: Duration::from_secs(120),
                max_response_body_bytes: 64 * 1024 * 1024,
                retry_options: RetryHandlerOptions::new(3, 5).unwrap_or_default(),
                redirect_options: RedirectHandlerOptions::default(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_stay_within_policy_ceilings() {
        for profile in [
            ClientProfile::StandardSdk,
            ClientProfile::LowLatency,
            ClientProfile::BulkTransfer,
        ] {
            let defaults = profile.defaults();
            assert!(defaults.retry_options.max_retries() <= crate::retry::MAX_MAX_RETRIES);
            assert!(
                defaults.retry_options.delay_seconds() <= crate::retry::MAX_RETRY_DELAY_SECONDS
            );
            assert!(defaults.redirect_options.max_redirects() <= crate::redirect::MAX_MAX_REDIRECTS);
        }
    }

    #[test]
    fn low_latency_profile_tightens_limits() {
        let standard = ClientProfile::StandardSdk.defaults();
        let low_latency = ClientProfile::LowLatency.defaults();
        assert!(low_latency.request_timeout < standard.request_timeout);
        assert!(low_latency.retry_options.max_retries() < standard.retry_options.max_retries());
    }
}
