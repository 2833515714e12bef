//! Admin session tokens (§4.7): opaque bearer issued on successful password login,
//! valid for 8 hours. In-process only — there is exactly one admin, so there is no
//! reason to persist sessions across a restart.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;

struct Session {
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct AdminSessions {
    sessions: DashMap<String, Session>,
}

impl AdminSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> String {
        let token = generate_token();
        self.sessions.insert(
            token.clone(),
            Session {
                expires_at: Utc::now() + Duration::hours(8),
            },
        );
        token
    }

    /// Validates `token`, reaping it first if it has expired.
    pub fn validate(&self, token: &str) -> bool {
        let Some(session) = self.sessions.get(token) else {
            return false;
        };
        if Utc::now() > session.expires_at {
            drop(session);
            self.sessions.remove(token);
            return false;
        }
        true
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
