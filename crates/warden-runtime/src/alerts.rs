use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{debug, warn};

use warden_types::AlertEvent;

use crate::config::AlertConfig;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the HMAC-SHA256 signature of the webhook body.
pub const SIGNATURE_HEADER: &str = "X-Warden-Signature";

const DEDUP_TTL_MINUTES: i64 = 5;
const DEDUP_CAP: usize = 1024;

/// Deduplicated, best-effort alert fan-out. Runs on a worker thread; a
/// failing sender is logged and never surfaces to the evaluation path.
pub struct AlertDispatcher {
    config: AlertConfig,
    dedup: Mutex<HashMap<(String, String, String), DateTime<Utc>>>,
    sent: Mutex<u64>,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            dedup: Mutex::new(HashMap::new()),
            sent: Mutex::new(0),
        }
    }

    /// Whether this alert should be sent, updating the dedup window.
    pub fn should_send(&self, alert: &AlertEvent) -> bool {
        let key = alert.dedup_key();
        let now = Utc::now();
        let ttl = Duration::minutes(DEDUP_TTL_MINUTES);

        let mut dedup = self.dedup.lock();
        dedup.retain(|_, last| now - *last < ttl);
        // Bounded map: drop the stalest entry rather than growing.
        if dedup.len() >= DEDUP_CAP {
            if let Some(oldest) = dedup
                .iter()
                .min_by_key(|(_, last)| **last)
                .map(|(key, _)| key.clone())
            {
                dedup.remove(&oldest);
            }
        }

        match dedup.get(&key) {
            Some(_) => false,
            None => {
                dedup.insert(key, now);
                true
            }
        }
    }

    /// Send to every configured channel. Fire-and-forget semantics.
    pub fn dispatch(&self, alert: &AlertEvent) {
        if !self.should_send(alert) {
            debug!(alert_type = %alert.alert_type, "alert deduplicated");
            return;
        }

        let Ok(body) = serde_json::to_string(alert) else {
            warn!("alert not serializable, dropped");
            return;
        };

        if let Some(url) = &self.config.webhook_url {
            self.post_webhook(url, &body);
        }
        if let Some(url) = &self.config.chat_webhook_url {
            self.post_chat(url, alert);
        }
        *self.sent.lock() += 1;
    }

    pub fn sent_count(&self) -> u64 {
        *self.sent.lock()
    }

    fn post_webhook(&self, url: &str, body: &str) {
        let client = match reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                warn!(error = %err, "webhook client build failed");
                return;
            }
        };

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .body(body.to_string());
        if let Some(secret) = &self.config.webhook_secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, body));
        }

        match request.send() {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(status = %response.status(), "webhook alert rejected")
            }
            Err(err) => warn!(error = %err, "webhook alert failed"),
        }
    }

    fn post_chat(&self, url: &str, alert: &AlertEvent) {
        let text = format!(
            "[{}] {} - {} (agent {}, session {})",
            alert.severity.as_str().to_uppercase(),
            alert.title,
            alert.message,
            alert.agent_id,
            alert.session_id,
        );
        let payload = serde_json::json!({ "text": text });

        let client = match reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
        {
            Ok(client) => client,
            Err(_) => return,
        };
        if let Err(err) = client.post(url).json(&payload).send() {
            warn!(error = %err, "chat alert failed");
        }
    }
}

/// Hex HMAC-SHA256 of the payload under the shared secret.
pub fn sign_payload(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
