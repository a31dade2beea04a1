use crate::error::{AppError, Result};
use crate::extract::{self, Metric};
use crate::portal::PortalClient;
use crate::reading::Reading;
use reqwest::Client;
use tracing::{debug, warn};

/// Runs one login → fetch → extract → assemble cycle.
pub struct Scraper {
    portal: PortalClient,
    http: Client,
}

impl Scraper {
    pub fn new(portal: PortalClient) -> Result<Self> {
        let http = portal.http_client()?;
        Ok(Self { portal, http })
    }

    /// Produce a fresh Reading; `previous` supplies the lifetime meter when
    /// the portal omits it for this cycle.
    pub async fn run_cycle(&self, previous: &Reading) -> Result<Reading> {
        let session = self.portal.acquire_session().await?;
        debug!(data_url = %redact_token(&session.data_url, &session.token), "session acquired");

        let resp = self
            .http
            .get(&session.data_url)
            .send()
            .await
            .map_err(|e| AppError::Transport(format!("data resource: {e}")))?;
        if !resp.status().is_success() {
            return Err(AppError::Transport(format!(
                "data resource returned {}",
                resp.status()
            )));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| AppError::Transport(format!("data resource body: {e}")))?;

        Ok(assemble(&body, previous, chrono::Utc::now().timestamp()))
    }
}

/// `url` with the session token masked, for logging.
fn redact_token(url: &str, token: &str) -> String {
    url.replace(token, "***")
}

/// Build a Reading from data resource markup.
pub fn assemble(body: &str, previous: &Reading, now: i64) -> Reading {
    let value = |metric: Metric| {
        let v = extract::extract(body, metric);
        if v.is_empty() {
            let gap = AppError::ExtractionGap(metric.marker().to_string());
            warn!(metric = %metric, error = %gap, "metric missing from data resource");
        }
        v
    };

    let instant_power = value(Metric::InstantPower);
    let mut life_meter = value(Metric::LifeMeter);
    if life_meter.is_empty() {
        life_meter = previous.life_meter.clone();
    }

    Reading {
        instant_power,
        life_meter,
        trees_saved: value(Metric::TreesSaved),
        oil_offset: value(Metric::OilOffset),
        co2_offset: value(Metric::Co2Offset),
        last_update: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BODY: &str = r#"
        <div class="lifetimeMeter">15,482.7</div>
        <span class="instantValue">Offline</span>
        <span class="benefitValue1">42</span>
        <span class="benefitValue2">1,120</span>
        <span class="benefitValue3">3.1</span>
    "#;

    #[test]
    fn test_assemble_full_body() {
        let reading = assemble(BODY, &Reading::default(), 1_700_000_000);
        assert_eq!(
            reading,
            Reading {
                instant_power: "0".into(),
                life_meter: "15482.7".into(),
                trees_saved: "42".into(),
                oil_offset: "1120".into(),
                co2_offset: "3.1".into(),
                last_update: 1_700_000_000,
            }
        );
    }

    #[test]
    fn test_logged_url_hides_session_token() {
        let url = "https://portal/comet/tok123/abc123?k=v&_=5";
        let logged = redact_token(url, "tok123");
        assert_eq!(logged, "https://portal/comet/***/abc123?k=v&_=5");
        assert!(!logged.contains("tok123"));
    }

    #[test]
    fn test_missing_life_meter_carries_previous_value() {
        let previous = Reading {
            life_meter: "15000".into(),
            trees_saved: "40".into(),
            ..Default::default()
        };
        let body = r#"<span class="instantValue">2.5</span>"#;
        let reading = assemble(body, &previous, 5);
        assert_eq!(reading.life_meter, "15000");
        assert_eq!(reading.instant_power, "2.5");
        // Only the lifetime meter is carried forward.
        assert_eq!(reading.trees_saved, "");
        assert_eq!(reading.last_update, 5);
    }
}
