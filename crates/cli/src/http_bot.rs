// HTTP probe bot
//
// Requests a URL built from the data line and classifies the response by
// status code and body content.

use std::time::Duration;

use async_trait::async_trait;
use multirun_engine::{BotContext, BotError, BotOutcome, BotResult, BotRunner, Proxy};
use tracing::debug;
use url::Url;

/// Placeholder replaced by the URL-encoded data line
pub const INPUT_PLACEHOLDER: &str = "<input>";

#[derive(Debug, thiserror::Error)]
pub enum ProbeConfigError {
    #[error("url template must contain {INPUT_PLACEHOLDER}")]
    MissingPlaceholder,

    #[error("invalid url template: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("invalid custom rule '{0}', expected NAME=substring")]
    InvalidCustomRule(String),

    #[error("failed to build http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// A custom outcome assigned when the body contains `needle`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomRule {
    pub name: String,
    pub needle: String,
}

impl std::str::FromStr for CustomRule {
    type Err = ProbeConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((name, needle)) if !name.trim().is_empty() && !needle.is_empty() => Ok(Self {
                name: name.trim().to_string(),
                needle: needle.to_string(),
            }),
            _ => Err(ProbeConfigError::InvalidCustomRule(s.to_string())),
        }
    }
}

/// Bot that checks one line with one HTTP GET
#[derive(Debug, Clone)]
pub struct HttpProbeBot {
    template: String,
    success: Vec<String>,
    custom: Vec<CustomRule>,
    ban_statuses: Vec<u16>,
    timeout: Duration,
    direct: reqwest::Client,
}

impl HttpProbeBot {
    pub fn new(template: impl Into<String>, timeout: Duration) -> Result<Self, ProbeConfigError> {
        let template = template.into();
        if !template.contains(INPUT_PLACEHOLDER) {
            return Err(ProbeConfigError::MissingPlaceholder);
        }
        Url::parse(&template.replace(INPUT_PLACEHOLDER, "probe"))?;

        Ok(Self {
            template,
            success: Vec::new(),
            custom: Vec::new(),
            ban_statuses: vec![403, 429],
            timeout,
            direct: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn with_success(mut self, needles: Vec<String>) -> Self {
        self.success = needles;
        self
    }

    pub fn with_custom(mut self, rules: Vec<CustomRule>) -> Self {
        self.custom = rules;
        self
    }

    pub fn with_ban_statuses(mut self, statuses: Vec<u16>) -> Self {
        self.ban_statuses = statuses;
        self
    }

    /// The request URL for `line`
    pub fn url_for(&self, line: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(line.as_bytes()).collect();
        self.template.replace(INPUT_PLACEHOLDER, &encoded)
    }

    fn client_for(&self, proxy: Option<&Proxy>) -> Result<reqwest::Client, BotError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };
        let proxy = reqwest::Proxy::all(proxy.url())
            .map_err(|e| BotError::Other(format!("unusable proxy {proxy}: {e}")))?;
        reqwest::Client::builder()
            .timeout(self.timeout)
            .proxy(proxy)
            .build()
            .map_err(|e| BotError::Other(e.to_string()))
    }

    /// Classify a completed response
    pub fn classify(&self, status: u16, body: &str) -> BotResult {
        let outcome = if self.ban_statuses.contains(&status) {
            BotOutcome::Ban
        } else if self.success.iter().any(|needle| body.contains(needle.as_str())) {
            BotOutcome::Success
        } else if let Some(rule) = self.custom.iter().find(|r| body.contains(r.needle.as_str())) {
            BotOutcome::Custom(rule.name.clone())
        } else if status >= 500 {
            BotOutcome::Retry
        } else {
            BotOutcome::Fail
        };

        BotResult::new(outcome).with_capture("status", status.to_string())
    }

    async fn request(&self, client: &reqwest::Client, url: &str) -> Result<(u16, String), reqwest::Error> {
        let response = client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

#[async_trait]
impl BotRunner for HttpProbeBot {
    async fn run(
        &self,
        line: &str,
        proxy: Option<&Proxy>,
        ctx: &BotContext,
    ) -> Result<BotResult, BotError> {
        let client = self.client_for(proxy)?;
        let url = self.url_for(line);

        let response = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(BotError::Cancelled),
            response = self.request(&client, &url) => response,
        };

        match response {
            Ok((status, body)) => Ok(self.classify(status, &body)),
            // A proxy that cannot carry the request is treated as banned so
            // the line moves on to another proxy.
            Err(e) if proxy.is_some() => {
                debug!(error = %e, attempt = ctx.attempt, "Proxied request failed");
                Ok(BotResult::ban())
            }
            Err(e) => Err(BotError::Network(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multirun_engine::JobId;
    use tokio_util::sync::CancellationToken;

    fn cancelled_context() -> BotContext {
        let token = CancellationToken::new();
        token.cancel();
        BotContext::new(JobId::now_v7(), 1, token)
    }

    fn bot() -> HttpProbeBot {
        HttpProbeBot::new("http://127.0.0.1:9/check?user=<input>", Duration::from_secs(1))
            .unwrap()
            .with_success(vec!["Welcome".into()])
            .with_custom(vec!["2FA=verification code".parse().unwrap()])
    }

    #[test]
    fn test_template_requires_placeholder() {
        assert!(matches!(
            HttpProbeBot::new("http://example.com/", Duration::from_secs(1)),
            Err(ProbeConfigError::MissingPlaceholder)
        ));
        assert!(HttpProbeBot::new("not a url <input>", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_url_encodes_line() {
        assert_eq!(
            bot().url_for("a b&c"),
            "http://127.0.0.1:9/check?user=a+b%26c"
        );
    }

    #[test]
    fn test_classify() {
        let bot = bot();
        assert_eq!(bot.classify(403, "Welcome").outcome, BotOutcome::Ban);
        assert_eq!(bot.classify(200, "Welcome back").outcome, BotOutcome::Success);
        assert_eq!(
            bot.classify(200, "enter the verification code").outcome,
            BotOutcome::Custom("2FA".into())
        );
        assert_eq!(bot.classify(502, "").outcome, BotOutcome::Retry);
        assert_eq!(bot.classify(200, "wrong password").outcome, BotOutcome::Fail);
        assert_eq!(bot.classify(200, "").captured["status"], "200");
    }

    #[test]
    fn test_custom_rule_parsing() {
        let rule: CustomRule = "FREE=free plan".parse().unwrap();
        assert_eq!(rule.name, "FREE");
        assert_eq!(rule.needle, "free plan");
        assert!("nameless".parse::<CustomRule>().is_err());
        assert!("=needle".parse::<CustomRule>().is_err());
    }

    #[test]
    fn test_cancelled_before_request() {
        let bot = bot();
        let ctx = cancelled_context();
        let result = tokio_test::block_on(bot.run("alice", None, &ctx));
        assert!(matches!(result, Err(BotError::Cancelled)));
    }
}
