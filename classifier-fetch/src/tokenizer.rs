//! HTTP client for the tokenizer service: posts an entry's verbatim
//! atom XML and parses back a token/frequency listing.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;
use tracing::warn;

use classifier_core::FetchError;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};

/// A single (token string, frequency) pair from the tokenizer's
/// response, not yet atomized into a dictionary id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFeature {
    pub token: String,
    pub frequency: u32,
}

pub struct TokenizerClient {
    http: Client,
    base_url: String,
    breaker: CircuitBreaker,
}

impl TokenizerClient {
    pub fn new(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::default()),
        }
    }

    pub async fn tokenize(&self, atom_xml: &str) -> Result<Vec<RawFeature>, FetchError> {
        if !self.breaker.is_allowed() {
            return Err(FetchError::Transport {
                url: self.base_url.clone(),
                reason: "circuit open".into(),
            });
        }

        let result = self.send(atom_xml).await;
        match &result {
            Ok(_) => self.breaker.record_success(),
            Err(_) => self.breaker.record_failure(),
        }
        result
    }

    async fn send(&self, atom_xml: &str) -> Result<Vec<RawFeature>, FetchError> {
        let response = self
            .http
            .post(&self.base_url)
            .header("Content-Type", "application/atom+xml")
            .body(atom_xml.to_string())
            .send()
            .await
            .map_err(|e| FetchError::Transport {
                url: self.base_url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::BadStatus {
                url: self.base_url.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Transport {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        parse_features(&body).map_err(|reason| FetchError::InvalidResponse {
            url: self.base_url.clone(),
            reason,
        })
    }
}

/// Parses a `<pw:item><pw:feature key="..." value="..."/>...</pw:item>`
/// document. Features whose `value` does not parse as a non-negative
/// integer are dropped with a warning rather than failing the whole
/// response.
fn parse_features(xml: &str) -> Result<Vec<RawFeature>, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut features = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) => {
                if local_name(e.name().as_ref()) != "feature" {
                    continue;
                }
                let mut key = None;
                let mut value = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"key" => {
                            key = Some(
                                attr.decode_and_unescape_value(reader.decoder())
                                    .map_err(|e| e.to_string())?
                                    .into_owned(),
                            )
                        }
                        b"value" => {
                            value = Some(
                                attr.decode_and_unescape_value(reader.decoder())
                                    .map_err(|e| e.to_string())?
                                    .into_owned(),
                            )
                        }
                        _ => {}
                    }
                }
                match (key, value) {
                    (Some(token), Some(raw)) => match raw.parse::<u32>() {
                        Ok(frequency) => features.push(RawFeature { token, frequency }),
                        Err(_) => warn!(value = %raw, "tokenizer returned non-numeric feature value"),
                    },
                    _ => warn!("tokenizer feature element missing key or value"),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }

    Ok(features)
}

fn local_name(qname: &[u8]) -> &str {
    let full = std::str::from_utf8(qname).unwrap_or("");
    full.rsplit(':').next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaced_features() {
        let xml = r#"<pw:item xmlns:pw="http://peerworks.org/classifier">
            <pw:id>http://example.com/1</pw:id>
            <pw:feature key="hello" value="3"/>
            <pw:feature key="world" value="1"/>
        </pw:item>"#;
        let features = parse_features(xml).unwrap();
        assert_eq!(
            features,
            vec![
                RawFeature { token: "hello".into(), frequency: 3 },
                RawFeature { token: "world".into(), frequency: 1 },
            ]
        );
    }

    #[test]
    fn drops_feature_with_non_numeric_value() {
        let xml = r#"<pw:item xmlns:pw="http://peerworks.org/classifier">
            <pw:feature key="ok" value="2"/>
            <pw:feature key="bad" value="not-a-number"/>
        </pw:item>"#;
        let features = parse_features(xml).unwrap();
        assert_eq!(features, vec![RawFeature { token: "ok".into(), frequency: 2 }]);
    }

    #[test]
    fn empty_item_yields_no_features() {
        let xml = r#"<pw:item xmlns:pw="http://peerworks.org/classifier"><pw:id>x</pw:id></pw:item>"#;
        assert_eq!(parse_features(xml).unwrap(), vec![]);
    }
}
