//! Deepgram speech synthesis client.

use super::SpeechSynthesizer;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;
use vox_common::{Error, Result, SpeechConfig};

const SPEAK_URL: &str = "https://api.deepgram.com/v1/speak";

/// Synthesizer backed by Deepgram's REST API.
///
/// Requests are batch, one per sentence. Audio comes back as raw PCM
/// with no container framing, ready to forward in transport-sized chunks.
pub struct DeepgramTts {
    client: Client,
    endpoint: String,
    api_key: String,
    config: SpeechConfig,
}

impl DeepgramTts {
    pub fn new(config: &SpeechConfig, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            endpoint: SPEAK_URL.into(),
            api_key: api_key.into(),
            config: config.clone(),
        }
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn speak_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Tts(format!("Invalid endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("model", &self.config.tts_voice)
            .append_pair("encoding", &self.config.output_encoding)
            .append_pair("sample_rate", &self.config.output_sample_rate.to_string())
            .append_pair("container", "none");
        Ok(url)
    }
}

#[async_trait]
impl SpeechSynthesizer for DeepgramTts {
    fn name(&self) -> &str {
        "deepgram"
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if text.trim().is_empty() {
            return Err(Error::Tts("Empty text provided".into()));
        }

        let response = self
            .client
            .post(self.speak_url()?)
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&SpeakRequest { text })
            .send()
            .await
            .map_err(|e| Error::Tts(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("API error ({status}): {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Tts(format!("Failed to read audio: {e}")))?;
        tracing::debug!(bytes = audio.len(), "Synthesized audio");
        Ok(audio.to_vec())
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn speak_url_carries_voice_options() {
        let synthesizer = DeepgramTts::new(&SpeechConfig::default(), "key");
        let url = synthesizer.speak_url().unwrap();
        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(params["model"], "aura-asteria-en");
        assert_eq!(params["encoding"], "linear16");
        assert_eq!(params["sample_rate"], "24000");
        assert_eq!(params["container"], "none");
    }

    #[tokio::test]
    async fn synthesizes_text_to_audio() {
        let server = MockServer::start().await;
        let audio = vec![0_u8, 1, 2, 3, 4, 5, 6, 7];
        Mock::given(method("POST"))
            .and(path("/v1/speak"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(audio.clone()))
            .mount(&server)
            .await;

        let synthesizer = DeepgramTts::new(&SpeechConfig::default(), "test-key")
            .with_endpoint(format!("{}/v1/speak", server.uri()));
        let result = synthesizer.synthesize("Hello there.").await.unwrap();
        assert_eq!(result, audio);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0]
                .headers
                .get("authorization")
                .unwrap()
                .to_str()
                .unwrap(),
            "Token test-key"
        );

        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["text"], "Hello there.");

        let params: HashMap<_, _> = requests[0].url.query_pairs().into_owned().collect();
        assert_eq!(params["model"], "aura-asteria-en");
    }

    #[tokio::test]
    async fn surfaces_api_errors_with_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/speak"))
            .respond_with(ResponseTemplate::new(400).set_body_string("unsupported voice"))
            .mount(&server)
            .await;

        let synthesizer = DeepgramTts::new(&SpeechConfig::default(), "test-key")
            .with_endpoint(format!("{}/v1/speak", server.uri()));
        let error = synthesizer.synthesize("Hello.").await.unwrap_err();

        let message = error.to_string();
        assert!(message.contains("400"), "unexpected error: {message}");
        assert!(message.contains("unsupported voice"));
    }

    #[tokio::test]
    async fn empty_text_is_an_error() {
        let synthesizer = DeepgramTts::new(&SpeechConfig::default(), "key");
        assert!(matches!(
            synthesizer.synthesize("   ").await,
            Err(Error::Tts(_))
        ));
    }
}
