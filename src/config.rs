use std::time::Duration;

/// Everything a session reads once at connect time.
///
/// The settings source (persona text, voice identity) feeds this struct;
/// live changes mid-session are not observed.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Persona/style text for the system instruction.
    pub persona: String,
    /// Prebuilt voice identity for synthesized speech.
    pub voice: String,
    /// Negotiated rate for outbound audio after resampling.
    pub input_rate: u32,
    /// Fixed rate of inbound synthesized speech.
    pub output_rate: u32,
    /// Window in which a repeated finalized user utterance is treated as a
    /// duplicate "turn complete" signal and suppressed. Heuristic, hence
    /// configurable.
    pub dedup_window: Duration,
    /// Cadence of the camera frame sampler while video is toggled on.
    pub video_interval: Duration,
    pub transcribe_input: bool,
    pub transcribe_output: bool,
}

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";
pub const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-live-001";

const DEFAULT_PERSONA: &str = "You are Jam Buster, a calm and practical Dhaka traffic advisor. \
You speak briefly and concretely about routes, congestion and timing. \
When the caller asks how to get somewhere, call the show_map tool with the \
origin and destination so the route can be displayed.";

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            persona: DEFAULT_PERSONA.to_string(),
            voice: "Puck".to_string(),
            input_rate: 16_000,
            output_rate: 24_000,
            dedup_window: Duration::from_secs(2),
            video_interval: Duration::from_millis(500),
            transcribe_input: true,
            transcribe_output: true,
        }
    }
}

impl SessionConfig {
    /// Binary entry point: key from the environment, optional overrides.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| anyhow::anyhow!("GEMINI_API_KEY is not set"))?;

        let mut config = Self {
            api_key,
            ..Self::default()
        };
        if let Ok(model) = std::env::var("JAMBUSTER_MODEL") {
            config.model = model;
        }
        if let Ok(voice) = std::env::var("JAMBUSTER_VOICE") {
            config.voice = voice;
        }
        if let Ok(persona) = std::env::var("JAMBUSTER_PERSONA") {
            config.persona = persona;
        }
        Ok(config)
    }
}
