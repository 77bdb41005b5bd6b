use std::time::Duration;

use secrecy::SecretString;

use crate::consts;

/// Session configuration. Defaults come from the environment where a value
/// is deployment-specific (endpoint, token) and from `consts` otherwise.
#[derive(Clone)]
pub struct Config {
    endpoint: String,
    auth_token: SecretString,
    connect_timeout: Duration,
    grace_delay: Duration,
    greeting: String,
    language: String,
    voice: Option<String>,
    input_device: Option<String>,
    output_device: Option<String>,
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.config.endpoint = endpoint.to_string();
        self
    }

    pub fn with_auth_token(mut self, auth_token: &str) -> Self {
        self.config.auth_token = SecretString::from(auth_token.to_string());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    pub fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.config.grace_delay = delay;
        self
    }

    pub fn with_greeting(mut self, greeting: &str) -> Self {
        self.config.greeting = greeting.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.config.language = language.to_string();
        self
    }

    pub fn with_voice(mut self, voice: &str) -> Self {
        self.config.voice = Some(voice.to_string());
        self
    }

    pub fn with_input_device(mut self, name: &str) -> Self {
        self.config.input_device = Some(name.to_string());
        self
    }

    pub fn with_output_device(mut self, name: &str) -> Self {
        self.config.output_device = Some(name.to_string());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            endpoint: std::env::var(consts::VOICELINK_ENDPOINT)
                .unwrap_or_else(|_| consts::DEFAULT_ENDPOINT.to_string()),
            auth_token: std::env::var(consts::VOICELINK_TOKEN)
                .unwrap_or_else(|_| "".to_string())
                .into(),
            connect_timeout: Duration::from_millis(consts::DEFAULT_CONNECT_TIMEOUT_MS),
            grace_delay: Duration::from_millis(consts::DEFAULT_GRACE_DELAY_MS),
            greeting: consts::DEFAULT_GREETING.to_string(),
            language: consts::DEFAULT_LANGUAGE.to_string(),
            voice: None,
            input_device: None,
            output_device: None,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn auth_token(&self) -> &SecretString {
        &self.auth_token
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    pub fn grace_delay(&self) -> Duration {
        self.grace_delay
    }

    pub fn greeting(&self) -> &str {
        &self.greeting
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    pub fn input_device(&self) -> Option<String> {
        self.input_device.clone()
    }

    pub fn output_device(&self) -> Option<String> {
        self.output_device.clone()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
