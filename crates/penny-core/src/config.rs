use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (penny.toml + PENNY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PennyConfig {
    #[serde(default)]
    pub channel: ChannelConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub apis: ApiConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Which chat transport to run and its credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelConfig {
    /// "signal" or "discord". Empty selects whichever transport has credentials.
    #[serde(default)]
    pub kind: String,
    pub signal: Option<SignalConfig>,
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    /// The bot's own number, E.164.
    pub number: String,
    #[serde(default = "default_signal_api_url")]
    pub api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    pub channel_id: String,
}

/// LLM endpoint and the model slots it serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_api_url")]
    pub api_url: String,
    /// Fast model for user-facing replies.
    pub foreground_model: String,
    /// Model for background extraction and composition. Falls back to the
    /// foreground model when unset.
    #[serde(default)]
    pub background_model: Option<String>,
    pub vision_model: Option<String>,
    pub image_model: Option<String>,
    pub embedding_model: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between retries in seconds; doubles per attempt.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: f64,
}

impl LlmConfig {
    pub fn background_model(&self) -> &str {
        self.background_model.as_deref().unwrap_or(&self.foreground_model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// External API keys. All optional; a missing key disables the feature.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    pub search_api_key: Option<String>,
    #[serde(default = "default_search_api_url")]
    pub search_api_url: String,
    pub news_api_key: Option<String>,
    #[serde(default = "default_news_api_url")]
    pub news_api_url: String,
}

/// Interval and threshold tunables for the scheduler and agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_tick_interval")]
    pub scheduler_tick_interval_secs: f64,
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: f64,
    #[serde(default = "default_message_max_steps")]
    pub message_max_steps: usize,
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: f64,

    #[serde(default = "default_maintenance_interval")]
    pub extraction_interval_secs: f64,
    #[serde(default = "default_fact_dedup_threshold")]
    pub fact_dedup_similarity_threshold: f64,
    #[serde(default = "default_pref_link_threshold")]
    pub preference_entity_link_threshold: f64,
    #[serde(default = "default_entity_context_threshold")]
    pub entity_context_threshold: f64,

    #[serde(default = "default_enrichment_interval")]
    pub enrichment_interval_secs: f64,
    #[serde(default = "default_enrichment_cooldown")]
    pub enrichment_entity_cooldown_secs: f64,
    #[serde(default = "default_enrichment_fact_threshold")]
    pub enrichment_fact_threshold: usize,
    #[serde(default = "default_min_interest")]
    pub enrichment_min_interest_score: f64,
    #[serde(default = "default_discovery_threshold")]
    pub enrichment_discovery_similarity_threshold: f64,
    #[serde(default = "default_entity_dedup_threshold")]
    pub entity_dedup_embedding_threshold: f64,
    #[serde(default = "default_max_new_entities")]
    pub enrichment_max_new_entities: usize,
    #[serde(default = "default_half_life_days")]
    pub interest_score_half_life_days: f64,

    #[serde(default = "default_event_relevance_threshold")]
    pub event_relevance_threshold: f64,
    #[serde(default = "default_event_dedup_threshold")]
    pub event_dedup_similarity_threshold: f64,
    #[serde(default = "default_event_tcr_threshold")]
    pub event_dedup_tcr_threshold: f64,
    #[serde(default = "default_event_dedup_window")]
    pub event_dedup_window_days: i64,
    #[serde(default = "default_event_max_per_poll")]
    pub event_max_per_poll: usize,

    #[serde(default = "default_initial_backoff")]
    pub notification_initial_backoff_secs: f64,
    #[serde(default = "default_max_backoff")]
    pub notification_max_backoff_secs: f64,
    #[serde(default = "default_notification_min_length")]
    pub notification_min_length: usize,
    #[serde(default = "default_heat_cooldown_cycles")]
    pub notification_cooldown_cycles: i64,
    #[serde(default = "default_ignore_penalty")]
    pub notification_ignore_penalty: f64,

    #[serde(default = "default_research_interval")]
    pub research_interval_secs: f64,
    #[serde(default = "default_research_max_iterations")]
    pub research_max_iterations: i64,
    #[serde(default = "default_research_max_length")]
    pub research_output_max_length: usize,

    #[serde(default = "default_news_cache_ttl")]
    pub news_cache_ttl_secs: i64,
    #[serde(default = "default_news_backoff")]
    pub news_rate_limit_backoff_secs: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            scheduler_tick_interval_secs: default_tick_interval(),
            idle_seconds: default_idle_seconds(),
            message_max_steps: default_message_max_steps(),
            tool_timeout_secs: default_tool_timeout(),
            extraction_interval_secs: default_maintenance_interval(),
            fact_dedup_similarity_threshold: default_fact_dedup_threshold(),
            preference_entity_link_threshold: default_pref_link_threshold(),
            entity_context_threshold: default_entity_context_threshold(),
            enrichment_interval_secs: default_enrichment_interval(),
            enrichment_entity_cooldown_secs: default_enrichment_cooldown(),
            enrichment_fact_threshold: default_enrichment_fact_threshold(),
            enrichment_min_interest_score: default_min_interest(),
            enrichment_discovery_similarity_threshold: default_discovery_threshold(),
            entity_dedup_embedding_threshold: default_entity_dedup_threshold(),
            enrichment_max_new_entities: default_max_new_entities(),
            interest_score_half_life_days: default_half_life_days(),
            event_relevance_threshold: default_event_relevance_threshold(),
            event_dedup_similarity_threshold: default_event_dedup_threshold(),
            event_dedup_tcr_threshold: default_event_tcr_threshold(),
            event_dedup_window_days: default_event_dedup_window(),
            event_max_per_poll: default_event_max_per_poll(),
            notification_initial_backoff_secs: default_initial_backoff(),
            notification_max_backoff_secs: default_max_backoff(),
            notification_min_length: default_notification_min_length(),
            notification_cooldown_cycles: default_heat_cooldown_cycles(),
            notification_ignore_penalty: default_ignore_penalty(),
            research_interval_secs: default_research_interval(),
            research_max_iterations: default_research_max_iterations(),
            research_output_max_length: default_research_max_length(),
            news_cache_ttl_secs: default_news_cache_ttl(),
            news_rate_limit_backoff_secs: default_news_backoff(),
        }
    }
}

fn default_signal_api_url() -> String {
    "http://localhost:8080".to_string()
}
fn default_llm_api_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_search_api_url() -> String {
    "https://api.perplexity.ai".to_string()
}
fn default_news_api_url() -> String {
    "https://newsapi.org".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.penny/penny.db")
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay() -> f64 {
    0.5
}
fn default_tick_interval() -> f64 {
    1.0
}
fn default_idle_seconds() -> f64 {
    300.0
}
fn default_message_max_steps() -> usize {
    5
}
fn default_tool_timeout() -> f64 {
    60.0
}
fn default_maintenance_interval() -> f64 {
    300.0
}
fn default_fact_dedup_threshold() -> f64 {
    0.85
}
fn default_pref_link_threshold() -> f64 {
    0.6
}
fn default_entity_context_threshold() -> f64 {
    0.55
}
fn default_enrichment_interval() -> f64 {
    600.0
}
fn default_enrichment_cooldown() -> f64 {
    86_400.0
}
fn default_enrichment_fact_threshold() -> usize {
    8
}
fn default_min_interest() -> f64 {
    0.1
}
fn default_discovery_threshold() -> f64 {
    0.5
}
fn default_entity_dedup_threshold() -> f64 {
    0.9
}
fn default_max_new_entities() -> usize {
    3
}
fn default_half_life_days() -> f64 {
    7.0
}
fn default_event_relevance_threshold() -> f64 {
    0.45
}
fn default_event_dedup_threshold() -> f64 {
    0.85
}
fn default_event_tcr_threshold() -> f64 {
    0.6
}
fn default_event_dedup_window() -> i64 {
    7
}
fn default_event_max_per_poll() -> usize {
    5
}
fn default_initial_backoff() -> f64 {
    3600.0
}
fn default_max_backoff() -> f64 {
    86_400.0
}
fn default_notification_min_length() -> usize {
    20
}
fn default_heat_cooldown_cycles() -> i64 {
    3
}
fn default_ignore_penalty() -> f64 {
    0.5
}
fn default_research_interval() -> f64 {
    5.0
}
fn default_research_max_iterations() -> i64 {
    10
}
fn default_research_max_length() -> usize {
    2000
}
fn default_news_cache_ttl() -> i64 {
    3600
}
fn default_news_backoff() -> i64 {
    43_200 // 12 hours
}

impl PennyConfig {
    /// Load config from a TOML file with PENNY_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: PennyConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("PENNY_").split("_"))
            .extract()
            .map_err(|e| crate::error::PennyError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.penny/penny.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_defaults_populate() {
        let rt = RuntimeConfig::default();
        assert_eq!(rt.message_max_steps, 5);
        assert_eq!(rt.news_rate_limit_backoff_secs, 43_200);
        assert!((rt.fact_dedup_similarity_threshold - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn background_model_falls_back_to_foreground() {
        let llm = LlmConfig {
            api_url: default_llm_api_url(),
            foreground_model: "small".into(),
            background_model: None,
            vision_model: None,
            image_model: None,
            embedding_model: None,
            max_retries: 3,
            retry_delay_secs: 0.5,
        };
        assert_eq!(llm.background_model(), "small");
    }
}
