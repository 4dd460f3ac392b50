//! Reference schema for the ControlUnit service.

use crate::observability::logging::LogLevelKeys;
use crate::schema::coerce::{CoercionTable, Rule};
use crate::schema::mapping::{KeyMapping, MappingError};
use crate::schema::Schema;

/// Root key used when none is configured.
pub const DEFAULT_ROOT: &str = "/APPS/ControlUnit";

/// `(store key suffix, logical name, environment variable)`.
const ENTRIES: &[(&str, &str, &str)] = &[
    ("CategorizationApiUrl", "categorization_api_url", "CATEGORIZATION_API_URL"),
    ("CategorizationApiToken", "categorization_api_token", "CATEGORIZATION_API_TOKEN"),
    ("RecommendationApiUrl", "recommendation_api_url", "RECOMMENDATION_API_URL"),
    ("RecommendationApiToken", "recommendation_api_token", "RECOMMENDATION_API_TOKEN"),
    ("CspMessage", "csp_message", "CSP_MESSAGE"),
    ("CspMessageClosed", "csp_message_closed", "CSP_MESSAGE_CLOSED"),
    ("CspMessageSpam", "csp_message_spam", "CSP_MESSAGE_SPAM"),
    ("SpamCount", "spam_count", "SPAM_COUNT"),
    ("LogLevel", "log_level", "LOG_LEVEL"),
    ("LogSqlLevel", "log_sql_level", "LOG_SQL_LEVEL"),
    ("LogSqlEcho", "log_sql_echo", "LOG_SQL_ECHO"),
    ("ClosedStatuses", "closed_statuses", "CLOSED_STATUSES"),
    ("OpenStatuses", "open_statuses", "OPEN_STATUSES"),
    ("PostgresDsn", "postgres_dsn", "POSTGRES_DSN"),
    ("username", "basic_auth_username", "BASIC_AUTH_USERNAME"),
    ("password", "basic_auth_password", "BASIC_AUTH_PASSWORD"),
    ("DiscordBotUrl", "discord_bot_url", "DISCORD_BOT_URL"),
    ("DiscordBotApiUsername", "discord_bot_api_username", "DISCORD_BOT_API_USERNAME"),
    ("DiscordBotApiPassword", "discord_bot_api_password", "DISCORD_BOT_API_PASSWORD"),
    ("CollieSensitiveUrl", "collie_sensitive_url", "COLLIE_SENSITIVE_URL"),
    ("ColliePassword", "collie_password", "COLLIE_PASSWORD"),
    ("CleanJobFrequencyPerDay", "clean_job_frequency_per_day", "CLEAN_JOB_FREQUENCY_PER_DAY"),
    (
        "CleanJobHoursSinceLastTimeUpdated",
        "clean_job_hours_since_last_time_updated",
        "CLEAN_JOB_HOURS_SINCE_LAST_TIME_UPDATED",
    ),
    ("CleanupApiBaseUrl", "cleanup_api_base_url", "CLEANUP_API_BASE_URL"),
    ("CleanupSource", "cleanup_source", "CLEANUP_SOURCE"),
    ("CleanupStart", "cleanup_start", "CLEANUP_START"),
    ("UseFakeExternalsDiscord", "use_fake_externals_discord", "USE_FAKE_EXTERNALS_DISCORD"),
    ("UseFakeExternalsAi", "use_fake_externals_ai", "USE_FAKE_EXTERNALS_AI"),
    ("AiCategorizationDebug", "ai_categorization_debug", "AI_CATEGORIZATION_DEBUG"),
    ("AiRecommendationDebug", "ai_recommendation_debug", "AI_RECOMMENDATION_DEBUG"),
    ("AiHttpTimeoutSeconds", "ai_http_timeout_seconds", "AI_HTTP_TIMEOUT_SECONDS"),
    ("AiHttpMaxConnections", "ai_http_max_connections", "AI_HTTP_MAX_CONNECTIONS"),
    (
        "AiHttpMaxKeepaliveConnections",
        "ai_http_max_keepalive_connections",
        "AI_HTTP_MAX_KEEPALIVE_CONNECTIONS",
    ),
];

const BOOL_NAMES: &[&str] = &[
    "log_sql_echo",
    "use_fake_externals_discord",
    "use_fake_externals_ai",
    "cleanup_start",
    "ai_categorization_debug",
    "ai_recommendation_debug",
];

/// Build the ControlUnit key tables under `root` (or [`DEFAULT_ROOT`]).
pub fn control_unit_mapping(root: Option<&str>, dev: bool) -> Result<KeyMapping, MappingError> {
    let prefix = KeyMapping::prefix_for(root, DEFAULT_ROOT, dev);
    ENTRIES
        .iter()
        .fold(KeyMapping::builder(prefix), |builder, (suffix, name, var)| {
            builder.key(suffix, *name).env(*name, *var)
        })
        .build()
}

/// Coercion rules for the ControlUnit tables.
pub fn control_unit_coercion() -> CoercionTable {
    CoercionTable::new()
        .with_all(BOOL_NAMES.iter().copied(), Rule::bool())
        .with("closed_statuses", Rule::List)
        .with("ai_http_timeout_seconds", Rule::float(30.0))
        .with("ai_http_max_connections", Rule::int(10))
        .with("ai_http_max_keepalive_connections", Rule::int(5))
}

/// Complete ControlUnit schema, including its log level keys.
pub fn control_unit_schema(root: Option<&str>, dev: bool) -> Result<Schema, MappingError> {
    let mapping = control_unit_mapping(root, dev)?;
    let log_keys = LogLevelKeys::new("log_level", "info").with_target("sqlx", "log_sql_level", "warn");
    Ok(Schema::new(mapping, control_unit_coercion()).with_log_keys(log_keys))
}
