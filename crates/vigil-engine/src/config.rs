//! Engine configuration.
//!
//! Operational knobs (retention, retries, tick intervals, batch sizes) and
//! the relevance-scoring weights. The weight defaults are hand-tuned values
//! carried over from production; they are named configuration, not claims of
//! optimality, and every one of them can be overridden.

use std::env;

use vigil_core::NotificationPriority;

/// A value per notification priority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorityScale {
    pub low: f64,
    pub medium: f64,
    pub high: f64,
    pub urgent: f64,
}

impl PriorityScale {
    pub fn get(&self, priority: NotificationPriority) -> f64 {
        match priority {
            NotificationPriority::Low => self.low,
            NotificationPriority::Medium => self.medium,
            NotificationPriority::High => self.high,
            NotificationPriority::Urgent => self.urgent,
        }
    }
}

/// Relevance-scoring weights and thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct RelevanceConfig {
    /// Score every notification starts from.
    pub base_score: f64,
    /// Multiplier applied to the learned dismissal rate (subtracted).
    pub dismissal_weight: f64,
    /// Bonus when the user historically acts quickly.
    pub quick_action_bonus: f64,
    /// "Acts quickly" cutoff on average time-to-action.
    pub quick_action_cutoff_ms: f64,
    /// Bonus when the user is available.
    pub available_bonus: f64,
    /// Penalty when the user is in do-not-disturb.
    pub do_not_disturb_penalty: f64,
    /// Additive bonus per priority.
    pub priority_bonus: PriorityScale,
    /// Penalty once too many similar notifications were recently shown.
    pub fatigue_penalty: f64,
    /// How many similar recent notifications are tolerated before fatigue.
    pub fatigue_threshold: usize,
    /// Window for "recently shown", in minutes.
    pub fatigue_window_minutes: i64,
    /// Minimum score a notification must reach, per priority.
    pub threshold: PriorityScale,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            base_score: 0.5,
            dismissal_weight: 0.5,
            quick_action_bonus: 0.2,
            quick_action_cutoff_ms: 30_000.0,
            available_bonus: 0.1,
            do_not_disturb_penalty: 0.3,
            priority_bonus: PriorityScale {
                low: 0.0,
                medium: 0.1,
                high: 0.2,
                urgent: 0.3,
            },
            fatigue_penalty: 0.2,
            fatigue_threshold: 2,
            fatigue_window_minutes: 15,
            threshold: PriorityScale {
                low: 0.7,
                medium: 0.5,
                high: 0.3,
                urgent: 0.1,
            },
        }
    }
}

/// Delivery queue settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Alerts drained per tick.
    pub batch_size: usize,
    /// Queue-drain tick interval, seconds.
    pub tick_seconds: u64,
    /// Retry cap per (alert, channel, recipient).
    pub max_retries: u32,
    /// Delay before each retry, seconds.
    pub retry_delay_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            tick_seconds: 5,
            max_retries: 3,
            retry_delay_seconds: 30,
        }
    }
}

/// Analytics buffering settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    /// Events buffered before a size-triggered flush.
    pub batch_size: usize,
    /// Interval flush period, seconds.
    pub flush_interval_seconds: u64,
    /// EMA learning rate for dismissal patterns.
    pub learning_rate: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval_seconds: 30,
            learning_rate: 0.1,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    /// Days a resolved alert is retained before purge.
    pub retention_days: RetentionDays,
    pub dispatch: DispatchConfig,
    pub analytics: AnalyticsConfig,
    pub relevance: RelevanceConfig,
}

/// Newtype so `EngineConfig::default()` can derive while keeping a
/// non-zero default retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionDays(pub i64);

impl Default for RetentionDays {
    fn default() -> Self {
        Self(7)
    }
}

impl EngineConfig {
    /// Create configuration from environment variables.
    ///
    /// Optional environment variables (all fall back to defaults):
    /// - `VIGIL_RETENTION_DAYS` - resolved-alert retention (default: 7)
    /// - `VIGIL_DISPATCH_BATCH_SIZE` - alerts drained per tick (default: 10)
    /// - `VIGIL_DISPATCH_TICK_SECONDS` - drain tick period (default: 5)
    /// - `VIGIL_MAX_RETRIES` - delivery retry cap (default: 3)
    /// - `VIGIL_RETRY_DELAY_SECONDS` - delay before retry (default: 30)
    /// - `VIGIL_ANALYTICS_BATCH_SIZE` - events per flush (default: 50)
    /// - `VIGIL_ANALYTICS_FLUSH_SECONDS` - flush period (default: 30)
    pub fn from_env() -> Self {
        fn parse<T: std::str::FromStr>(key: &str, default: T) -> T {
            env::var(key)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        let defaults = Self::default();
        Self {
            retention_days: RetentionDays(parse(
                "VIGIL_RETENTION_DAYS",
                defaults.retention_days.0,
            )),
            dispatch: DispatchConfig {
                batch_size: parse("VIGIL_DISPATCH_BATCH_SIZE", defaults.dispatch.batch_size),
                tick_seconds: parse("VIGIL_DISPATCH_TICK_SECONDS", defaults.dispatch.tick_seconds),
                max_retries: parse("VIGIL_MAX_RETRIES", defaults.dispatch.max_retries),
                retry_delay_seconds: parse(
                    "VIGIL_RETRY_DELAY_SECONDS",
                    defaults.dispatch.retry_delay_seconds,
                ),
            },
            analytics: AnalyticsConfig {
                batch_size: parse("VIGIL_ANALYTICS_BATCH_SIZE", defaults.analytics.batch_size),
                flush_interval_seconds: parse(
                    "VIGIL_ANALYTICS_FLUSH_SECONDS",
                    defaults.analytics.flush_interval_seconds,
                ),
                learning_rate: defaults.analytics.learning_rate,
            },
            relevance: defaults.relevance,
        }
    }

    /// Create a new config builder.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn retention_days(mut self, days: i64) -> Self {
        self.config.retention_days = RetentionDays(days);
        self
    }

    pub fn dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.config.dispatch = dispatch;
        self
    }

    pub fn analytics(mut self, analytics: AnalyticsConfig) -> Self {
        self.config.analytics = analytics;
        self
    }

    pub fn relevance(mut self, relevance: RelevanceConfig) -> Self {
        self.config.relevance = relevance;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.dispatch.max_retries = retries;
        self
    }

    pub fn retry_delay_seconds(mut self, seconds: u64) -> Self {
        self.config.dispatch.retry_delay_seconds = seconds;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.retention_days.0, 7);
        assert_eq!(config.dispatch.max_retries, 3);
        assert_eq!(config.dispatch.batch_size, 10);
        assert_eq!(config.analytics.batch_size, 50);
        assert_eq!(config.analytics.flush_interval_seconds, 30);
        assert!((config.analytics.learning_rate - 0.1).abs() < f64::EPSILON);
        assert!((config.relevance.base_score - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_priority_scale() {
        let scale = RelevanceConfig::default().threshold;
        assert!((scale.get(NotificationPriority::Low) - 0.7).abs() < f64::EPSILON);
        assert!((scale.get(NotificationPriority::Urgent) - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::builder()
            .retention_days(14)
            .max_retries(5)
            .retry_delay_seconds(10)
            .build();
        assert_eq!(config.retention_days.0, 14);
        assert_eq!(config.dispatch.max_retries, 5);
        assert_eq!(config.dispatch.retry_delay_seconds, 10);
    }

    // Environment-based tests are combined into a single test to avoid
    // race conditions when tests run in parallel (env vars are process-global).
    #[test]
    fn test_from_env_scenarios() {
        use std::sync::Mutex;
        static ENV_LOCK: Mutex<()> = Mutex::new(());
        let _guard = ENV_LOCK.lock().unwrap();

        fn clear_all_vigil_vars() {
            std::env::remove_var("VIGIL_RETENTION_DAYS");
            std::env::remove_var("VIGIL_DISPATCH_BATCH_SIZE");
            std::env::remove_var("VIGIL_DISPATCH_TICK_SECONDS");
            std::env::remove_var("VIGIL_MAX_RETRIES");
            std::env::remove_var("VIGIL_RETRY_DELAY_SECONDS");
            std::env::remove_var("VIGIL_ANALYTICS_BATCH_SIZE");
            std::env::remove_var("VIGIL_ANALYTICS_FLUSH_SECONDS");
        }

        // Nothing set: defaults.
        clear_all_vigil_vars();
        assert_eq!(EngineConfig::from_env(), EngineConfig::default());

        // Overrides applied.
        std::env::set_var("VIGIL_RETENTION_DAYS", "30");
        std::env::set_var("VIGIL_MAX_RETRIES", "1");
        let config = EngineConfig::from_env();
        assert_eq!(config.retention_days.0, 30);
        assert_eq!(config.dispatch.max_retries, 1);

        // Garbage falls back to the default.
        std::env::set_var("VIGIL_RETENTION_DAYS", "soon");
        assert_eq!(EngineConfig::from_env().retention_days.0, 7);

        clear_all_vigil_vars();
    }
}
