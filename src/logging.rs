//! Process logging.

use env_logger::{Builder, Env};

/// The filter applied when `RUST_LOG` is unset, it keeps the per-epoch progress visible.
pub const DEFAULT_FILTER: &str = "info";

/// Installs the global logger, `RUST_LOG` overrides the default filter.
pub fn init() {
    builder(Env::default()).init();
}

fn builder(env: Env<'_>) -> Builder {
    Builder::from_env(env.default_filter_or(DEFAULT_FILTER))
}

#[cfg(test)]
mod tests {
    use log::{Level, LevelFilter, Log, Metadata};

    use super::*;

    fn enabled(logger: &impl Log, level: Level) -> bool {
        let metadata = Metadata::builder()
            .level(level)
            .target("pest_classifier::run")
            .build();
        logger.enabled(&metadata)
    }

    #[test]
    fn info_is_logged_by_default() {
        let logger = builder(Env::new().filter("PEST_CLASSIFIER_UNSET_LOG")).build();

        assert_eq!(logger.filter(), LevelFilter::Info);
        assert!(enabled(&logger, Level::Info));
        assert!(!enabled(&logger, Level::Debug));
    }

    #[test]
    fn env_overrides_the_default() {
        let var = "PEST_CLASSIFIER_OVERRIDDEN_LOG";
        std::env::set_var(var, "warn");
        let logger = builder(Env::new().filter(var)).build();

        assert_eq!(logger.filter(), LevelFilter::Warn);
        assert!(!enabled(&logger, Level::Info));
    }
}
