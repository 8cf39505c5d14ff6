use tracing_subscriber::fmt::format::{DefaultFields, Format};
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::EnvFilter;

/// `RUST_LOG` style directives giving every module the same level.
pub fn directives(modules: &[&str], log_level: &str) -> String {
    modules
        .iter()
        .map(|module| format!("{module}={log_level}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Installs the global subscriber. `RUST_LOG` wins over the defaults.
pub fn setup(modules: &[&str], log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(modules, log_level)));
    get_subscriber(filter).with_writer(std::io::stderr).init();
}

pub fn get_subscriber(filter: EnvFilter) -> SubscriberBuilder<DefaultFields, Format, EnvFilter> {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_thread_names(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_cover_every_module() {
        assert_eq!(
            directives(&["theseus_cli", "theseus_core"], "debug"),
            "theseus_cli=debug,theseus_core=debug"
        );
    }
}
