use env_logger::{Builder, Env};
use log::LevelFilter;

/// Installs the process logger.
///
/// `verbose` raises this crate to debug so the configuration dump and
/// per-request lines show up. `RUST_LOG` is applied last, so it wins for
/// anything it names.
pub fn init(verbose: bool) {
    builder(verbose, Env::default()).init();
}

fn builder<'a>(verbose: bool, env: impl Into<Env<'a>>) -> Builder {
    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    if verbose {
        builder.filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Debug);
    }
    builder.parse_env(env);
    builder
}
