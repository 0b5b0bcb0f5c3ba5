//! Shared test scaffolding: a fake host runtime standing in for the real
//! object-model C API (out of scope per spec — see crate-level docs).

mod fake_runtime;

pub use fake_runtime::*;

/// Route `log`'s output through `env_logger` so a failing scenario prints
/// whatever `log::debug!`/`trace!` the disassembler and back end emitted,
/// instead of it being silently dropped. Safe to call from every test file;
/// only the first call actually installs the logger.
pub fn init_logging() {
    let _ = env_logger::try_init();
}
