//! Command implementations.

mod info;
mod record;
mod replay;
mod run;
mod validate;

pub use info::run_info;
pub use record::run_record;
pub use replay::run_replay;
pub use run::run_pipeline;
pub use validate::run_validate;
