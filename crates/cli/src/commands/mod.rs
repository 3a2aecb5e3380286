mod check_config;
mod run;
mod size;

pub use check_config::{run as run_check_config, CheckConfigArgs};
pub use run::{run as run_engine, RunArgs};
pub use size::{run as run_size, SizeArgs};
