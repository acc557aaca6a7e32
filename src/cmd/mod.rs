//! CLI command implementations.
//!
//! | Module     | Commands handled         |
//! |------------|--------------------------|
//! | `serve`    | `Serve`                  |
//! | `boot`     | `Boot`                   |
//! | `replay`   | `Replay`                 |
//! | `inspect`  | `Transform`, `Resolve`   |
//! | `config`   | `Config`                 |
//! | `runtime`  | wiring shared by the above |

pub mod boot;
pub mod config;
pub mod inspect;
pub mod replay;
pub mod runtime;
pub mod serve;

pub use boot::cmd_boot;
pub use config::cmd_config;
pub use inspect::{cmd_resolve, cmd_transform};
pub use replay::cmd_replay;
pub use serve::cmd_serve;

use stagehand::errors::FaultSignal;

/// One fault per line on stderr: `kind fault [path]: message`.
pub(crate) fn print_faults(faults: &[FaultSignal]) {
    for fault in faults {
        match &fault.path {
            Some(path) => eprintln!("{} fault [{}]: {}", fault.kind, path, fault.message),
            None => eprintln!("{} fault: {}", fault.kind, fault.message),
        }
    }
}
